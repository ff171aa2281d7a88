//! # Download Request Ledger
//!
//! Durable record of what the user asked to download, independent of the
//! engine's own bookkeeping. Rows are keyed by entity id; re-queuing an entity
//! overwrites its row.
//!
//! Every read returns rows ordered by `created_at DESC, id ASC`.

use crate::error::{DownloaderError, Result};
use crate::models::{DownloadRequest, DownloadRequestType};
use async_trait::async_trait;
use core_data::repositories::MAX_BOUND_IDS;
use core_data::InvalidationTracker;
use sqlx::{FromRow, SqlitePool};
use tokio::sync::watch;
use tracing::debug;

pub const DOWNLOAD_REQUESTS_TABLE: &str = "download_requests";

const SELECT_COLUMNS: &str = "SELECT id, entity_type, entity_json, request_id, created_at FROM download_requests";
const ORDER: &str = "ORDER BY created_at DESC, id ASC";

// ============================================================================
// Repository Trait
// ============================================================================

#[async_trait]
pub trait DownloadRequestRepository: Send + Sync {
    /// Insert or overwrite the row of `request.id`.
    async fn upsert(&self, request: &DownloadRequest) -> Result<()>;

    async fn find(&self, id: &str) -> Result<Option<DownloadRequest>>;

    async fn exists(&self, id: &str) -> Result<bool>;

    async fn entries(&self) -> Result<Vec<DownloadRequest>>;

    async fn entries_by_type(&self, entity_type: DownloadRequestType) -> Result<Vec<DownloadRequest>>;

    /// Rows among `ids`, optionally restricted to one type. Any number of ids
    /// is accepted.
    async fn entries_by_ids(
        &self,
        ids: &[String],
        entity_type: Option<DownloadRequestType>,
    ) -> Result<Vec<DownloadRequest>>;

    /// Case-insensitive substring match on the entity's title, artist or
    /// album.
    async fn search(&self, query: &str) -> Result<Vec<DownloadRequest>>;

    async fn delete(&self, id: &str) -> Result<u64>;

    async fn delete_many(&self, ids: &[String]) -> Result<u64>;

    async fn delete_all(&self) -> Result<u64>;

    async fn count(&self) -> Result<u64>;

    /// Bumped after every write.
    fn changes(&self) -> watch::Receiver<u64>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

pub struct SqliteDownloadRequestRepository {
    pool: SqlitePool,
    tracker: InvalidationTracker,
}

impl SqliteDownloadRequestRepository {
    pub fn new(pool: SqlitePool, tracker: InvalidationTracker) -> Self {
        Self { pool, tracker }
    }

    fn notify(&self) {
        self.tracker.notify(&[DOWNLOAD_REQUESTS_TABLE]);
    }

    async fn fetch(&self, sql: &str, binds: &[String]) -> Result<Vec<DownloadRequest>> {
        let mut query = sqlx::query_as::<_, DownloadRequestRow>(sql);
        for value in binds {
            query = query.bind(value.clone());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(DownloadRequest::try_from).collect()
    }
}

#[derive(Debug, FromRow)]
struct DownloadRequestRow {
    id: String,
    entity_type: String,
    entity_json: String,
    request_id: Option<i32>,
    created_at: i64,
}

impl TryFrom<DownloadRequestRow> for DownloadRequest {
    type Error = DownloaderError;

    fn try_from(row: DownloadRequestRow) -> Result<Self> {
        let entity_type = row.entity_type.parse().map_err(|_| DownloaderError::CorruptRequest {
            id: row.id.clone(),
            message: format!("unknown entity type '{}'", row.entity_type),
        })?;

        Ok(DownloadRequest {
            id: row.id,
            entity_type,
            entity_json: row.entity_json,
            request_id: row.request_id,
            created_at: row.created_at,
        })
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Escapes LIKE wildcards so the query matches literally.
fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for c in query.trim().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[async_trait]
impl DownloadRequestRepository for SqliteDownloadRequestRepository {
    async fn upsert(&self, request: &DownloadRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO download_requests (id, entity_type, entity_json, request_id, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                entity_type = excluded.entity_type,
                entity_json = excluded.entity_json,
                request_id = excluded.request_id,
                created_at = excluded.created_at
            "#,
        )
        .bind(&request.id)
        .bind(request.entity_type.as_str())
        .bind(&request.entity_json)
        .bind(request.request_id)
        .bind(request.created_at)
        .execute(&self.pool)
        .await?;

        debug!(id = %request.id, request_id = ?request.request_id, "Saved download request");
        self.notify();
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<DownloadRequest>> {
        let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
        let row = sqlx::query_as::<_, DownloadRequestRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(DownloadRequest::try_from).transpose()
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM download_requests WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn entries(&self) -> Result<Vec<DownloadRequest>> {
        self.fetch(&format!("{} {}", SELECT_COLUMNS, ORDER), &[]).await
    }

    async fn entries_by_type(&self, entity_type: DownloadRequestType) -> Result<Vec<DownloadRequest>> {
        let sql = format!("{} WHERE entity_type = ? {}", SELECT_COLUMNS, ORDER);
        self.fetch(&sql, &[entity_type.as_str().to_string()]).await
    }

    async fn entries_by_ids(
        &self,
        ids: &[String],
        entity_type: Option<DownloadRequestType>,
    ) -> Result<Vec<DownloadRequest>> {
        let mut requests = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_BOUND_IDS) {
            let mut binds = chunk.to_vec();
            let type_clause = match entity_type {
                Some(entity_type) => {
                    binds.push(entity_type.as_str().to_string());
                    " AND entity_type = ?"
                }
                None => "",
            };
            let sql = format!(
                "{} WHERE id IN ({}){}",
                SELECT_COLUMNS,
                placeholders(chunk.len()),
                type_clause
            );
            requests.extend(self.fetch(&sql, &binds).await?);
        }

        // Chunks are ordered individually
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(requests)
    }

    async fn search(&self, query: &str) -> Result<Vec<DownloadRequest>> {
        let pattern = like_pattern(query);
        let sql = format!(
            r#"{} WHERE
                json_extract(entity_json, '$.title') LIKE ?1 ESCAPE '\'
                OR json_extract(entity_json, '$.artist') LIKE ?1 ESCAPE '\'
                OR json_extract(entity_json, '$.album') LIKE ?1 ESCAPE '\'
            {}"#,
            SELECT_COLUMNS, ORDER
        );
        self.fetch(&sql, &[pattern]).await
    }

    async fn delete(&self, id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM download_requests WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            self.notify();
        }
        Ok(result.rows_affected())
    }

    async fn delete_many(&self, ids: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;
        for chunk in ids.chunks(MAX_BOUND_IDS) {
            let sql = format!(
                "DELETE FROM download_requests WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id.clone());
            }
            deleted += query.execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        if deleted > 0 {
            self.notify();
        }
        Ok(deleted)
    }

    async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM download_requests")
            .execute(&self.pool)
            .await?;
        self.notify();
        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM download_requests")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.tracker.subscribe(DOWNLOAD_REQUESTS_TABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_data::db::create_test_pool;
    use core_data::models::Audio;

    async fn repository() -> SqliteDownloadRequestRepository {
        let pool = create_test_pool().await.unwrap();
        SqliteDownloadRequestRepository::new(pool, InvalidationTracker::new())
    }

    fn request(id: &str, title: &str, created_at: i64) -> DownloadRequest {
        let audio = Audio {
            id: id.to_string(),
            artist: "Boards of Canada".to_string(),
            title: title.to_string(),
            album: Some("Geogaddi".to_string()),
            ..Audio::default()
        };
        DownloadRequest::from_audio(&audio, created_at).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_overwrites_request_id() {
        let repo = repository().await;

        repo.upsert(&request("a", "Alpha", 1).with_request_id(10))
            .await
            .unwrap();
        repo.upsert(&request("a", "Alpha", 2).with_request_id(11))
            .await
            .unwrap();

        assert_eq!(repo.count().await.unwrap(), 1);
        let found = repo.find("a").await.unwrap().unwrap();
        assert_eq!(found.request_id, Some(11));
        assert_eq!(found.created_at, 2);
    }

    #[tokio::test]
    async fn test_unset_request_id_is_null() {
        let repo = repository().await;
        repo.upsert(&request("a", "Alpha", 1)).await.unwrap();

        let found = repo.find("a").await.unwrap().unwrap();
        assert_eq!(found.request_id, None);
        assert!(repo.exists("a").await.unwrap());
        assert!(!repo.exists("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_entries_newest_first_then_by_id() {
        let repo = repository().await;
        repo.upsert(&request("c", "C", 1)).await.unwrap();
        repo.upsert(&request("b", "B", 2)).await.unwrap();
        repo.upsert(&request("a", "A", 2)).await.unwrap();

        let ids: Vec<_> = repo
            .entries()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_entries_by_ids_spans_chunks() {
        let repo = repository().await;
        let total = MAX_BOUND_IDS + 50;
        for i in 0..total {
            repo.upsert(&request(&format!("id{i:05}"), "T", i as i64))
                .await
                .unwrap();
        }

        let mut ids: Vec<String> = (0..total).map(|i| format!("id{i:05}")).collect();
        ids.push("missing".to_string());
        let found = repo
            .entries_by_ids(&ids, Some(DownloadRequestType::Audio))
            .await
            .unwrap();

        assert_eq!(found.len(), total);
        assert_eq!(found[0].id, format!("id{:05}", total - 1));

        let none = repo
            .entries_by_ids(&ids, Some(DownloadRequestType::Playlist))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_search_matches_title_artist_and_album() {
        let repo = repository().await;
        repo.upsert(&request("a", "Music Is Math", 1)).await.unwrap();
        repo.upsert(&request("b", "Dawn Chorus", 2)).await.unwrap();

        assert_eq!(repo.search("math").await.unwrap().len(), 1);
        assert_eq!(repo.search("boards").await.unwrap().len(), 2);
        assert_eq!(repo.search("geogaddi").await.unwrap().len(), 2);
        assert!(repo.search("100%").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deletes_notify_changes() {
        let repo = repository().await;
        let mut changes = repo.changes();

        repo.upsert(&request("a", "A", 1)).await.unwrap();
        repo.upsert(&request("b", "B", 2)).await.unwrap();
        repo.upsert(&request("c", "C", 3)).await.unwrap();
        assert!(changes.has_changed().unwrap());
        changes.borrow_and_update();

        assert_eq!(repo.delete("a").await.unwrap(), 1);
        assert_eq!(
            repo.delete_many(&["b".to_string(), "zzz".to_string()])
                .await
                .unwrap(),
            1
        );
        assert!(changes.has_changed().unwrap());

        assert_eq!(repo.delete_all().await.unwrap(), 1);
        assert_eq!(repo.count().await.unwrap(), 0);
    }
}
