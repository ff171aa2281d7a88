//! Storage access shared by every paginated entity table
//!
//! Readers take the pool; writers take a `&mut SqliteConnection` so the
//! caller decides the transaction boundary.

use crate::error::Result;
use crate::models::{Album, Artist, Audio, PaginatedEntity};
use crate::repositories::{Page, PageRequest};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::types::Json;
use sqlx::{FromRow, Sqlite, SqliteConnection, SqlitePool};
use std::collections::HashSet;
use std::marker::PhantomData;
use tracing::{debug, instrument};

pub(crate) type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQLite caps bound parameters per statement; id lookups are split by this.
pub const MAX_BOUND_IDS: usize = 900;

/// Table layout of one entity kind.
pub trait EntityTable: PaginatedEntity + for<'r> FromRow<'r, SqliteRow> {
    const TABLE: &'static str;

    /// Columns written by [`EntityTable::bind_row`], in bind order.
    const COLUMNS: &'static [&'static str];

    /// Whether the table carries a `details_fetched` column.
    const HAS_DETAILS: bool = false;

    fn bind_row<'q>(&self, query: SqliteQuery<'q>) -> SqliteQuery<'q>;
}

impl EntityTable for Audio {
    const TABLE: &'static str = "audios";
    const COLUMNS: &'static [&'static str] = &[
        "primary_key",
        "id",
        "search_key",
        "source_id",
        "artist",
        "title",
        "duration",
        "date",
        "album",
        "explicit",
        "cover_url",
        "cover_url_medium",
        "cover_url_small",
        "cover_alternate",
        "download_url",
        "stream_url",
        "params",
        "page",
        "search_index",
    ];

    fn bind_row<'q>(&self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.primary_key.clone())
            .bind(self.id.clone())
            .bind(self.search_key.clone())
            .bind(self.source_id.clone())
            .bind(self.artist.clone())
            .bind(self.title.clone())
            .bind(self.duration)
            .bind(self.date)
            .bind(self.album.clone())
            .bind(self.explicit)
            .bind(self.cover_url.clone())
            .bind(self.cover_url_medium.clone())
            .bind(self.cover_url_small.clone())
            .bind(self.cover_alternate.clone())
            .bind(self.download_url.clone())
            .bind(self.stream_url.clone())
            .bind(self.params.clone())
            .bind(self.page)
            .bind(self.search_index)
    }
}

impl EntityTable for Artist {
    const TABLE: &'static str = "artists";
    const HAS_DETAILS: bool = true;
    const COLUMNS: &'static [&'static str] = &[
        "primary_key",
        "id",
        "name",
        "domain",
        "photo",
        "audios",
        "albums",
        "details_fetched",
        "params",
        "page",
        "search_index",
    ];

    fn bind_row<'q>(&self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.primary_key.clone())
            .bind(self.id.clone())
            .bind(self.name.clone())
            .bind(self.domain.clone())
            .bind(Json(self.photo.clone()))
            .bind(Json(self.audios.clone()))
            .bind(Json(self.albums.clone()))
            .bind(self.details_fetched)
            .bind(self.params.clone())
            .bind(self.page)
            .bind(self.search_index)
    }
}

impl EntityTable for Album {
    const TABLE: &'static str = "albums";
    const HAS_DETAILS: bool = true;
    const COLUMNS: &'static [&'static str] = &[
        "primary_key",
        "id",
        "access_key",
        "artist_id",
        "title",
        "year",
        "song_count",
        "explicit",
        "main_artists",
        "genre_id",
        "photo",
        "audios",
        "details_fetched",
        "params",
        "page",
        "search_index",
    ];

    fn bind_row<'q>(&self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.primary_key.clone())
            .bind(self.id.clone())
            .bind(self.access_key.clone())
            .bind(self.artist_id)
            .bind(self.title.clone())
            .bind(self.year)
            .bind(self.song_count)
            .bind(self.explicit)
            .bind(Json(self.artists.clone()))
            .bind(self.genre_id)
            .bind(Json(self.photo.clone()))
            .bind(Json(self.audios.clone()))
            .bind(self.details_fetched)
            .bind(self.params.clone())
            .bind(self.page)
            .bind(self.search_index)
    }
}

/// Paged access to one entity table.
pub struct PaginatedEntityRepository<E> {
    pool: SqlitePool,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for PaginatedEntityRepository<E> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: EntityTable> PaginatedEntityRepository<E> {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            _entity: PhantomData,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn insert_sql(verb: &str) -> String {
        let placeholders = vec!["?"; E::COLUMNS.len()].join(", ");
        format!(
            "{} INTO {} ({}) VALUES ({})",
            verb,
            E::TABLE,
            E::COLUMNS.join(", "),
            placeholders
        )
    }

    /// Rows of one fetched page, in response order.
    pub async fn entries(&self, params: &str, page: u32) -> Result<Vec<E>> {
        let sql = format!(
            "SELECT * FROM {} WHERE params = ? AND page = ? ORDER BY search_index",
            E::TABLE
        );
        let rows = sqlx::query_as::<_, E>(&sql)
            .bind(params)
            .bind(page)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Every stored page of a fingerprint.
    pub async fn entries_for(&self, params: &str) -> Result<Vec<E>> {
        let sql = format!(
            "SELECT * FROM {} WHERE params = ? ORDER BY page, search_index",
            E::TABLE
        );
        let rows = sqlx::query_as::<_, E>(&sql)
            .bind(params)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    #[instrument(skip(self), fields(table = E::TABLE))]
    pub async fn entries_page(&self, params: &str, request: PageRequest) -> Result<Page<E>> {
        let total = self.count(params).await?;
        let sql = format!(
            "SELECT * FROM {} WHERE params = ? ORDER BY page, search_index LIMIT ? OFFSET ?",
            E::TABLE
        );
        let rows = sqlx::query_as::<_, E>(&sql)
            .bind(params)
            .bind(request.limit())
            .bind(request.offset())
            .fetch_all(&self.pool)
            .await?;
        Ok(Page::new(rows, total, request))
    }

    pub async fn count(&self, params: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE params = ?", E::TABLE);
        let (count,): (i64,) = sqlx::query_as(&sql)
            .bind(params)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Highest page stored for a fingerprint.
    pub async fn max_page(&self, params: &str) -> Result<Option<u32>> {
        let sql = format!("SELECT MAX(page) FROM {} WHERE params = ?", E::TABLE);
        let (page,): (Option<i64>,) = sqlx::query_as(&sql)
            .bind(params)
            .fetch_one(&self.pool)
            .await?;
        Ok(page.map(|page| page.max(0) as u32))
    }

    /// Best row for a business id, preferring one with fetched details.
    pub async fn details_entry(&self, id: &str) -> Result<Option<E>> {
        let mut conn = self.pool.acquire().await?;
        self.details_entry_in(&mut conn, id).await
    }

    pub async fn details_entry_in(&self, conn: &mut SqliteConnection, id: &str) -> Result<Option<E>> {
        let order = if E::HAS_DETAILS {
            "details_fetched DESC, primary_key = id DESC"
        } else {
            "primary_key = id DESC"
        };
        let sql = format!(
            "SELECT * FROM {} WHERE id = ? ORDER BY {} LIMIT 1",
            E::TABLE,
            order
        );
        let row = sqlx::query_as::<_, E>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    pub async fn entry_by_primary_key(&self, primary_key: &str) -> Result<Option<E>> {
        let sql = format!("SELECT * FROM {} WHERE primary_key = ?", E::TABLE);
        let row = sqlx::query_as::<_, E>(&sql)
            .bind(primary_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Writes one fetched page. Page 0 replaces every page of `params`;
    /// any other page replaces only itself.
    #[instrument(skip(self, conn, entries), fields(table = E::TABLE, count = entries.len()))]
    pub async fn replace_page(
        &self,
        conn: &mut SqliteConnection,
        params: &str,
        page: u32,
        entries: &[E],
    ) -> Result<()> {
        let deleted = if page == 0 {
            self.delete_by_params(conn, params).await?
        } else {
            self.delete_page(conn, params, page).await?
        };
        debug!(deleted, "Replacing cached page");
        self.insert_all(conn, entries).await
    }

    pub async fn insert_all(&self, conn: &mut SqliteConnection, entries: &[E]) -> Result<()> {
        let sql = Self::insert_sql("INSERT OR REPLACE");
        for entry in entries {
            entry.bind_row(sqlx::query(&sql)).execute(&mut *conn).await?;
        }
        Ok(())
    }

    pub async fn upsert(&self, conn: &mut SqliteConnection, entry: &E) -> Result<()> {
        let sql = Self::insert_sql("INSERT OR REPLACE");
        entry.bind_row(sqlx::query(&sql)).execute(&mut *conn).await?;
        Ok(())
    }

    /// Inserts entries whose primary key is not stored yet. Returns how many
    /// were inserted.
    pub async fn insert_missing(&self, conn: &mut SqliteConnection, entries: &[E]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let keys: Vec<String> = entries
            .iter()
            .map(|entry| entry.primary_key().to_string())
            .collect();
        let mut existing = HashSet::new();
        for chunk in keys.chunks(MAX_BOUND_IDS) {
            let sql = format!(
                "SELECT primary_key FROM {} WHERE primary_key IN ({})",
                E::TABLE,
                vec!["?"; chunk.len()].join(", ")
            );
            let mut query = sqlx::query_as::<_, (String,)>(&sql);
            for key in chunk {
                query = query.bind(key.clone());
            }
            for (key,) in query.fetch_all(&mut *conn).await? {
                existing.insert(key);
            }
        }

        let missing: Vec<E> = entries
            .iter()
            .filter(|entry| !existing.contains(entry.primary_key()))
            .cloned()
            .collect();
        self.insert_all(conn, &missing).await?;
        Ok(missing.len())
    }

    pub async fn delete_by_params(&self, conn: &mut SqliteConnection, params: &str) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE params = ?", E::TABLE);
        let result = sqlx::query(&sql).bind(params).execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_page(
        &self,
        conn: &mut SqliteConnection,
        params: &str,
        page: u32,
    ) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE params = ? AND page = ?", E::TABLE);
        let result = sqlx::query(&sql)
            .bind(params)
            .bind(page)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_by_primary_key(
        &self,
        conn: &mut SqliteConnection,
        primary_key: &str,
    ) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE primary_key = ?", E::TABLE);
        let result = sqlx::query(&sql)
            .bind(primary_key)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_all(&self, conn: &mut SqliteConnection) -> Result<u64> {
        let sql = format!("DELETE FROM {}", E::TABLE);
        let result = sqlx::query(&sql).execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }
}
