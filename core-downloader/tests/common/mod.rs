#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::SqliteSettingsStore;
use bridge_traits::documents::{DocumentTree, UriPermission, UriPermissions};
use bridge_traits::download::{
    Callback, DownloadEngine, EngineAction, EngineDownload, EngineError, EngineId, EngineQuery,
    EngineRequest, EngineStatus,
};
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::Clock;
use chrono::{DateTime, TimeZone, Utc};
use core_data::db::create_test_pool;
use core_data::models::Audio;
use core_data::InvalidationTracker;
use core_downloader::{
    DownloadManager, DownloadStatusPoller, Downloader, DownloaderEvents, DownloadsLocation,
    SqliteDownloadRequestRepository,
};
use core_runtime::config::DownloaderConfig;
use core_runtime::events::EventBus;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const LOCATION: &str = "content://tree/music";
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

// ============================================================================
// Engine
// ============================================================================

#[derive(Default)]
struct EngineState {
    downloads: BTreeMap<EngineId, EngineDownload>,
    next_id: EngineId,
    actions: Vec<(EngineAction, Vec<EngineId>)>,
}

/// In-memory engine answering every callback synchronously.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<EngineState>,
    pub queries: AtomicUsize,
    /// Drops query callbacks without calling them
    pub drop_queries: AtomicBool,
    reject: Mutex<Option<EngineError>>,
}

impl FakeEngine {
    pub fn reject_with(&self, error: EngineError) {
        *self.reject.lock().unwrap() = Some(error);
    }

    pub fn set_status(&self, id: EngineId, status: EngineStatus) {
        if let Some(download) = self.state.lock().unwrap().downloads.get_mut(&id) {
            download.status = status;
        }
    }

    pub fn forget(&self, id: EngineId) {
        self.state.lock().unwrap().downloads.remove(&id);
    }

    pub fn download(&self, id: EngineId) -> Option<EngineDownload> {
        self.state.lock().unwrap().downloads.get(&id).cloned()
    }

    pub fn ids(&self) -> Vec<EngineId> {
        self.state.lock().unwrap().downloads.keys().copied().collect()
    }

    pub fn actions(&self) -> Vec<(EngineAction, Vec<EngineId>)> {
        self.state.lock().unwrap().actions.clone()
    }
}

impl DownloadEngine for FakeEngine {
    fn enqueue(
        &self,
        request: EngineRequest,
        on_enqueued: Callback<EngineRequest>,
        on_error: Callback<EngineError>,
    ) {
        if let Some(error) = self.reject.lock().unwrap().clone() {
            on_error(error);
            return;
        }

        let id = {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let id = state.next_id;
            state.downloads.insert(
                id,
                EngineDownload {
                    id,
                    url: request.url.clone(),
                    file: request.file.clone(),
                    status: EngineStatus::Queued,
                    downloaded: 0,
                    total: 1_000,
                    eta_millis: -1,
                    bytes_per_second: 0,
                    error: None,
                    created: 0,
                },
            );
            id
        };
        on_enqueued(request.with_id(id));
    }

    fn query(&self, query: EngineQuery, callback: Callback<Vec<EngineDownload>>) {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.drop_queries.load(Ordering::SeqCst) {
            return;
        }
        let state = self.state.lock().unwrap();
        let all = state.downloads.values().cloned();
        let downloads = match query {
            EngineQuery::All => all.collect(),
            EngineQuery::ById(id) => all.filter(|d| d.id == id).collect(),
            EngineQuery::ByIds(ids) => all.filter(|d| ids.contains(&d.id)).collect(),
            EngineQuery::ByStatuses(statuses) => {
                all.filter(|d| statuses.contains(&d.status)).collect()
            }
        };
        drop(state);
        callback(downloads);
    }

    fn apply(
        &self,
        action: EngineAction,
        ids: Vec<EngineId>,
        callback: Callback<Result<(), EngineError>>,
    ) {
        let mut state = self.state.lock().unwrap();
        for id in &ids {
            match action {
                EngineAction::Remove | EngineAction::Delete => {
                    state.downloads.remove(id);
                }
                _ => {
                    if let Some(download) = state.downloads.get_mut(id) {
                        download.status = match action {
                            EngineAction::Pause => EngineStatus::Paused,
                            EngineAction::Cancel => EngineStatus::Cancelled,
                            _ => EngineStatus::Queued,
                        };
                    }
                }
            }
        }
        state.actions.push((action, ids));
        drop(state);
        callback(Ok(()));
    }
}

// ============================================================================
// Documents
// ============================================================================

#[derive(Default)]
pub struct FakePermissions {
    grants: Mutex<Vec<UriPermission>>,
    pub refuse: AtomicBool,
}

impl FakePermissions {
    pub fn revoke_write(&self, uri: &str) {
        for grant in self.grants.lock().unwrap().iter_mut() {
            if grant.uri == uri {
                grant.write = false;
            }
        }
    }
}

#[async_trait]
impl UriPermissions for FakePermissions {
    async fn take_persistable(&self, uri: &str) -> BridgeResult<()> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(BridgeError::PermissionDenied(uri.to_string()));
        }
        let mut grants = self.grants.lock().unwrap();
        grants.retain(|grant| grant.uri != uri);
        grants.push(UriPermission {
            uri: uri.to_string(),
            read: true,
            write: true,
        });
        Ok(())
    }

    async fn release_persistable(&self, uri: &str) -> BridgeResult<()> {
        self.grants.lock().unwrap().retain(|grant| grant.uri != uri);
        Ok(())
    }

    async fn persisted(&self) -> BridgeResult<Vec<UriPermission>> {
        Ok(self.grants.lock().unwrap().clone())
    }
}

/// Document tree where every created document exists until removed.
#[derive(Default)]
pub struct FakeDocuments {
    existing: Mutex<HashSet<String>>,
    pub created: Mutex<Vec<String>>,
    pub fail_create: AtomicBool,
}

impl FakeDocuments {
    pub fn add(&self, uri: &str) {
        self.existing.lock().unwrap().insert(uri.to_string());
    }

    pub fn remove(&self, uri: &str) {
        self.existing.lock().unwrap().remove(uri);
    }
}

#[async_trait]
impl DocumentTree for FakeDocuments {
    async fn exists(&self, uri: &str) -> BridgeResult<bool> {
        Ok(self.existing.lock().unwrap().contains(uri))
    }

    async fn create_document(
        &self,
        parent_uri: &str,
        directories: &[String],
        display_name: &str,
        _mime_type: &str,
    ) -> BridgeResult<String> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(BridgeError::OperationFailed("disk full".to_string()));
        }
        let mut parts = vec![parent_uri.to_string()];
        parts.extend(directories.iter().cloned());
        parts.push(display_name.to_string());
        let uri = parts.join("/");

        self.add(&uri);
        self.created.lock().unwrap().push(uri.clone());
        Ok(uri)
    }
}

pub struct FixedClock;

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }
}

// ============================================================================
// Harness
// ============================================================================

pub fn audio(id: &str) -> Audio {
    Audio {
        id: id.to_string(),
        artist: "Aphex Twin".to_string(),
        title: format!("Track {id}"),
        album: Some("Drukqs".to_string()),
        duration: 200,
        download_url: Some(format!("https://cdn.test/{id}.mp3")),
        ..Audio::default()
    }
}

pub struct Harness {
    pub pool: SqlitePool,
    pub repo: Arc<SqliteDownloadRequestRepository>,
    pub engine: Arc<FakeEngine>,
    pub permissions: Arc<FakePermissions>,
    pub documents: Arc<FakeDocuments>,
    pub events: DownloaderEvents,
    pub bus: EventBus,
    pub poller: DownloadStatusPoller,
    pub downloader: Downloader,
}

impl Harness {
    pub async fn new() -> Self {
        let pool = create_test_pool().await.unwrap();
        let repo = Arc::new(SqliteDownloadRequestRepository::new(
            pool.clone(),
            InvalidationTracker::new(),
        ));
        let engine = Arc::new(FakeEngine::default());
        let permissions = Arc::new(FakePermissions::default());
        let documents = Arc::new(FakeDocuments::default());
        let settings = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
        let events = DownloaderEvents::new();
        let bus = EventBus::new(64);

        let config = DownloaderConfig {
            status_refresh_interval: POLL_INTERVAL,
            callback_timeout: Duration::from_secs(2),
            max_ids_per_query: None,
        };
        let manager = DownloadManager::new(engine.clone(), &config);
        let poller = DownloadStatusPoller::new(manager.clone(), config.status_refresh_interval);
        let location = DownloadsLocation::new(settings.clone(), permissions.clone(), events.clone());
        let downloader = Downloader::new(
            repo.clone(),
            manager,
            poller.clone(),
            location,
            documents.clone(),
            settings,
            Arc::new(FixedClock),
        )
        .with_event_bus(bus.clone());

        Self {
            pool,
            repo,
            engine,
            permissions,
            documents,
            events,
            bus,
            poller,
            downloader,
        }
    }

    /// Harness with a usable downloads location.
    pub async fn with_location() -> Self {
        let harness = Self::new().await;
        harness.documents.add(LOCATION);
        harness.downloader.set_location(LOCATION).await.unwrap();
        harness.events.clear();
        harness
    }
}
