//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridges (HTTP, settings, download engine,
//! document tree, permission grants) into the data core. Desktop apps
//! typically enable the `desktop-shims` feature, which supplies the reqwest
//! client and the SQLite settings store from `bridge-desktop`.

pub mod error;

pub use error::{CoreError, Result};

use core_data::db::{create_pool, DatabaseConfig};
use core_data::models::{Album, Artist, Audio};
use core_data::{
    DataContext, DatmusicApi, InvalidationTracker, PaginatedEntityRepository, SearchPager, Stores,
};
use core_downloader::{
    DownloadManager, DownloadStatusPoller, Downloader, DownloaderEvents, DownloadsLocation,
    SqliteDownloadRequestRepository,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::EventBus;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

/// Database path that selects a private in-memory database.
pub const IN_MEMORY_DATABASE: &str = ":memory:";

/// Page advance and refresh for each searchable kind.
#[derive(Clone)]
pub struct Pagers {
    pub audios: SearchPager<Audio>,
    pub artists: SearchPager<Artist>,
    pub albums: SearchPager<Album>,
}

impl Pagers {
    fn new(stores: &Stores, pool: &SqlitePool, events: &EventBus) -> Self {
        Self {
            audios: SearchPager::new(
                stores.audios.clone(),
                PaginatedEntityRepository::new(pool.clone()),
            )
            .with_event_bus(events.clone()),
            artists: SearchPager::new(
                stores.artists.clone(),
                PaginatedEntityRepository::new(pool.clone()),
            )
            .with_event_bus(events.clone()),
            albums: SearchPager::new(
                stores.albums.clone(),
                PaginatedEntityRepository::new(pool.clone()),
            )
            .with_event_bus(events.clone()),
        }
    }
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    pool: SqlitePool,
    events: EventBus,
    stores: Stores,
    pagers: Pagers,
    downloader: Option<Downloader>,
}

impl CoreService {
    /// Opens the database, runs migrations and wires every component.
    ///
    /// The downloader is only built when the configuration carries the
    /// download bridges.
    #[instrument(skip(config), fields(database = %config.database_path.display()))]
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new(config.event_buffer_size);
        let pool = create_pool(database_config(&config.database_path)).await?;
        let tracker = InvalidationTracker::new();

        let context = DataContext {
            pool: pool.clone(),
            api: DatmusicApi::new(config.http_client.clone(), config.api_base_url.clone()),
            settings: config.settings_store.clone(),
            clock: config.clock.clone(),
            tracker: tracker.clone(),
            events: Some(events.clone()),
            staleness: config.staleness,
        };
        let stores = Stores::new(&context);
        let pagers = Pagers::new(&stores, &pool, &events);

        let downloader = config.download_bridges.as_ref().map(|bridges| {
            let repo = Arc::new(SqliteDownloadRequestRepository::new(pool.clone(), tracker.clone()));
            let manager = DownloadManager::new(bridges.engine.clone(), &config.downloader);
            let poller =
                DownloadStatusPoller::new(manager.clone(), config.downloader.status_refresh_interval);
            let location = DownloadsLocation::new(
                config.settings_store.clone(),
                bridges.permissions.clone(),
                DownloaderEvents::new(),
            );
            Downloader::new(
                repo,
                manager,
                poller,
                location,
                bridges.documents.clone(),
                config.settings_store.clone(),
                config.clock.clone(),
            )
            .with_event_bus(events.clone())
        });

        info!(downloader = downloader.is_some(), "Core service ready");
        Ok(Self {
            pool,
            events,
            stores,
            pagers,
            downloader,
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn pagers(&self) -> &Pagers {
        &self.pagers
    }

    pub fn downloader(&self) -> Option<&Downloader> {
        self.downloader.as_ref()
    }

    /// The downloader, or a capability error naming the missing bridges.
    pub fn require_downloader(&self) -> Result<&Downloader> {
        self.downloader
            .as_ref()
            .ok_or_else(|| CoreError::CapabilityMissing {
                capability: "Downloader".to_string(),
                message: "Provide a DownloadEngine, UriPermissions and DocumentTree \
                          to CoreConfig::builder() to enable downloads."
                    .to_string(),
            })
    }

    /// Drops every cached search and details row. Downloads are kept.
    pub async fn clear_cache(&self) -> Result<()> {
        self.stores.clear_all().await?;
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.pool.close().await;
        info!("Core service stopped");
    }
}

fn database_config(path: &Path) -> DatabaseConfig {
    if path.as_os_str() == IN_MEMORY_DATABASE {
        DatabaseConfig::in_memory()
    } else {
        DatabaseConfig::new(path)
    }
}

/// Bootstraps with the desktop defaults: the reqwest HTTP client and a
/// settings database next to `database_path`.
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop(database_path: impl AsRef<Path>) -> Result<CoreService> {
    let config = CoreConfig::builder()
        .database_path(database_path.as_ref())
        .build()?;
    CoreService::bootstrap(config).await
}
