//! # Core Configuration Module
//!
//! Builder-based configuration for the data core.
//!
//! ## Overview
//!
//! [`CoreConfig`] bundles the host bridges together with tuning knobs for the
//! cache (per-kind staleness windows) and the downloader (poll interval,
//! callback timeout, engine query chunk size). The builder fails fast: a
//! missing capability is reported at `build()` time with an actionable
//! message rather than surfacing later as a runtime error.
//!
//! ## Required Dependencies
//!
//! - `HttpClient` - remote API access (desktop default: reqwest)
//! - `SettingsStore` - staleness ledger and preferences (desktop default: SQLite)
//!
//! ## Optional Dependencies
//!
//! - `Clock` - defaults to [`SystemClock`]
//! - `DownloadEngine`, `UriPermissions`, `DocumentTree` - the downloader is
//!   only available when all three are injected
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/datmusic.db")
//!     .http_client(Arc::new(MyHttpClient))
//!     .settings_store(Arc::new(MySettingsStore))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{
    Clock, DocumentTree, DownloadEngine, HttpClient, SettingsStore, SystemClock, UriPermissions,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://datmusic.xyz";

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Staleness windows for each cached kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessConfig {
    pub audios_search: Duration,
    pub artists_search: Duration,
    pub albums_search: Duration,
    pub artist_details: Duration,
    pub album_details: Duration,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            audios_search: DAY,
            artists_search: DAY * 7,
            albums_search: DAY * 7,
            artist_details: DAY,
            album_details: DAY,
        }
    }
}

impl StalenessConfig {
    /// Same window for every kind. Mostly useful in tests.
    pub fn uniform(ttl: Duration) -> Self {
        Self {
            audios_search: ttl,
            artists_search: ttl,
            albums_search: ttl,
            artist_details: ttl,
            album_details: ttl,
        }
    }

    fn validate(&self) -> Result<()> {
        let windows = [
            ("audios_search", self.audios_search),
            ("artists_search", self.artists_search),
            ("albums_search", self.albums_search),
            ("artist_details", self.artist_details),
            ("album_details", self.album_details),
        ];
        for (name, ttl) in windows {
            if ttl.is_zero() {
                return Err(Error::Config(format!(
                    "Staleness window '{}' must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Downloader tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloaderConfig {
    /// How often the engine is polled while someone observes downloads
    pub status_refresh_interval: Duration,
    /// Upper bound on waiting for an engine callback
    pub callback_timeout: Duration,
    /// Engine ids per status query; `None` uses the engine's own limit
    pub max_ids_per_query: Option<usize>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            status_refresh_interval: Duration::from_millis(1500),
            callback_timeout: Duration::from_secs(30),
            max_ids_per_query: None,
        }
    }
}

impl DownloaderConfig {
    fn validate(&self) -> Result<()> {
        if self.status_refresh_interval < Duration::from_millis(100) {
            return Err(Error::Config(
                "Download status refresh interval must be at least 100ms".to_string(),
            ));
        }
        if self.callback_timeout.is_zero() || self.callback_timeout > HOUR {
            return Err(Error::Config(
                "Engine callback timeout must be between 0 and 1 hour".to_string(),
            ));
        }
        if self.max_ids_per_query == Some(0) {
            return Err(Error::Config(
                "max_ids_per_query must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// The host bridges needed by the downloader.
#[derive(Clone)]
pub struct DownloadBridges {
    pub engine: Arc<dyn DownloadEngine>,
    pub permissions: Arc<dyn UriPermissions>,
    pub documents: Arc<dyn DocumentTree>,
}

/// Core configuration.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database file
    pub database_path: PathBuf,

    /// Base URL of the remote API, without trailing slash
    pub api_base_url: String,

    pub http_client: Arc<dyn HttpClient>,

    /// Key/value store for staleness records and preferences
    pub settings_store: Arc<dyn SettingsStore>,

    pub clock: Arc<dyn Clock>,

    /// Present only when the host can download
    pub download_bridges: Option<DownloadBridges>,

    pub staleness: StalenessConfig,

    pub downloader: DownloaderConfig,

    /// Capacity of the observability event bus
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("api_base_url", &self.api_base_url)
            .field("http_client", &"HttpClient { ... }")
            .field("settings_store", &"SettingsStore { ... }")
            .field("clock", &"Clock { ... }")
            .field(
                "download_bridges",
                &self
                    .download_bridges
                    .as_ref()
                    .map(|_| "DownloadBridges { ... }"),
            )
            .field("staleness", &self.staleness)
            .field("downloader", &self.downloader)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// Checks that paths and URLs are non-empty and that the tuning values are
    /// within sane bounds.
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://"))
        {
            return Err(Error::Config(format!(
                "API base URL must be http(s), got '{}'",
                self.api_base_url
            )));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        self.staleness.validate()?;
        self.downloader.validate()
    }

    pub fn has_downloader(&self) -> bool {
        self.download_bridges.is_some()
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required to reach the remote API. \
                 Desktop: enable the 'desktop-shims' feature to use the default ReqwestHttpClient. \
                 Mobile: inject the platform HTTP stack."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn settings_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SettingsStore".to_string(),
        message: "SettingsStore implementation is required for staleness records and preferences. \
                 Desktop: enable the 'desktop-shims' feature to use the default SqliteSettingsStore. \
                 Mobile: inject platform-native settings (UserDefaults/DataStore)."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    let client = bridge_desktop::ReqwestHttpClient::new()?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_settings_store(database_path: &Path) -> Result<Arc<dyn SettingsStore>> {
    use bridge_desktop::SqliteSettingsStore;
    use std::thread;
    use tokio::runtime::{Builder, Handle};

    let candidate = match database_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join("settings.db"),
        _ => SqliteSettingsStore::default_path()?,
    };

    // sqlx needs a reactor; build a private one when called outside tokio
    let init_store = |path: PathBuf| -> Result<SqliteSettingsStore> {
        let runtime = Builder::new_current_thread().enable_all().build().map_err(|e| {
            Error::Config(format!(
                "Failed to create runtime for default settings store: {}",
                e
            ))
        })?;
        Ok(runtime.block_on(SqliteSettingsStore::new(path))?)
    };

    let store = match Handle::try_current() {
        Ok(_) => thread::spawn(move || init_store(candidate))
            .join()
            .map_err(|_| {
                Error::Config("Thread creating the default SettingsStore panicked".to_string())
            })??,
        Err(_) => init_store(candidate)?,
    };

    Ok(Arc::new(store))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_settings_store(_database_path: &Path) -> Result<Arc<dyn SettingsStore>> {
    Err(settings_store_missing_error())
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    api_base_url: Option<String>,
    http_client: Option<Arc<dyn HttpClient>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    clock: Option<Arc<dyn Clock>>,
    download_engine: Option<Arc<dyn DownloadEngine>>,
    uri_permissions: Option<Arc<dyn UriPermissions>>,
    document_tree: Option<Arc<dyn DocumentTree>>,
    staleness: Option<StalenessConfig>,
    downloader: Option<DownloaderConfig>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the database path.
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder().database_path("/path/to/datmusic.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the remote API base URL. Default: [`DEFAULT_API_BASE_URL`].
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the reqwest-based client is used when the
    /// `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the settings store implementation.
    ///
    /// If not provided and `desktop-shims` is enabled, a SQLite store is
    /// created next to the database file.
    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn download_engine(mut self, engine: Arc<dyn DownloadEngine>) -> Self {
        self.download_engine = Some(engine);
        self
    }

    pub fn uri_permissions(mut self, permissions: Arc<dyn UriPermissions>) -> Self {
        self.uri_permissions = Some(permissions);
        self
    }

    pub fn document_tree(mut self, documents: Arc<dyn DocumentTree>) -> Self {
        self.document_tree = Some(documents);
        self
    }

    pub fn staleness(mut self, staleness: StalenessConfig) -> Self {
        self.staleness = Some(staleness);
        self
    }

    pub fn downloader(mut self, downloader: DownloaderConfig) -> Self {
        self.downloader = Some(downloader);
        self
    }

    /// Default: 256
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the final `CoreConfig`.
    ///
    /// # Errors
    ///
    /// - `Error::Config` when the database path is missing, the download
    ///   bridges are only partially provided, or a value is out of range
    /// - `Error::CapabilityMissing` when a required bridge is absent and no
    ///   desktop default is available
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let download_bridges = match (
            self.download_engine,
            self.uri_permissions,
            self.document_tree,
        ) {
            (Some(engine), Some(permissions), Some(documents)) => Some(DownloadBridges {
                engine,
                permissions,
                documents,
            }),
            (None, None, None) => None,
            _ => {
                return Err(Error::Config(
                    "DownloadEngine, UriPermissions and DocumentTree must be provided together"
                        .to_string(),
                ))
            }
        };

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let settings_store = match self.settings_store {
            Some(store) => store,
            None => provide_default_settings_store(&database_path)?,
        };

        let config = CoreConfig {
            database_path,
            api_base_url: self
                .api_base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            http_client,
            settings_store,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            download_bridges,
            staleness: self.staleness.unwrap_or_default(),
            downloader: self.downloader.unwrap_or_default(),
            event_buffer_size: self.event_buffer_size.unwrap_or(256),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::download::{
        Callback, EngineAction, EngineDownload, EngineError, EngineId, EngineQuery, EngineRequest,
    };
    use bridge_traits::{BridgeError, HttpRequest, HttpResponse, UriPermission};

    type BridgeResult<T> = std::result::Result<T, BridgeError>;

    struct StubHttpClient;

    #[async_trait]
    impl HttpClient for StubHttpClient {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            Ok(HttpResponse::new(200, Vec::new()))
        }
    }

    struct StubSettingsStore;

    #[async_trait]
    impl SettingsStore for StubSettingsStore {
        async fn set_string(&self, _key: &str, _value: &str) -> BridgeResult<()> {
            Ok(())
        }

        async fn get_string(&self, _key: &str) -> BridgeResult<Option<String>> {
            Ok(None)
        }

        async fn set_i64(&self, _key: &str, _value: i64) -> BridgeResult<()> {
            Ok(())
        }

        async fn get_i64(&self, _key: &str) -> BridgeResult<Option<i64>> {
            Ok(None)
        }

        async fn delete(&self, _key: &str) -> BridgeResult<()> {
            Ok(())
        }

        async fn list_keys(&self) -> BridgeResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    struct StubEngine;

    impl DownloadEngine for StubEngine {
        fn enqueue(
            &self,
            request: EngineRequest,
            on_enqueued: Callback<EngineRequest>,
            _on_error: Callback<EngineError>,
        ) {
            on_enqueued(request.with_id(1));
        }

        fn query(&self, _query: EngineQuery, callback: Callback<Vec<EngineDownload>>) {
            callback(Vec::new());
        }

        fn apply(
            &self,
            _action: EngineAction,
            _ids: Vec<EngineId>,
            callback: Callback<std::result::Result<(), EngineError>>,
        ) {
            callback(Ok(()));
        }
    }

    struct StubPermissions;

    #[async_trait]
    impl UriPermissions for StubPermissions {
        async fn take_persistable(&self, _uri: &str) -> BridgeResult<()> {
            Ok(())
        }

        async fn release_persistable(&self, _uri: &str) -> BridgeResult<()> {
            Ok(())
        }

        async fn persisted(&self) -> BridgeResult<Vec<UriPermission>> {
            Ok(Vec::new())
        }
    }

    struct StubDocuments;

    #[async_trait]
    impl DocumentTree for StubDocuments {
        async fn exists(&self, _uri: &str) -> BridgeResult<bool> {
            Ok(true)
        }

        async fn create_document(
            &self,
            parent_uri: &str,
            _directories: &[String],
            display_name: &str,
            _mime_type: &str,
        ) -> BridgeResult<String> {
            Ok(format!("{}/{}", parent_uri, display_name))
        }
    }

    fn base_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .database_path("/tmp/datmusic.db")
            .http_client(Arc::new(StubHttpClient))
            .settings_store(Arc::new(StubSettingsStore))
    }

    #[test]
    fn test_builder_with_required_fields() {
        let config = base_builder().build().unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/datmusic.db"));
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.staleness, StalenessConfig::default());
        assert_eq!(
            config.downloader.status_refresh_interval,
            Duration::from_millis(1500)
        );
        assert_eq!(config.event_buffer_size, 256);
        assert!(!config.has_downloader());
    }

    #[test]
    fn test_builder_requires_database_path() {
        let result = CoreConfig::builder()
            .http_client(Arc::new(StubHttpClient))
            .settings_store(Arc::new(StubSettingsStore))
            .build();

        match result {
            Err(Error::Config(msg)) => assert!(msg.contains("Database path")),
            other => panic!("expected config error, got {:?}", other.map(|_| ())),
        }
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_settings_store() {
        let result = CoreConfig::builder()
            .database_path("/tmp/datmusic.db")
            .http_client(Arc::new(StubHttpClient))
            .build();

        assert!(matches!(
            result,
            Err(Error::CapabilityMissing { ref capability, .. }) if capability == "SettingsStore"
        ));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_http_client() {
        let result = CoreConfig::builder()
            .database_path("/tmp/datmusic.db")
            .settings_store(Arc::new(StubSettingsStore))
            .build();

        assert!(matches!(
            result,
            Err(Error::CapabilityMissing { ref capability, .. }) if capability == "HttpClient"
        ));
    }

    #[test]
    fn test_download_bridges_all_or_nothing() {
        let partial = base_builder()
            .download_engine(Arc::new(StubEngine))
            .build();
        assert!(matches!(partial, Err(Error::Config(_))));

        let full = base_builder()
            .download_engine(Arc::new(StubEngine))
            .uri_permissions(Arc::new(StubPermissions))
            .document_tree(Arc::new(StubDocuments))
            .build()
            .unwrap();
        assert!(full.has_downloader());
    }

    #[test]
    fn test_api_base_url_trailing_slash_trimmed() {
        let config = base_builder()
            .api_base_url("https://api.example.com/")
            .build()
            .unwrap();
        assert_eq!(config.api_base_url, "https://api.example.com");
    }

    #[test]
    fn test_validate_rejects_non_http_base_url() {
        let result = base_builder().api_base_url("ftp://example.com").build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let staleness = StalenessConfig {
            album_details: Duration::ZERO,
            ..StalenessConfig::default()
        };
        let result = base_builder().staleness(staleness).build();

        match result {
            Err(Error::Config(msg)) => assert!(msg.contains("album_details")),
            other => panic!("expected config error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_validate_rejects_tight_poll_interval() {
        let downloader = DownloaderConfig {
            status_refresh_interval: Duration::from_millis(10),
            ..DownloaderConfig::default()
        };
        assert!(base_builder().downloader(downloader).build().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let downloader = DownloaderConfig {
            max_ids_per_query: Some(0),
            ..DownloaderConfig::default()
        };
        assert!(base_builder().downloader(downloader).build().is_err());
    }

    #[test]
    fn test_staleness_defaults() {
        let staleness = StalenessConfig::default();
        assert_eq!(staleness.audios_search, DAY);
        assert_eq!(staleness.artists_search, DAY * 7);
        assert_eq!(staleness.albums_search, DAY * 7);
        assert_eq!(staleness.artist_details, DAY);

        let uniform = StalenessConfig::uniform(HOUR);
        assert_eq!(uniform.albums_search, HOUR);
    }

    #[test]
    fn test_debug_hides_bridges() {
        let config = base_builder().build().unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("HttpClient { ... }"));
        assert!(debug.contains("datmusic.db"));
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_build_with_desktop_settings_default() {
        let base = std::env::temp_dir().join(format!(
            "core-runtime-config-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&base).unwrap();

        let config = CoreConfig::builder()
            .database_path(base.join("datmusic.db"))
            .http_client(Arc::new(StubHttpClient))
            .build()
            .expect("desktop default settings store");

        let settings = config.settings_store.clone();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            settings.set_string("downloads_location", "file:///music").await.unwrap();
            let value = settings.get_string("downloads_location").await.unwrap();
            assert_eq!(value.as_deref(), Some("file:///music"));
        });

        drop(config);
        let _ = std::fs::remove_dir_all(&base);
    }
}
