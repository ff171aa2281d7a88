//! # Host Bridge Traits
//!
//! Capability seams the data core needs from its host.
//!
//! ## Overview
//!
//! The core never talks to the network stack, the preferences store, the
//! download engine or the document provider directly. Each of those is a trait
//! in this crate, implemented per platform (`bridge-desktop` for desktop,
//! native adapters on mobile) and injected through `CoreConfig`.
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP requests against the search API
//!
//! ### Storage
//! - [`SettingsStore`](storage::SettingsStore) - Key-value preferences storage
//!
//! ### Downloads
//! - [`DownloadEngine`](download::DownloadEngine) - Callback-based external download engine
//! - [`UriPermissions`](documents::UriPermissions) - Persistable read/write grants on destinations
//! - [`DocumentTree`](documents::DocumentTree) - Destination document creation
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All async bridge traits return [`BridgeError`](error::BridgeError). The
//! download engine reports its own failures as
//! [`EngineError`](download::EngineError) through its error callbacks.
//!
//! ## Thread Safety
//!
//! Every trait requires `Send + Sync` so implementations can be shared across
//! tokio tasks behind an `Arc`.

pub mod documents;
pub mod download;
pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use documents::{DocumentTree, UriPermission, UriPermissions};
pub use download::{
    Callback, DownloadEngine, EngineAction, EngineDownload, EngineError, EngineId, EngineQuery,
    EngineRequest, EngineStatus,
};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use storage::SettingsStore;
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, SystemClock};
