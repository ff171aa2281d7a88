//! # Core Downloader
//!
//! Offline downloads on top of a host download engine.
//!
//! ## Overview
//!
//! - [`DownloadRequestRepository`] - durable ledger of requested downloads
//! - [`DownloadManager`] - awaitable adapter over the callback-based engine
//! - [`ObserveDownloads`] - ledger rows joined with polled engine state
//! - [`DownloadsLocation`] - persisted destination and its permission grant
//! - [`Downloader`] - enqueue flow and batch actions used by the UI
//!
//! The ledger and the engine are reconciled lazily: a stale row is only
//! cleaned up when the same entity is enqueued again, and rows the engine no
//! longer knows are hidden from observers.

mod bridge;

pub mod downloader;
pub mod error;
pub mod events;
pub mod grouping;
pub mod location;
pub mod manager;
pub mod models;
pub mod observer;
pub mod repository;
pub mod sort;

pub use downloader::{download_url, Downloader};
pub use error::{DownloaderError, Result};
pub use events::{DownloaderEvent, DownloaderEvents, DownloaderMessage};
pub use grouping::{AudioDestination, DownloadsSongsGrouping};
pub use location::DownloadsLocation;
pub use manager::{DownloadEnqueueResult, DownloadManager};
pub use models::{
    AudioDownloadItem, DownloadInfo, DownloadItem, DownloadItems, DownloadRequest,
    DownloadRequestType,
};
pub use observer::{
    DownloadStatusFilter, DownloadStatusPoller, ObserveDownloads, ObserveDownloadsParams,
};
pub use repository::{DownloadRequestRepository, SqliteDownloadRequestRepository};
pub use sort::{DownloadSortKey, DownloadSortOption};
