//! User-facing downloader notifications
//!
//! Delivered over a single-slot `watch` channel: a slow reader only sees the
//! latest event, which is all the UI needs to show a prompt or a notice.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloaderMessage {
    Queued,
    ResumedExisting,
    AlreadyQueued,
    AlreadyCompleted,
    InvalidUrl,
    FileCreateFailed,
    FolderNotFound,
}

impl DownloaderMessage {
    pub fn text(&self) -> &'static str {
        match self {
            DownloaderMessage::Queued => "Download queued",
            DownloaderMessage::ResumedExisting => "Resumed the existing download",
            DownloaderMessage::AlreadyQueued => "Already in the download queue",
            DownloaderMessage::AlreadyCompleted => "Already downloaded",
            DownloaderMessage::InvalidUrl => "This audio can't be downloaded",
            DownloaderMessage::FileCreateFailed => "Couldn't create the download file",
            DownloaderMessage::FolderNotFound => "Downloads folder not found",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DownloaderEvent {
    /// Ask the user to pick a downloads location
    ChooseDownloadsLocation,
    /// The stored location lost its read/write grant
    DownloadsLocationPermissionError { uri: String },
    Message { message: DownloaderMessage },
    /// The engine rejected a request
    FetchError { message: String },
}

#[derive(Clone)]
pub struct DownloaderEvents {
    sender: watch::Sender<Option<DownloaderEvent>>,
}

impl DownloaderEvents {
    pub fn new() -> Self {
        Self {
            sender: watch::channel(None).0,
        }
    }

    /// Replaces the latest event. Works with no subscribers.
    pub fn emit(&self, event: DownloaderEvent) {
        debug!(?event, "Downloader event");
        self.sender.send_replace(Some(event));
    }

    pub fn message(&self, message: DownloaderMessage) {
        self.emit(DownloaderEvent::Message { message });
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<DownloaderEvent>> {
        self.sender.subscribe()
    }

    pub fn latest(&self) -> Option<DownloaderEvent> {
        self.sender.borrow().clone()
    }

    /// Marks the latest event as handled.
    pub fn clear(&self) {
        self.sender.send_replace(None);
    }
}

impl Default for DownloaderEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DownloaderEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloaderEvents")
            .field("latest", &self.latest())
            .finish()
    }
}
