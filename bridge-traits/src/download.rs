//! Download Engine Abstraction
//!
//! The engine performs the byte transfer and owns transfer state. It has a
//! callback-based API and no push notifications the core relies on; the core
//! wraps it into awaitable operations and polls it for status.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine-assigned download identifier
pub type EngineId = i32;

/// One-shot completion callback handed to the engine.
pub type Callback<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// Transfer status reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Queued,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl EngineStatus {
    pub const ALL: [EngineStatus; 6] = [
        EngineStatus::Queued,
        EngineStatus::Downloading,
        EngineStatus::Paused,
        EngineStatus::Completed,
        EngineStatus::Failed,
        EngineStatus::Cancelled,
    ];

    pub fn is_retriable(&self) -> bool {
        matches!(self, EngineStatus::Failed | EngineStatus::Cancelled)
    }

    pub fn is_resumable(&self) -> bool {
        matches!(self, EngineStatus::Paused)
    }

    pub fn is_pausable(&self) -> bool {
        matches!(self, EngineStatus::Queued | EngineStatus::Downloading)
    }

    pub fn is_cancelable(&self) -> bool {
        matches!(
            self,
            EngineStatus::Queued | EngineStatus::Downloading | EngineStatus::Paused
        )
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, EngineStatus::Completed)
    }

    pub fn is_incomplete(&self) -> bool {
        self.is_retriable()
    }
}

/// A transfer request: where to fetch from and which document to write into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineRequest {
    /// Set by the engine once the request is accepted
    pub id: Option<EngineId>,
    pub url: String,
    /// Destination document handle (URI)
    pub file: String,
}

impl EngineRequest {
    pub fn new(url: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            id: None,
            url: url.into(),
            file: file.into(),
        }
    }

    pub fn with_id(mut self, id: EngineId) -> Self {
        self.id = Some(id);
        self
    }
}

/// Snapshot of one transfer as known by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineDownload {
    pub id: EngineId,
    pub url: String,
    pub file: String,
    pub status: EngineStatus,
    /// Bytes written so far
    pub downloaded: i64,
    /// Expected size in bytes, -1 when unknown
    pub total: i64,
    pub eta_millis: i64,
    pub bytes_per_second: i64,
    pub error: Option<String>,
    /// Creation time in epoch milliseconds
    pub created: i64,
}

impl EngineDownload {
    /// Progress in percent, or -1 when the total size is unknown.
    pub fn progress(&self) -> i32 {
        if self.total <= 0 {
            return -1;
        }
        ((self.downloaded.max(0) * 100) / self.total).min(100) as i32
    }
}

/// Engine-side failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("download engine error ({code}): {message}")]
pub struct EngineError {
    pub code: String,
    pub message: String,
}

impl EngineError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Control operations applied to a set of downloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineAction {
    Pause,
    Resume,
    Cancel,
    Retry,
    /// Forget the download but keep the written file
    Remove,
    /// Forget the download and delete the written file
    Delete,
}

impl EngineAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineAction::Pause => "pause",
            EngineAction::Resume => "resume",
            EngineAction::Cancel => "cancel",
            EngineAction::Retry => "retry",
            EngineAction::Remove => "remove",
            EngineAction::Delete => "delete",
        }
    }
}

/// Status queries the engine can answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineQuery {
    All,
    ById(EngineId),
    ByIds(Vec<EngineId>),
    ByStatuses(Vec<EngineStatus>),
}

/// External download engine
///
/// Every method returns immediately and reports through its callback, possibly
/// from another thread. Implementations are expected to invoke exactly one
/// callback exactly once per call; the core defends against violations.
///
/// `ByIds` queries larger than [`max_ids_per_query`](Self::max_ids_per_query)
/// may be rejected or truncated by the engine, so callers chunk them.
pub trait DownloadEngine: Send + Sync {
    /// Accept a transfer. `on_enqueued` receives the request with its id set.
    fn enqueue(
        &self,
        request: EngineRequest,
        on_enqueued: Callback<EngineRequest>,
        on_error: Callback<EngineError>,
    );

    /// Answer a status query. Unknown ids are simply absent from the result.
    fn query(&self, query: EngineQuery, callback: Callback<Vec<EngineDownload>>);

    /// Apply a control action to the given ids.
    fn apply(
        &self,
        action: EngineAction,
        ids: Vec<EngineId>,
        callback: Callback<std::result::Result<(), EngineError>>,
    );

    /// Maximum number of ids accepted by a single `ByIds` query
    fn max_ids_per_query(&self) -> usize {
        999
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_predicates() {
        assert!(EngineStatus::Failed.is_retriable());
        assert!(EngineStatus::Cancelled.is_retriable());
        assert!(!EngineStatus::Paused.is_retriable());

        assert!(EngineStatus::Paused.is_resumable());
        assert!(EngineStatus::Queued.is_pausable());
        assert!(EngineStatus::Downloading.is_pausable());
        assert!(!EngineStatus::Completed.is_pausable());

        assert!(EngineStatus::Paused.is_cancelable());
        assert!(!EngineStatus::Failed.is_cancelable());
        assert!(EngineStatus::Completed.is_complete());
        assert!(EngineStatus::Cancelled.is_incomplete());
    }

    #[test]
    fn test_progress() {
        let mut download = EngineDownload {
            id: 1,
            url: "https://example.com/a.mp3".to_string(),
            file: "file:///music/a.mp3".to_string(),
            status: EngineStatus::Downloading,
            downloaded: 50,
            total: 200,
            eta_millis: 0,
            bytes_per_second: 0,
            error: None,
            created: 0,
        };
        assert_eq!(download.progress(), 25);

        download.total = -1;
        assert_eq!(download.progress(), -1);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&EngineStatus::Downloading).unwrap();
        assert_eq!(json, "\"downloading\"");
    }
}
