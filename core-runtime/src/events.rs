//! # Event Bus System
//!
//! Observability events for the data core, published over
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: [`CoreEvent`] wraps the cache and download domains
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ```text
//! ┌─────────────┐     emit      ┌───────────┐
//! │   Stores    ├──────────────>│           │     subscribe    ┌────────────┐
//! └─────────────┘               │ EventBus  ├─────────────────>│ Subscriber │
//! ┌─────────────┐     emit      │           │                  └────────────┘
//! │ Downloader  ├──────────────>│           │
//! └─────────────┘               └───────────┘
//! ```
//!
//! These events are for diagnostics and host telemetry. User-facing
//! downloader prompts (choose a location, permission lost, already queued)
//! travel on the downloader's own single-slot channel instead.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(16);
//! let mut subscriber = bus.subscribe();
//!
//! bus.emit(CoreEvent::Cache(CacheEvent::Fetched {
//!     store: "search_audios".to_string(),
//!     key: "query=abc#page=0".to_string(),
//!     items: 20,
//! }))
//! .ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event.description(), "Remote page cached");
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, SendError},
};

pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that can't keep up receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Cache-aside store activity
    Cache(CacheEvent),
    /// Download ledger and engine activity
    Download(DownloadEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Cache(e) => e.description(),
            CoreEvent::Download(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Cache(CacheEvent::FetchFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Download(DownloadEvent::EnqueueFailed { .. }) => EventSeverity::Error,
            CoreEvent::Download(DownloadEvent::PermissionLost { .. }) => EventSeverity::Warning,
            CoreEvent::Download(DownloadEvent::Enqueued { .. }) => EventSeverity::Info,
            CoreEvent::Download(DownloadEvent::LocationChanged { .. }) => EventSeverity::Info,
            CoreEvent::Cache(CacheEvent::Reset { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Cache Events
// ============================================================================

/// Events emitted by the cache-aside stores and the paging coordinator.
///
/// `key` is the page-scoped fingerprint, e.g. `query=abc#page=1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// A remote fetch completed and its rows were committed.
    Fetched {
        store: String,
        key: String,
        items: usize,
    },
    /// A remote fetch failed; local rows were left untouched.
    FetchFailed {
        store: String,
        key: String,
        message: String,
    },
    /// A second caller joined an in-flight fetch instead of issuing its own.
    Coalesced { store: String, key: String },
    /// Pagination for a fingerprint reached its end.
    PaginationExhausted { key: String },
    /// One key was cleared.
    Cleared { store: String, key: String },
    /// Every row and staleness record of a store was wiped.
    Reset { store: String },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::Fetched { .. } => "Remote page cached",
            CacheEvent::FetchFailed { .. } => "Remote fetch failed",
            CacheEvent::Coalesced { .. } => "Joined in-flight fetch",
            CacheEvent::PaginationExhausted { .. } => "Pagination exhausted",
            CacheEvent::Cleared { .. } => "Cache key cleared",
            CacheEvent::Reset { .. } => "Cache reset",
        }
    }
}

// ============================================================================
// Download Events
// ============================================================================

/// Events emitted by the downloader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DownloadEvent {
    /// The engine accepted a request and the ledger row was written.
    Enqueued { entity_id: String, request_id: i32 },
    /// The engine rejected a request.
    EnqueueFailed { entity_id: String, message: String },
    /// A batch action was forwarded to the engine.
    ActionApplied { action: String, count: usize },
    /// Ledger rows were removed.
    RequestsRemoved { count: usize },
    /// The downloads location was set (`Some`) or reset (`None`).
    LocationChanged { uri: Option<String> },
    /// The stored location's read/write grant is gone.
    PermissionLost { uri: String },
}

impl DownloadEvent {
    fn description(&self) -> &str {
        match self {
            DownloadEvent::Enqueued { .. } => "Download enqueued",
            DownloadEvent::EnqueueFailed { .. } => "Download enqueue failed",
            DownloadEvent::ActionApplied { .. } => "Download action applied",
            DownloadEvent::RequestsRemoved { .. } => "Download requests removed",
            DownloadEvent::LocationChanged { .. } => "Downloads location changed",
            DownloadEvent::PermissionLost { .. } => "Downloads location permission lost",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus.
///
/// Cloning is cheap; every clone publishes to the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus that buffers `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// when nobody is listening. Publishers normally ignore that error.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let downloads_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Download(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive. `None` when nothing matching is buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetched(key: &str) -> CoreEvent {
        CoreEvent::Cache(CacheEvent::Fetched {
            store: "search_audios".to_string(),
            key: key.to_string(),
            items: 20,
        })
    }

    fn enqueued(entity_id: &str) -> CoreEvent {
        CoreEvent::Download(DownloadEvent::Enqueued {
            entity_id: entity_id.to_string(),
            request_id: 7,
        })
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_fails() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.emit(fetched("query=abc#page=0")).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        assert_eq!(bus.emit(enqueued("1_2")).unwrap(), 2);
        assert_eq!(first.recv().await.unwrap(), enqueued("1_2"));
        assert_eq!(second.recv().await.unwrap(), enqueued("1_2"));
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Download(_)));

        bus.emit(fetched("query=abc#page=0")).unwrap();
        bus.emit(enqueued("1_2")).unwrap();

        assert_eq!(stream.recv().await.unwrap(), enqueued("1_2"));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut receiver = bus.subscribe();

        for page in 0..5 {
            bus.emit(fetched(&format!("query=abc#page={}", page))).unwrap();
        }

        assert!(matches!(receiver.recv().await, Err(RecvError::Lagged(3))));
    }

    #[test]
    fn test_event_severity() {
        let failed = CoreEvent::Download(DownloadEvent::EnqueueFailed {
            entity_id: "1_2".to_string(),
            message: "disk full".to_string(),
        });
        assert_eq!(failed.severity(), EventSeverity::Error);
        assert_eq!(enqueued("1_2").severity(), EventSeverity::Info);
        assert_eq!(fetched("k").severity(), EventSeverity::Debug);
        assert!(EventSeverity::Warning < EventSeverity::Error);
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(enqueued("1_2")).unwrap();
        assert_eq!(json["type"], "Download");
        assert_eq!(json["payload"]["event"], "Enqueued");
        assert_eq!(json["payload"]["request_id"], 7);

        let back: CoreEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, enqueued("1_2"));
    }
}
