//! # Downloads Observer
//!
//! Joins the download ledger with live engine state. The engine has no push
//! notifications, so a single [`DownloadStatusPoller`] queries it on a fixed
//! interval and multicasts each snapshot through a `watch` channel. The loop
//! starts with the first subscriber and stops once the last one is dropped.
//!
//! [`ObserveDownloads::observe`] re-emits whenever the ledger changes or a
//! new snapshot arrives, skipping emissions equal to the previous one.

use crate::error::{DownloaderError, Result};
use crate::manager::DownloadManager;
use crate::models::{
    AudioDownloadItem, DownloadInfo, DownloadItems, DownloadRequest, DownloadRequestType,
};
use crate::repository::DownloadRequestRepository;
use crate::sort::DownloadSortOption;
use bridge_traits::download::{EngineDownload, EngineId, EngineStatus};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Outcome of the latest engine poll.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusSnapshot {
    /// No poll has completed yet
    Pending,
    Ready(Arc<Vec<EngineDownload>>),
    /// The last poll failed; the loop keeps polling
    Failed(String),
}

// ============================================================================
// Filters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatusFilter {
    All,
    Queued,
    Downloading,
    Paused,
    Completed,
    /// Failed and cancelled downloads
    Failed,
}

impl DownloadStatusFilter {
    pub fn statuses(&self) -> &'static [EngineStatus] {
        match self {
            DownloadStatusFilter::All => &EngineStatus::ALL,
            DownloadStatusFilter::Queued => &[EngineStatus::Queued],
            DownloadStatusFilter::Downloading => &[EngineStatus::Downloading],
            DownloadStatusFilter::Paused => &[EngineStatus::Paused],
            DownloadStatusFilter::Completed => &[EngineStatus::Completed],
            DownloadStatusFilter::Failed => &[EngineStatus::Failed, EngineStatus::Cancelled],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserveDownloadsParams {
    pub query: String,
    pub sort: Option<DownloadSortOption>,
    pub status_filters: HashSet<DownloadStatusFilter>,
}

impl Default for ObserveDownloadsParams {
    fn default() -> Self {
        Self {
            query: String::new(),
            sort: None,
            status_filters: HashSet::from([DownloadStatusFilter::All]),
        }
    }
}

impl ObserveDownloadsParams {
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_sort(mut self, sort: DownloadSortOption) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_status_filters(
        mut self,
        filters: impl IntoIterator<Item = DownloadStatusFilter>,
    ) -> Self {
        self.status_filters = filters.into_iter().collect();
        self
    }

    pub fn has_query(&self) -> bool {
        !self.query.trim().is_empty()
    }

    /// Anything other than an empty set or `{All}`.
    pub fn has_status_filter(&self) -> bool {
        !self.status_filters.is_empty()
            && !(self.status_filters.len() == 1
                && self.status_filters.contains(&DownloadStatusFilter::All))
    }

    pub fn has_no_filters(&self) -> bool {
        !self.has_query() && !self.has_status_filter()
    }

    /// Engine statuses to keep; empty means any.
    pub fn statuses(&self) -> HashSet<EngineStatus> {
        if !self.has_status_filter() {
            return HashSet::new();
        }
        self.status_filters
            .iter()
            .flat_map(|filter| filter.statuses().iter().copied())
            .collect()
    }
}

// ============================================================================
// Poller
// ============================================================================

/// Process-wide engine status poll loop.
#[derive(Clone)]
pub struct DownloadStatusPoller {
    manager: DownloadManager,
    interval: Duration,
    sender: Arc<Mutex<Option<watch::Sender<StatusSnapshot>>>>,
}

impl DownloadStatusPoller {
    pub fn new(manager: DownloadManager, interval: Duration) -> Self {
        Self {
            manager,
            interval,
            sender: Arc::new(Mutex::new(None)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Subscribes to engine snapshots, starting the loop if it is not running.
    ///
    /// Must be called within a tokio runtime.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        let mut slot = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = slot.as_ref().filter(|sender| !sender.is_closed()) {
            return sender.subscribe();
        }

        let (sender, receiver) = watch::channel(StatusSnapshot::Pending);
        debug!(interval = ?self.interval, "Starting download status poller");
        tokio::spawn(poll_loop(self.manager.clone(), self.interval, sender.clone()));
        *slot = Some(sender);
        receiver
    }

    /// Whether a poll loop currently has subscribers.
    pub fn is_running(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
    }
}

impl std::fmt::Debug for DownloadStatusPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadStatusPoller")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

async fn poll_loop(
    manager: DownloadManager,
    interval: Duration,
    sender: watch::Sender<StatusSnapshot>,
) {
    loop {
        let snapshot = match manager.get_downloads().await {
            Ok(downloads) => StatusSnapshot::Ready(Arc::new(downloads)),
            Err(error) => {
                warn!(%error, "Polling download statuses failed");
                StatusSnapshot::Failed(error.to_string())
            }
        };
        sender.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });

        tokio::select! {
            _ = sender.closed() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    debug!("Download status poller stopped");
}

// ============================================================================
// Observer
// ============================================================================

#[derive(Clone)]
pub struct ObserveDownloads {
    repo: Arc<dyn DownloadRequestRepository>,
    poller: DownloadStatusPoller,
}

#[derive(PartialEq)]
enum Emitted {
    Items(DownloadItems),
    NoResults,
    PollFailed(String),
}

struct ObserveState {
    repo: Arc<dyn DownloadRequestRepository>,
    params: ObserveDownloadsParams,
    changes: watch::Receiver<u64>,
    statuses: watch::Receiver<StatusSnapshot>,
    rows: Option<Vec<DownloadRequest>>,
    last: Option<Emitted>,
    /// Set after a ledger error so the next poll waits for a change first
    failed: bool,
}

impl ObserveDownloads {
    pub fn new(repo: Arc<dyn DownloadRequestRepository>, poller: DownloadStatusPoller) -> Self {
        Self { repo, poller }
    }

    /// Live download items matching `params`.
    ///
    /// An empty result while a query or status filter is active is reported
    /// as [`DownloaderError::NoResultsForFilter`]. A failing engine poll is
    /// reported once as [`DownloaderError::StatusPoll`]. The stream keeps
    /// going after either.
    pub fn observe(&self, params: ObserveDownloadsParams) -> BoxStream<'static, Result<DownloadItems>> {
        let state = ObserveState {
            repo: self.repo.clone(),
            params,
            changes: self.repo.changes(),
            statuses: self.poller.subscribe(),
            rows: None,
            last: None,
            failed: false,
        };
        stream::unfold(state, next_emission).boxed()
    }
}

async fn next_emission(
    mut state: ObserveState,
) -> Option<(Result<DownloadItems>, ObserveState)> {
    if std::mem::take(&mut state.failed) && !wait_for_change(&mut state).await {
        return None;
    }

    loop {
        if state.rows.is_none() {
            let _ = state.changes.borrow_and_update();
            match load_rows(state.repo.as_ref(), &state.params).await {
                Ok(rows) => state.rows = Some(rows),
                Err(error) => {
                    warn!(%error, "Loading download requests failed");
                    state.last = None;
                    state.failed = true;
                    return Some((Err(error), state));
                }
            }
        }

        let snapshot = state.statuses.borrow_and_update().clone();
        let emission = match (snapshot, state.rows.as_deref()) {
            (StatusSnapshot::Ready(snapshot), Some(rows)) => {
                let items = join(rows, &snapshot, &state.params);
                if items.is_empty() && !state.params.has_no_filters() {
                    Some(Emitted::NoResults)
                } else {
                    Some(Emitted::Items(items))
                }
            }
            (StatusSnapshot::Failed(message), Some(_)) => Some(Emitted::PollFailed(message)),
            _ => None,
        };

        if let Some(emission) = emission {
            if state.last.as_ref() != Some(&emission) {
                let result = match &emission {
                    Emitted::Items(items) => Ok(items.clone()),
                    Emitted::NoResults => Err(DownloaderError::NoResultsForFilter),
                    Emitted::PollFailed(message) => {
                        Err(DownloaderError::StatusPoll(message.clone()))
                    }
                };
                state.last = Some(emission);
                return Some((result, state));
            }
        }

        if !wait_for_change(&mut state).await {
            return None;
        }
    }
}

/// Waits for the ledger or the poller. False once either side is gone.
async fn wait_for_change(state: &mut ObserveState) -> bool {
    tokio::select! {
        changed = state.changes.changed() => {
            state.rows = None;
            changed.is_ok()
        }
        changed = state.statuses.changed() => changed.is_ok(),
    }
}

async fn load_rows(
    repo: &dyn DownloadRequestRepository,
    params: &ObserveDownloadsParams,
) -> Result<Vec<DownloadRequest>> {
    let rows = if params.has_query() {
        repo.search(params.query.trim()).await?
    } else {
        repo.entries_by_type(DownloadRequestType::Audio).await?
    };
    Ok(rows
        .into_iter()
        .filter(|row| row.entity_type == DownloadRequestType::Audio)
        .collect())
}

fn join(
    rows: &[DownloadRequest],
    snapshot: &[EngineDownload],
    params: &ObserveDownloadsParams,
) -> DownloadItems {
    let by_id: HashMap<EngineId, &EngineDownload> =
        snapshot.iter().map(|download| (download.id, download)).collect();
    let statuses = params.statuses();

    let mut audios = Vec::with_capacity(rows.len());
    for row in rows {
        let info = match row.request_id {
            Some(request_id) => match by_id.get(&request_id) {
                Some(download) if statuses.is_empty() || statuses.contains(&download.status) => {
                    DownloadInfo::Engine((*download).clone())
                }
                _ => continue,
            },
            None if statuses.is_empty() => DownloadInfo::NotRequested,
            None => continue,
        };

        match AudioDownloadItem::from_request(row.clone(), info) {
            Ok(item) => audios.push(item),
            Err(error) => warn!(id = %row.id, %error, "Skipping unreadable download request"),
        }
    }

    if let Some(sort) = params.sort {
        sort.sort(&mut audios);
    }
    DownloadItems { audios }
}
