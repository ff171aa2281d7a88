//! Table change notification
//!
//! Every table has a version counter published on a `watch` channel. Writers
//! bump the counters of the tables they touched after the transaction
//! commits; observers re-run their query on each bump.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::trace;

#[derive(Clone, Default)]
pub struct InvalidationTracker {
    tables: Arc<Mutex<HashMap<String, watch::Sender<u64>>>>,
}

impl InvalidationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_sender<R>(&self, table: &str, f: impl FnOnce(&watch::Sender<u64>) -> R) -> R {
        let mut tables = self
            .tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let sender = tables
            .entry(table.to_string())
            .or_insert_with(|| watch::channel(0).0);
        f(sender)
    }

    /// Bumps the version of each table.
    pub fn notify(&self, tables: &[&str]) {
        for table in tables {
            self.with_sender(table, |sender| {
                sender.send_modify(|version| *version = version.wrapping_add(1));
                trace!(table, version = *sender.borrow(), "Table invalidated");
            });
        }
    }

    /// Receiver for one table. The current version counts as seen.
    pub fn subscribe(&self, table: &str) -> watch::Receiver<u64> {
        self.with_sender(table, |sender| sender.subscribe())
    }

    pub fn version(&self, table: &str) -> u64 {
        self.with_sender(table, |sender| *sender.borrow())
    }
}

impl std::fmt::Debug for InvalidationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationTracker").finish_non_exhaustive()
    }
}
