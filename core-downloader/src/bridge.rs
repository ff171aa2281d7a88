//! Callback to future bridge
//!
//! Engine calls report through boxed callbacks. [`single_resume`] hands out
//! callbacks that all feed one `oneshot` channel: the first invocation wins,
//! later ones are logged and dropped. The awaiting side is bounded by a
//! timeout so a callback that never fires cannot hang the caller.

use crate::error::{DownloaderError, Result};
use bridge_traits::download::Callback;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::warn;

/// Resuming half. Cheap to clone; every clone shares the same slot.
pub(crate) struct Resumer<T> {
    operation: &'static str,
    slot: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for Resumer<T> {
    fn clone(&self) -> Self {
        Self {
            operation: self.operation,
            slot: self.slot.clone(),
        }
    }
}

/// Awaiting half.
pub(crate) struct Pending<T> {
    operation: &'static str,
    receiver: oneshot::Receiver<T>,
}

pub(crate) fn single_resume<T: Send + 'static>(operation: &'static str) -> (Resumer<T>, Pending<T>) {
    let (sender, receiver) = oneshot::channel();
    (
        Resumer {
            operation,
            slot: Arc::new(Mutex::new(Some(sender))),
        },
        Pending {
            operation,
            receiver,
        },
    )
}

impl<T: Send + 'static> Resumer<T> {
    /// Returns false if this bridge was already resumed.
    pub(crate) fn resume(&self, value: T) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            // The waiter may have timed out already
            Some(sender) => {
                let _ = sender.send(value);
                true
            }
            None => {
                warn!(operation = self.operation, "Engine callback fired more than once, ignoring");
                false
            }
        }
    }

    /// A boxed engine callback that resumes with `map(argument)`.
    pub(crate) fn callback<A, F>(&self, map: F) -> Callback<A>
    where
        A: Send + 'static,
        F: FnOnce(A) -> T + Send + 'static,
    {
        let resumer = self.clone();
        Box::new(move |argument| {
            resumer.resume(map(argument));
        })
    }
}

impl<T> Pending<T> {
    pub(crate) async fn wait(self, timeout: Duration) -> Result<T> {
        match tokio::time::timeout(timeout, self.receiver).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(DownloaderError::CallbackDropped {
                operation: self.operation,
            }),
            Err(_) => {
                warn!(operation = self.operation, ?timeout, "Engine callback timed out");
                Err(DownloaderError::CallbackTimeout {
                    operation: self.operation,
                    timeout,
                })
            }
        }
    }
}
