use bridge_traits::download::EngineError;
use bridge_traits::error::BridgeError;
use core_data::DataError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloaderError {
    #[error("Downloads location {uri} has no read/write permission")]
    Permission { uri: String },

    #[error("Downloads location is not set")]
    LocationUnset,

    #[error("Engine rejected the download: {0}")]
    EngineEnqueue(EngineError),

    #[error("Engine action failed: {0}")]
    Engine(#[from] EngineError),

    #[error("No downloads match the current filters")]
    NoResultsForFilter,

    #[error("Polling download statuses failed: {0}")]
    StatusPoll(String),

    #[error("Engine callback for {operation} did not fire within {timeout:?}")]
    CallbackTimeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Engine dropped the callback for {operation} without calling it")]
    CallbackDropped { operation: &'static str },

    #[error("Audio {id} has no download URL")]
    InvalidUrl { id: String },

    #[error("Corrupt download request {id}: {message}")]
    CorruptRequest { id: String, message: String },

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

impl From<sqlx::Error> for DownloaderError {
    fn from(error: sqlx::Error) -> Self {
        DownloaderError::Data(DataError::from(error))
    }
}

impl DownloaderError {
    /// Errors that mean the engine broke its callback contract.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            DownloaderError::CallbackTimeout { .. } | DownloaderError::CallbackDropped { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DownloaderError>;
