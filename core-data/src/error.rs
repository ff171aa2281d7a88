use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Errors from the data layer.
///
/// `Clone` so that every caller joined to one coalesced fetch receives the
/// same outcome; library errors are flattened to their messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Upstream error {id} (code {code}): {message}")]
    Upstream {
        id: String,
        code: i32,
        message: String,
    },

    #[error("Captcha required (id {captcha_id}, index {captcha_index})")]
    CaptchaRequired {
        captcha_id: i64,
        captcha_index: i32,
        image_url: String,
    },

    #[error("Empty result for {0}")]
    EmptyResult(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Bridge error: {0}")]
    Bridge(String),

    #[error("Background fetch aborted: {0}")]
    Aborted(String),
}

impl DataError {
    /// True for failures that a manual retry can reasonably fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, DataError::Network(_) | DataError::Aborted(_))
    }
}

impl From<sqlx::Error> for DataError {
    fn from(error: sqlx::Error) -> Self {
        DataError::Database(error.to_string())
    }
}

impl From<BridgeError> for DataError {
    fn from(error: BridgeError) -> Self {
        DataError::Bridge(error.to_string())
    }
}

impl From<serde_json::Error> for DataError {
    fn from(error: serde_json::Error) -> Self {
        DataError::Serialization(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DataError>;
