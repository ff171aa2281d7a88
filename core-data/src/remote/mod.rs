//! Remote search API
//!
//! Responses share one envelope; a non-`ok` status is mapped to
//! [`DataError::Upstream`](crate::DataError::Upstream), or to
//! [`DataError::CaptchaRequired`](crate::DataError::CaptchaRequired) when the
//! upstream asks for a captcha.

mod api;
pub mod types;

pub use api::DatmusicApi;
pub use types::{ApiData, ApiError, ApiResponse};
