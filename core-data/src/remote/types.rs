//! Wire types of the search API

use crate::models::{Album, Artist, Audio};
use serde::Deserialize;

/// `{status, error?, data}` envelope wrapping every response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiResponse {
    pub status: String,
    pub error: Option<ApiError>,
    pub data: ApiData,
}

impl ApiResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApiError {
    pub id: String,
    pub message: Option<String>,
    pub code: Option<i32>,
    pub captcha_id: Option<i64>,
    #[serde(rename = "captcha_img")]
    pub captcha_image_url: Option<String>,
    pub captcha_index: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiData {
    pub audios: Vec<Audio>,
    pub minerva: Vec<Audio>,
    pub flacs: Vec<Audio>,
    pub artists: Vec<Artist>,
    pub albums: Vec<Album>,
    pub artist: Option<Artist>,
    pub album: Option<Album>,
}

impl ApiData {
    /// Audios of every audio backend, regular results first.
    pub fn all_audios(&self) -> Vec<Audio> {
        self.audios
            .iter()
            .chain(&self.minerva)
            .chain(&self.flacs)
            .cloned()
            .collect()
    }
}
