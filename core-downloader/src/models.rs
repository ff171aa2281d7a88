//! Download ledger rows and the items derived from them

use crate::error::{DownloaderError, Result};
use bridge_traits::download::{EngineDownload, EngineId, EngineStatus};
use core_data::models::Audio;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DownloadRequestType {
    Audio,
    Playlist,
}

impl DownloadRequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadRequestType::Audio => "Audio",
            DownloadRequestType::Playlist => "Playlist",
        }
    }
}

impl fmt::Display for DownloadRequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadRequestType {
    type Err = DownloaderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Audio" => Ok(DownloadRequestType::Audio),
            "Playlist" => Ok(DownloadRequestType::Playlist),
            other => Err(DownloaderError::CorruptRequest {
                id: String::new(),
                message: format!("unknown entity type '{}'", other),
            }),
        }
    }
}

/// One ledger row: the entity to download and the engine id once enqueued.
///
/// The entity id is the primary key, so there is at most one request per
/// entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub id: String,
    pub entity_type: DownloadRequestType,
    /// The entity serialized as JSON
    pub entity_json: String,
    /// Engine id, `None` until the engine accepted the request
    pub request_id: Option<EngineId>,
    /// Epoch milliseconds
    pub created_at: i64,
}

impl DownloadRequest {
    pub fn from_audio(audio: &Audio, created_at: i64) -> Result<Self> {
        let entity_json = serde_json::to_string(audio).map_err(|e| DownloaderError::CorruptRequest {
            id: audio.id.clone(),
            message: e.to_string(),
        })?;
        Ok(Self {
            id: audio.id.clone(),
            entity_type: DownloadRequestType::Audio,
            entity_json,
            request_id: None,
            created_at,
        })
    }

    pub fn with_request_id(mut self, request_id: EngineId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Decodes the stored audio. Fails for non-audio requests.
    pub fn audio(&self) -> Result<Audio> {
        if self.entity_type != DownloadRequestType::Audio {
            return Err(DownloaderError::CorruptRequest {
                id: self.id.clone(),
                message: format!("expected an audio request, found {}", self.entity_type),
            });
        }
        serde_json::from_str(&self.entity_json).map_err(|e| DownloaderError::CorruptRequest {
            id: self.id.clone(),
            message: e.to_string(),
        })
    }
}

/// Live engine state of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadInfo {
    /// The request has no engine id yet
    NotRequested,
    Engine(EngineDownload),
}

impl DownloadInfo {
    pub fn id(&self) -> Option<EngineId> {
        match self {
            DownloadInfo::NotRequested => None,
            DownloadInfo::Engine(download) => Some(download.id),
        }
    }

    pub fn status(&self) -> Option<EngineStatus> {
        match self {
            DownloadInfo::NotRequested => None,
            DownloadInfo::Engine(download) => Some(download.status),
        }
    }

    /// Expected size in bytes, -1 when unknown.
    pub fn total(&self) -> i64 {
        match self {
            DownloadInfo::NotRequested => -1,
            DownloadInfo::Engine(download) => download.total,
        }
    }

    pub fn progress(&self) -> i32 {
        match self {
            DownloadInfo::NotRequested => -1,
            DownloadInfo::Engine(download) => download.progress(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDownloadItem {
    pub request: DownloadRequest,
    pub audio: Audio,
    pub info: DownloadInfo,
}

impl AudioDownloadItem {
    pub fn from_request(request: DownloadRequest, info: DownloadInfo) -> Result<Self> {
        let audio = request.audio()?;
        Ok(Self {
            request,
            audio,
            info,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadItem {
    Audio(AudioDownloadItem),
}

impl DownloadItem {
    pub fn request(&self) -> &DownloadRequest {
        match self {
            DownloadItem::Audio(item) => &item.request,
        }
    }

    pub fn info(&self) -> &DownloadInfo {
        match self {
            DownloadItem::Audio(item) => &item.info,
        }
    }
}

impl From<AudioDownloadItem> for DownloadItem {
    fn from(item: AudioDownloadItem) -> Self {
        DownloadItem::Audio(item)
    }
}

/// Snapshot emitted by the downloads observer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadItems {
    pub audios: Vec<AudioDownloadItem>,
}

impl DownloadItems {
    pub fn is_empty(&self) -> bool {
        self.audios.is_empty()
    }

    pub fn len(&self) -> usize {
        self.audios.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio() -> Audio {
        Audio {
            id: "a1".to_string(),
            artist: "Daft Punk".to_string(),
            title: "Voyager".to_string(),
            duration: 227,
            ..Audio::default()
        }
    }

    #[test]
    fn test_request_keeps_audio() {
        let request = DownloadRequest::from_audio(&audio(), 1_000).unwrap();

        assert_eq!(request.id, "a1");
        assert_eq!(request.entity_type, DownloadRequestType::Audio);
        assert_eq!(request.request_id, None);

        let decoded = request.audio().unwrap();
        assert_eq!(decoded.title, "Voyager");
        assert_eq!(decoded.duration, 227);
    }

    #[test]
    fn test_playlist_request_is_not_an_audio() {
        let mut request = DownloadRequest::from_audio(&audio(), 0).unwrap();
        request.entity_type = DownloadRequestType::Playlist;
        assert!(matches!(
            request.audio(),
            Err(DownloaderError::CorruptRequest { .. })
        ));
    }

    #[test]
    fn test_entity_type_parsing() {
        assert_eq!("Playlist".parse::<DownloadRequestType>().unwrap(), DownloadRequestType::Playlist);
        assert!("track".parse::<DownloadRequestType>().is_err());
    }

    #[test]
    fn test_not_requested_info() {
        let info = DownloadInfo::NotRequested;
        assert_eq!(info.id(), None);
        assert_eq!(info.status(), None);
        assert_eq!(info.total(), -1);
    }
}
