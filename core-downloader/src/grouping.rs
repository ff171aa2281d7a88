//! Where inside the downloads location an audio file goes

use core_data::models::Audio;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DOWNLOADS_SONGS_GROUPING_KEY: &str = "downloads_songs_grouping";

const ILLEGAL_FILENAME_CHARS: [char; 9] = ['|', '/', '\\', '?', '*', '<', '>', '"', ':'];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DownloadsSongsGrouping {
    /// Every file directly in the downloads location
    #[default]
    Flat,
    /// `Artist/Artist - Title.ext`
    ByArtist,
    /// `Artist/Album/Artist - Title.ext`
    ByAlbum,
}

impl DownloadsSongsGrouping {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadsSongsGrouping::Flat => "Flat",
            DownloadsSongsGrouping::ByArtist => "ByArtist",
            DownloadsSongsGrouping::ByAlbum => "ByAlbum",
        }
    }

    /// Unknown or empty values fall back to [`Flat`](Self::Flat).
    pub fn from_setting(value: Option<&str>) -> Self {
        value.and_then(|v| v.parse().ok()).unwrap_or_default()
    }
}

impl fmt::Display for DownloadsSongsGrouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadsSongsGrouping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Flat" => Ok(DownloadsSongsGrouping::Flat),
            "ByArtist" => Ok(DownloadsSongsGrouping::ByArtist),
            "ByAlbum" => Ok(DownloadsSongsGrouping::ByAlbum),
            other => Err(format!("unknown songs grouping '{}'", other)),
        }
    }
}

/// Replaces characters that are not allowed in file names with `_`.
pub fn clean_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if ILLEGAL_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Relative destination of one audio file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDestination {
    pub directories: Vec<String>,
    pub display_name: String,
    pub mime_type: &'static str,
}

impl AudioDestination {
    pub fn for_audio(audio: &Audio, grouping: DownloadsSongsGrouping) -> Self {
        let mut directories = Vec::new();
        if grouping != DownloadsSongsGrouping::Flat {
            directories.push(clean_file_name(&audio.main_artist()));
        }
        if grouping == DownloadsSongsGrouping::ByAlbum {
            // Albumless audios stay in the artist folder
            if let Some(album) = audio.album.as_deref().filter(|a| !a.trim().is_empty()) {
                directories.push(clean_file_name(album));
            }
        }

        Self {
            directories,
            display_name: clean_file_name(&format!(
                "{}{}",
                audio.file_display_name(),
                audio.file_extension()
            )),
            mime_type: audio.file_mime_type(),
        }
    }

    /// Slash-joined relative path, for logs.
    pub fn relative_path(&self) -> String {
        let mut parts = self.directories.clone();
        parts.push(self.display_name.clone());
        parts.join("/")
    }
}
