//! Domain models for cached API entities
//!
//! Each model doubles as its SQLite row (`FromRow`) and as the API payload
//! (`serde`). The positional fields (`params`, `page`, `search_index`,
//! `primary_key`) are local bookkeeping and never part of the payload.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const UNKNOWN_ARTIST: &str = "Unknown artist";
pub const UNTITLED_SONG: &str = "Untitled song";
pub const UNTITLED_ALBUM: &str = "Untitled album";
pub const UNKNOWN_YEAR: i32 = 9999;

/// An entity that is stored per query fingerprint and page.
pub trait PaginatedEntity: Clone + Send + Sync + Unpin + 'static {
    /// Business id from the API
    fn id(&self) -> &str;

    fn page(&self) -> u32;

    fn search_index(&self) -> u32;

    /// Storage key, distinct from the business id
    fn primary_key(&self) -> &str;

    /// Places the entity at `search_index` of `page` under the fingerprint
    /// `params`, stored as `primary_key`.
    fn assign_position(&mut self, params: &str, page: u32, search_index: u32, primary_key: String);
}

macro_rules! paginated_entity {
    ($entity:ty) => {
        impl PaginatedEntity for $entity {
            fn id(&self) -> &str {
                &self.id
            }

            fn page(&self) -> u32 {
                self.page
            }

            fn search_index(&self) -> u32 {
                self.search_index
            }

            fn primary_key(&self) -> &str {
                &self.primary_key
            }

            fn assign_position(
                &mut self,
                params: &str,
                page: u32,
                search_index: u32,
                primary_key: String,
            ) {
                self.params = params.to_string();
                self.page = page;
                self.search_index = search_index;
                self.primary_key = primary_key;
            }
        }
    };
}

// =============================================================================
// Audio
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(default)]
pub struct Audio {
    pub id: String,
    /// Backend the audio came from (`audios`, `minerva`, `flacs`)
    #[serde(rename = "key")]
    pub search_key: String,
    pub source_id: String,
    pub artist: String,
    pub title: String,
    /// Seconds
    pub duration: i64,
    /// Upload date, epoch seconds
    pub date: i64,
    pub album: Option<String>,
    #[serde(rename = "is_explicit")]
    pub explicit: bool,
    pub cover_url: Option<String>,
    pub cover_url_medium: Option<String>,
    pub cover_url_small: Option<String>,
    #[serde(rename = "cover")]
    pub cover_alternate: String,
    #[serde(rename = "download")]
    pub download_url: Option<String>,
    #[serde(rename = "stream")]
    pub stream_url: Option<String>,

    #[serde(skip)]
    pub params: String,
    #[serde(skip)]
    pub page: u32,
    #[serde(skip)]
    pub search_index: u32,
    #[serde(skip)]
    pub primary_key: String,
}

impl Default for Audio {
    fn default() -> Self {
        Self {
            id: String::new(),
            search_key: String::new(),
            source_id: String::new(),
            artist: UNKNOWN_ARTIST.to_string(),
            title: UNTITLED_SONG.to_string(),
            duration: 0,
            date: 0,
            album: None,
            explicit: false,
            cover_url: None,
            cover_url_medium: None,
            cover_url_small: None,
            cover_alternate: String::new(),
            download_url: None,
            stream_url: None,
            params: String::new(),
            page: 0,
            search_index: 0,
            primary_key: String::new(),
        }
    }
}

paginated_entity!(Audio);

impl Audio {
    pub fn duration_millis(&self) -> i64 {
        self.duration * 1000
    }

    /// `Artist - Title`, used as the downloaded file's base name.
    pub fn file_display_name(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }

    pub fn is_flac(&self) -> bool {
        self.search_key == "flacs"
    }

    pub fn file_mime_type(&self) -> &'static str {
        if self.is_flac() {
            "audio/flac"
        } else {
            "audio/mpeg"
        }
    }

    pub fn file_extension(&self) -> &'static str {
        if self.is_flac() {
            ".flac"
        } else {
            ".mp3"
        }
    }

    /// Individual artists, split on `,`, `feat.` and `ft.`.
    pub fn artists(&self) -> Vec<String> {
        split_artists(&self.artist)
    }

    pub fn main_artist(&self) -> String {
        split_artists(&self.artist)
            .into_iter()
            .next()
            .unwrap_or_default()
    }
}

fn split_artists(artist: &str) -> Vec<String> {
    let mut parts = vec![artist.to_string()];
    for separator in [",", "feat.", "ft."] {
        parts = parts
            .iter()
            .flat_map(|part| part.split(separator).map(str::to_string).collect::<Vec<_>>())
            .collect();
    }
    parts.into_iter().map(|part| part.trim().to_string()).collect()
}

// =============================================================================
// Artist
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtistPhoto {
    pub url: String,
    pub height: i32,
    pub width: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(default)]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub domain: String,
    #[sqlx(json)]
    pub photo: Vec<ArtistPhoto>,
    #[sqlx(json)]
    pub audios: Vec<Audio>,
    #[sqlx(json)]
    pub albums: Vec<Album>,
    /// Set once the artist's own detail endpoint has been cached
    pub details_fetched: bool,

    #[serde(skip)]
    pub params: String,
    #[serde(skip)]
    pub page: u32,
    #[serde(skip)]
    pub search_index: u32,
    #[serde(skip)]
    pub primary_key: String,
}

impl Default for Artist {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: UNKNOWN_ARTIST.to_string(),
            domain: String::new(),
            photo: Vec::new(),
            audios: Vec::new(),
            albums: Vec::new(),
            details_fetched: false,
            params: String::new(),
            page: 0,
            search_index: 0,
            primary_key: String::new(),
        }
    }
}

paginated_entity!(Artist);

impl Artist {
    /// Highest resolution photo, if any.
    pub fn large_photo(&self) -> Option<&str> {
        self.photo
            .iter()
            .max_by_key(|photo| photo.height)
            .map(|photo| photo.url.as_str())
    }
}

// =============================================================================
// Album
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlbumPhoto {
    #[serde(rename = "photo_1200")]
    pub large_url: String,
    #[serde(rename = "photo_600")]
    pub medium_url: String,
    #[serde(rename = "photo_300")]
    pub small_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(default)]
pub struct Album {
    pub id: String,
    pub access_key: String,
    pub artist_id: i64,
    pub title: String,
    pub year: i32,
    #[serde(rename = "count")]
    pub song_count: i32,
    #[serde(rename = "is_explicit")]
    pub explicit: bool,
    #[serde(rename = "main_artists")]
    #[sqlx(rename = "main_artists")]
    #[sqlx(json)]
    pub artists: Vec<Artist>,
    pub genre_id: i32,
    #[sqlx(json)]
    pub photo: AlbumPhoto,
    #[sqlx(json)]
    pub audios: Vec<Audio>,
    #[serde(skip)]
    pub details_fetched: bool,

    #[serde(skip)]
    pub params: String,
    #[serde(skip)]
    pub page: u32,
    #[serde(skip)]
    pub search_index: u32,
    #[serde(skip)]
    pub primary_key: String,
}

impl Default for Album {
    fn default() -> Self {
        Self {
            id: String::new(),
            access_key: String::new(),
            artist_id: 0,
            title: UNTITLED_ALBUM.to_string(),
            year: UNKNOWN_YEAR,
            song_count: 1,
            explicit: false,
            artists: Vec::new(),
            genre_id: -1,
            photo: AlbumPhoto::default(),
            audios: Vec::new(),
            details_fetched: false,
            params: String::new(),
            page: 0,
            search_index: 0,
            primary_key: String::new(),
        }
    }
}

paginated_entity!(Album);

impl Album {
    pub fn has_year(&self) -> bool {
        self.year != UNKNOWN_YEAR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_deserializes_api_names() {
        let json = r#"{
            "id": "123_456",
            "key": "flacs",
            "artist": "Daft Punk feat. Pharrell, Nile Rodgers",
            "title": "Get Lucky",
            "duration": 248,
            "is_explicit": true,
            "download": "https://example.com/d/123_456",
            "unknown_field": 1
        }"#;

        let audio: Audio = serde_json::from_str(json).unwrap();
        assert_eq!(audio.id, "123_456");
        assert!(audio.is_flac());
        assert!(audio.explicit);
        assert_eq!(audio.duration_millis(), 248_000);
        assert_eq!(audio.file_extension(), ".flac");
        assert_eq!(audio.download_url.as_deref(), Some("https://example.com/d/123_456"));
        assert_eq!(audio.main_artist(), "Daft Punk");
        assert_eq!(audio.artists(), vec!["Daft Punk", "Pharrell", "Nile Rodgers"]);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let audio: Audio = serde_json::from_str(r#"{"id": "1"}"#).unwrap();
        assert_eq!(audio.artist, UNKNOWN_ARTIST);
        assert_eq!(audio.title, UNTITLED_SONG);
        assert_eq!(audio.file_mime_type(), "audio/mpeg");

        let album: Album = serde_json::from_str(r#"{"id": "2"}"#).unwrap();
        assert!(!album.has_year());
        assert_eq!(album.genre_id, -1);
    }

    #[test]
    fn test_positional_fields_are_not_serialized() {
        let mut audio = Audio {
            id: "1".to_string(),
            ..Audio::default()
        };
        audio.assign_position("query=abc", 2, 5, "1_abc".to_string());

        let json = serde_json::to_value(&audio).unwrap();
        assert!(json.get("params").is_none());
        assert!(json.get("primary_key").is_none());
        assert_eq!(audio.page(), 2);
        assert_eq!(audio.search_index(), 5);
    }

    #[test]
    fn test_artist_large_photo() {
        let artist = Artist {
            photo: vec![
                ArtistPhoto {
                    url: "small".to_string(),
                    height: 100,
                    width: 100,
                },
                ArtistPhoto {
                    url: "large".to_string(),
                    height: 800,
                    width: 800,
                },
            ],
            ..Artist::default()
        };
        assert_eq!(artist.large_photo(), Some("large"));
    }
}
