//! Sort options for downloaded audios

use crate::models::AudioDownloadItem;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadSortKey {
    Date,
    Title,
    Artist,
    Album,
    Size,
    Duration,
}

impl DownloadSortKey {
    pub const ALL: [DownloadSortKey; 6] = [
        DownloadSortKey::Date,
        DownloadSortKey::Title,
        DownloadSortKey::Artist,
        DownloadSortKey::Album,
        DownloadSortKey::Size,
        DownloadSortKey::Duration,
    ];

    /// Numeric keys sort largest first by default, text keys A to Z.
    pub fn default_descending(&self) -> bool {
        matches!(
            self,
            DownloadSortKey::Date | DownloadSortKey::Size | DownloadSortKey::Duration
        )
    }

    fn compare(&self, a: &AudioDownloadItem, b: &AudioDownloadItem) -> Ordering {
        match self {
            DownloadSortKey::Date => a.request.created_at.cmp(&b.request.created_at),
            DownloadSortKey::Title => a.audio.title.cmp(&b.audio.title),
            DownloadSortKey::Artist => a.audio.artist.cmp(&b.audio.artist),
            DownloadSortKey::Album => a.audio.album.cmp(&b.audio.album),
            DownloadSortKey::Size => a.info.total().cmp(&b.info.total()),
            DownloadSortKey::Duration => a.audio.duration.cmp(&b.audio.duration),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadSortOption {
    pub key: DownloadSortKey,
    pub descending: bool,
}

impl DownloadSortOption {
    pub fn new(key: DownloadSortKey) -> Self {
        Self {
            key,
            descending: key.default_descending(),
        }
    }

    pub fn by_date() -> Self {
        Self::new(DownloadSortKey::Date)
    }

    pub fn by_title() -> Self {
        Self::new(DownloadSortKey::Title)
    }

    pub fn by_artist() -> Self {
        Self::new(DownloadSortKey::Artist)
    }

    pub fn by_album() -> Self {
        Self::new(DownloadSortKey::Album)
    }

    pub fn by_size() -> Self {
        Self::new(DownloadSortKey::Size)
    }

    pub fn by_duration() -> Self {
        Self::new(DownloadSortKey::Duration)
    }

    /// Every option with its default direction.
    pub fn all() -> Vec<Self> {
        DownloadSortKey::ALL.into_iter().map(Self::new).collect()
    }

    pub fn toggle_descending(self) -> Self {
        Self {
            descending: !self.descending,
            ..self
        }
    }

    /// Same key, direction ignored.
    pub fn is_same_option(&self, other: &Self) -> bool {
        self.key == other.key
    }

    pub fn compare(&self, a: &AudioDownloadItem, b: &AudioDownloadItem) -> Ordering {
        let ordering = self.key.compare(a, b);
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }

    /// Stable sort, so equal items keep the ledger order.
    pub fn sort(&self, items: &mut [AudioDownloadItem]) {
        items.sort_by(|a, b| self.compare(a, b));
    }
}

impl Default for DownloadSortOption {
    fn default() -> Self {
        Self::by_date()
    }
}
