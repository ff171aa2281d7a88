//! Query parameters and their cache fingerprints
//!
//! A fingerprint is the canonical string that partitions cached rows. Search
//! results use two forms: the partition fingerprint (`query=abc#flacs`) shared
//! by all pages of one search, and the page-scoped key
//! (`query=abc#flacs#page=2`) that identifies one fetch.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A store key: identifies one remote fetch and its staleness record.
pub trait StoreKey: Clone + fmt::Debug + Send + Sync + 'static {
    fn cache_key(&self) -> String;

    /// Identifies concurrent fetches that may share one remote call. Defaults
    /// to [`cache_key`](Self::cache_key); keys carrying request-only state
    /// must include it here.
    fn in_flight_key(&self) -> String {
        self.cache_key()
    }
}

/// Remote backend kinds accepted by the multisearch endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    Audios,
    Artists,
    Albums,
    Minerva,
    Flacs,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Audios => "audios",
            BackendType::Artists => "artists",
            BackendType::Albums => "albums",
            BackendType::Minerva => "minerva",
            BackendType::Flacs => "flacs",
        }
    }

    /// True for backends that return audios.
    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            BackendType::Audios | BackendType::Minerva | BackendType::Flacs
        )
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to a captcha challenge, replayed with the next request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptchaSolution {
    pub captcha_id: i64,
    pub captcha_index: i32,
    pub captcha_key: String,
}

impl CaptchaSolution {
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        vec![
            ("captcha_id".to_string(), self.captcha_id.to_string()),
            ("captcha_index".to_string(), self.captcha_index.to_string()),
            ("captcha_key".to_string(), self.captcha_key.clone()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
    pub query: String,
    pub captcha_solution: Option<CaptchaSolution>,
    pub backends: Vec<BackendType>,
    pub page: u32,
}

impl SearchParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            captcha_solution: None,
            backends: vec![BackendType::Audios],
            page: 0,
        }
    }

    pub fn with_backends(mut self, backends: impl IntoIterator<Item = BackendType>) -> Self {
        self.backends = backends.into_iter().collect();
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn with_captcha_solution(mut self, solution: CaptchaSolution) -> Self {
        self.captcha_solution = Some(solution);
        self
    }

    /// Partition fingerprint shared by every page of this search.
    ///
    /// Minerva and flacs results are kept apart from regular audios.
    pub fn fingerprint(&self) -> String {
        let tag = if self.backends.contains(&BackendType::Minerva) {
            "#minerva"
        } else if self.backends.contains(&BackendType::Flacs) {
            "#flacs"
        } else {
            ""
        };
        format!("query={}{}", self.query, tag)
    }

    /// Fingerprint of this page only.
    pub fn page_key(&self) -> String {
        format!("{}#page={}", self.fingerprint(), self.page)
    }

    /// Storage primary key of entity `id` under this search.
    ///
    /// Shares nothing with the page so that re-fetching a page replaces the
    /// same rows; the fingerprint hash keeps searches apart.
    pub fn primary_key_for(&self, id: &str) -> String {
        let digest = Sha256::digest(self.fingerprint().as_bytes());
        let hex: String = digest.iter().map(|byte| format!("{:02x}", byte)).collect();
        format!("{}_{}", id, &hex[..16])
    }

    /// `query`, `page` and the captcha triple, without `types[]`.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("query".to_string(), self.query.clone()),
            ("page".to_string(), self.page.to_string()),
        ];
        if let Some(solution) = &self.captcha_solution {
            pairs.extend(solution.query_pairs());
        }
        pairs
    }
}

impl StoreKey for SearchParams {
    fn cache_key(&self) -> String {
        self.page_key()
    }

    /// A captcha answer makes a different request than the unsolved one.
    fn in_flight_key(&self) -> String {
        match &self.captcha_solution {
            Some(solution) => format!(
                "{}#captcha={}:{}:{}",
                self.page_key(),
                solution.captcha_id,
                solution.captcha_index,
                solution.captcha_key
            ),
            None => self.page_key(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistParams {
    pub id: String,
    pub page: u32,
}

impl ArtistParams {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            page: 0,
        }
    }
}

impl StoreKey for ArtistParams {
    fn cache_key(&self) -> String {
        format!("artist={}", self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumParams {
    pub id: String,
    pub owner_id: i64,
    pub access_key: String,
}

impl AlbumParams {
    pub fn new(id: impl Into<String>, owner_id: i64, access_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner_id,
            access_key: access_key.into(),
        }
    }
}

impl StoreKey for AlbumParams {
    fn cache_key(&self) -> String {
        format!("album={}", self.id)
    }
}
