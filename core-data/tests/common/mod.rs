#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::SqliteSettingsStore;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::{Clock, SettingsStore};
use chrono::{DateTime, TimeZone, Utc};
use core_data::db::create_test_pool;
use core_data::models::{Audio, PaginatedEntity};
use core_data::params::SearchParams;
use core_data::repositories::PaginatedEntityRepository;
use core_data::store::{Fetcher, SearchSource, SearchStore, Store};
use core_data::{DataError, InvalidationTracker, LastRequests};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub fn audios(prefix: &str, count: usize) -> Vec<Audio> {
    (0..count)
        .map(|i| Audio {
            id: format!("{prefix}{i}"),
            artist: "Artist".to_string(),
            title: format!("Song {prefix}{i}"),
            ..Audio::default()
        })
        .collect()
}

/// Search fetcher with canned pages, counting calls.
#[derive(Default)]
pub struct FakeSearchFetcher {
    pages: Mutex<HashMap<u32, Result<Vec<Audio>, DataError>>>,
    pub calls: AtomicUsize,
    delay: Option<Duration>,
}

impl FakeSearchFetcher {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn respond(&self, page: u32, response: Result<Vec<Audio>, DataError>) {
        self.pages.lock().unwrap().insert(page, response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher<SearchParams, Vec<Audio>> for FakeSearchFetcher {
    async fn fetch(&self, params: &SearchParams) -> core_data::Result<Vec<Audio>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.pages
            .lock()
            .unwrap()
            .get(&params.page)
            .cloned()
            .unwrap_or_else(|| Err(DataError::EmptyResult(params.page_key())))
    }
}

pub struct Harness {
    pub pool: SqlitePool,
    pub settings: Arc<dyn SettingsStore>,
    pub clock: Arc<ManualClock>,
    pub tracker: InvalidationTracker,
    pub fetcher: Arc<FakeSearchFetcher>,
    pub store: SearchStore<Audio>,
    pub repo: PaginatedEntityRepository<Audio>,
}

pub const TTL: Duration = Duration::from_secs(24 * 60 * 60);

impl Harness {
    pub async fn new(fetcher: FakeSearchFetcher) -> Self {
        let pool = create_test_pool().await.unwrap();
        let settings: Arc<dyn SettingsStore> =
            Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
        let clock = Arc::new(ManualClock::new());
        let tracker = InvalidationTracker::new();
        let fetcher = Arc::new(fetcher);
        let repo = PaginatedEntityRepository::<Audio>::new(pool.clone());

        let ledger = LastRequests::new("search_audios", settings.clone(), clock.clone(), TTL);
        let source = SearchSource::new(repo.clone(), ledger, tracker.clone());
        let store = Store::new("search_audios", fetcher.clone(), Arc::new(source));

        Self {
            pool,
            settings,
            clock,
            tracker,
            fetcher,
            store,
            repo,
        }
    }
}

pub fn ids<E: PaginatedEntity>(entries: &[E]) -> Vec<String> {
    entries.iter().map(|e| e.id().to_string()).collect()
}

/// Serves fixed bodies by path, recording every request.
#[derive(Default)]
pub struct FakeHttpClient {
    bodies: Mutex<HashMap<String, String>>,
    pub requests: Mutex<Vec<HttpRequest>>,
}

impl FakeHttpClient {
    pub fn route(&self, url: &str, body: &str) {
        self.bodies
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
    }
}

#[async_trait]
impl HttpClient for FakeHttpClient {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        let body = self.bodies.lock().unwrap().get(&request.url).cloned();
        self.requests.lock().unwrap().push(request);
        Ok(match body {
            Some(body) => HttpResponse::new(200, body),
            None => HttpResponse::new(404, "not found"),
        })
    }
}
