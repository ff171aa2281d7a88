//! # Cache-Aside Stores
//!
//! A [`Store`] pairs a remote [`Fetcher`] with a local [`SourceOfTruth`]:
//!
//! - [`Store::get`] serves a valid cached value or fetches
//! - [`Store::fresh`] always fetches, writes and reads back
//! - [`Store::observe`] / [`Store::stream`] follow local changes
//!
//! Concurrent fetches of the same key share one in-flight task. The task is
//! detached, so a caller that stops waiting never leaves a write half done.

mod details;
mod fetcher;
mod search;
mod source;

pub use details::{
    AlbumDetails, AlbumDetailsFetcher, AlbumDetailsSource, AlbumDetailsStore,
    ArtistDetailsFetcher, ArtistDetailsSource, ArtistDetailsStore,
};
pub use fetcher::Fetcher;
pub use search::{SearchEntity, SearchFetcher, SearchKind, SearchSource, SearchStore};
pub use source::SourceOfTruth;

use crate::error::{DataError, Result};
use crate::invalidation::InvalidationTracker;
use crate::last_requests::LastRequests;
use crate::models::{Album, Artist, Audio};
use crate::params::StoreKey;
use crate::remote::DatmusicApi;
use bridge_traits::{Clock, SettingsStore};
use core_runtime::config::StalenessConfig;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{self, BoxStream, StreamExt};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, instrument, trace, warn};

/// Where a [`StoreResponse::Data`] value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOrigin {
    Cache,
    Fetcher,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreResponse<V> {
    Loading,
    Data { value: V, origin: ResponseOrigin },
    Error(DataError),
}

impl<V> StoreResponse<V> {
    pub fn data(&self) -> Option<&V> {
        match self {
            StoreResponse::Data { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn into_data(self) -> Option<V> {
        match self {
            StoreResponse::Data { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, StoreResponse::Loading)
    }
}

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V>>>;
type InFlight<V> = Arc<Mutex<HashMap<String, SharedFetch<V>>>>;

fn lock_in_flight<V>(in_flight: &InFlight<V>) -> MutexGuard<'_, HashMap<String, SharedFetch<V>>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes an in-flight entry when its fetch task ends, panics included.
struct InFlightGuard<V> {
    in_flight: InFlight<V>,
    key: String,
}

impl<V> Drop for InFlightGuard<V> {
    fn drop(&mut self) {
        lock_in_flight(&self.in_flight).remove(&self.key);
    }
}

/// Generic cache-aside store over key `K`, fetched type `T` and read type `V`.
pub struct Store<K, T, V> {
    name: Arc<str>,
    fetcher: Arc<dyn Fetcher<K, T>>,
    source: Arc<dyn SourceOfTruth<K, T, V>>,
    in_flight: InFlight<V>,
    events: Option<EventBus>,
}

impl<K, T, V> Clone for Store<K, T, V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            fetcher: self.fetcher.clone(),
            source: self.source.clone(),
            in_flight: self.in_flight.clone(),
            events: self.events.clone(),
        }
    }
}

enum StreamPhase {
    Start,
    Fetch,
    Watch,
}

impl<K, T, V> Store<K, T, V>
where
    K: StoreKey,
    T: Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<Arc<str>>,
        fetcher: Arc<dyn Fetcher<K, T>>,
        source: Arc<dyn SourceOfTruth<K, T, V>>,
    ) -> Self {
        Self {
            name: name.into(),
            fetcher,
            source,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            events: None,
        }
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version counter of the backing table.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.source.changes()
    }

    fn emit(&self, event: CacheEvent) {
        emit_cache_event(self.events.as_ref(), event);
    }

    /// Valid cached value, else a fresh fetch.
    ///
    /// A miss joins the in-flight fetch of the same key. A new fetch only
    /// starts if the table is unchanged since the miss was read; otherwise
    /// the cache is read again, since a fetch of this key may have just
    /// landed and left the in-flight map.
    #[instrument(skip(self), fields(store = %self.name))]
    pub async fn get(&self, key: &K) -> Result<V> {
        loop {
            let version = self.version();
            if let Some(value) = self.source.read(key).await? {
                trace!("Serving cached value");
                return Ok(value);
            }

            let fetch = {
                let mut in_flight = lock_in_flight(&self.in_flight);
                if in_flight.contains_key(&key.in_flight_key()) || self.version() == version {
                    Some(self.join_or_spawn(key, &mut in_flight))
                } else {
                    None
                }
            };
            match fetch {
                Some(fetch) => return fetch.await,
                None => trace!("Table changed while reading, reading again"),
            }
        }
    }

    /// Fetches, writes and reads back, joining an in-flight fetch of the same
    /// key if there is one.
    #[instrument(skip(self), fields(store = %self.name))]
    pub async fn fresh(&self, key: &K) -> Result<V> {
        let fetch = {
            let mut in_flight = lock_in_flight(&self.in_flight);
            self.join_or_spawn(key, &mut in_flight)
        };
        fetch.await
    }

    fn version(&self) -> u64 {
        let changes = self.source.changes();
        let version = *changes.borrow();
        version
    }

    fn join_or_spawn(
        &self,
        key: &K,
        in_flight: &mut HashMap<String, SharedFetch<V>>,
    ) -> SharedFetch<V> {
        let flight_key = key.in_flight_key();
        if let Some(fetch) = in_flight.get(&flight_key) {
            debug!(key = %flight_key, "Joined in-flight fetch");
            self.emit(CacheEvent::Coalesced {
                store: self.name.to_string(),
                key: key.cache_key(),
            });
            return fetch.clone();
        }

        let fetch = self.spawn_fetch(key.clone(), flight_key.clone());
        in_flight.insert(flight_key, fetch.clone());
        fetch
    }

    /// Must be called with the in-flight lock held.
    fn spawn_fetch(&self, key: K, flight_key: String) -> SharedFetch<V> {
        let guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
            key: flight_key,
        };
        let cache_key = key.cache_key();
        let fetcher = self.fetcher.clone();
        let source = self.source.clone();
        let events = self.events.clone();
        let name = self.name.clone();

        let task = tokio::spawn(async move {
            let _guard = guard;
            let outcome = fetch_and_store(fetcher.as_ref(), source.as_ref(), &key).await;
            match &outcome {
                Ok((items, _)) => {
                    debug!(store = %name, key = %cache_key, items, "Fetched and stored");
                    emit_cache_event(
                        events.as_ref(),
                        CacheEvent::Fetched {
                            store: name.to_string(),
                            key: cache_key,
                            items: *items,
                        },
                    );
                }
                Err(error) => {
                    warn!(store = %name, key = %cache_key, error = %error, "Fetch failed");
                    emit_cache_event(
                        events.as_ref(),
                        CacheEvent::FetchFailed {
                            store: name.to_string(),
                            key: cache_key,
                            message: error.to_string(),
                        },
                    );
                }
            }
            outcome.map(|(_, value)| value)
        });

        task.map(|joined| match joined {
            Ok(outcome) => outcome,
            Err(error) => Err(DataError::Aborted(error.to_string())),
        })
        .boxed()
        .shared()
    }

    /// Cached value for `key`, re-read after every local change. Stale or
    /// missing values come through as `None`.
    pub fn observe(&self, key: K) -> BoxStream<'static, Result<Option<V>>> {
        let source = self.source.clone();
        let changes = self.source.changes();

        stream::unfold((changes, true), move |(mut changes, first)| {
            let source = source.clone();
            let key = key.clone();
            async move {
                if first {
                    changes.borrow_and_update();
                } else if changes.changed().await.is_err() {
                    return None;
                }
                let value = source.read(&key).await;
                Some((value, (changes, false)))
            }
        })
        .boxed()
    }

    /// Cached value (or a fetch when there is none, or when `refresh` is
    /// set), followed by every later valid local change.
    pub fn stream(&self, key: K, refresh: bool) -> BoxStream<'static, StoreResponse<V>> {
        let store = self.clone();
        let changes = self.source.changes();

        stream::unfold(
            (StreamPhase::Start, changes),
            move |(phase, mut changes): (StreamPhase, watch::Receiver<u64>)| {
                let store = store.clone();
                let key = key.clone();
                async move {
                    match phase {
                        StreamPhase::Start => {
                            changes.borrow_and_update();
                            if !refresh {
                                match store.source.read(&key).await {
                                    Ok(Some(value)) => {
                                        let response = StoreResponse::Data {
                                            value,
                                            origin: ResponseOrigin::Cache,
                                        };
                                        return Some((response, (StreamPhase::Watch, changes)));
                                    }
                                    Ok(None) => {}
                                    Err(error) => {
                                        return Some((
                                            StoreResponse::Error(error),
                                            (StreamPhase::Fetch, changes),
                                        ));
                                    }
                                }
                            }
                            Some((StoreResponse::Loading, (StreamPhase::Fetch, changes)))
                        }
                        StreamPhase::Fetch => {
                            let response = match store.fresh(&key).await {
                                Ok(value) => StoreResponse::Data {
                                    value,
                                    origin: ResponseOrigin::Fetcher,
                                },
                                Err(error) => StoreResponse::Error(error),
                            };
                            // Our own write already produced this value
                            changes.borrow_and_update();
                            Some((response, (StreamPhase::Watch, changes)))
                        }
                        StreamPhase::Watch => loop {
                            if changes.changed().await.is_err() {
                                return None;
                            }
                            match store.source.read(&key).await {
                                Ok(Some(value)) => {
                                    let response = StoreResponse::Data {
                                        value,
                                        origin: ResponseOrigin::Cache,
                                    };
                                    return Some((response, (StreamPhase::Watch, changes)));
                                }
                                Ok(None) => continue,
                                Err(error) => {
                                    return Some((
                                        StoreResponse::Error(error),
                                        (StreamPhase::Watch, changes),
                                    ));
                                }
                            }
                        },
                    }
                }
            },
        )
        .boxed()
    }

    /// Deletes the rows and staleness record of one key.
    #[instrument(skip(self), fields(store = %self.name))]
    pub async fn clear(&self, key: &K) -> Result<()> {
        self.source.delete(key).await?;
        self.emit(CacheEvent::Cleared {
            store: self.name.to_string(),
            key: key.cache_key(),
        });
        Ok(())
    }

    /// Deletes everything this store has cached.
    #[instrument(skip(self), fields(store = %self.name))]
    pub async fn clear_all(&self) -> Result<()> {
        self.source.delete_all().await?;
        self.emit(CacheEvent::Reset {
            store: self.name.to_string(),
        });
        Ok(())
    }
}

async fn fetch_and_store<K, T, V>(
    fetcher: &dyn Fetcher<K, T>,
    source: &dyn SourceOfTruth<K, T, V>,
    key: &K,
) -> Result<(usize, V)>
where
    K: StoreKey,
    T: Send + 'static,
    V: Send + 'static,
{
    let value = fetcher.fetch(key).await?;
    let written = source.write(key, value).await?;
    let stored = source
        .read(key)
        .await?
        .ok_or_else(|| DataError::EmptyResult(key.cache_key()))?;
    Ok((written, stored))
}

fn emit_cache_event(events: Option<&EventBus>, event: CacheEvent) {
    if let Some(events) = events {
        // No subscribers is fine
        let _ = events.emit(CoreEvent::Cache(event));
    }
}

/// Shared dependencies of the concrete stores.
#[derive(Clone)]
pub struct DataContext {
    pub pool: SqlitePool,
    pub api: DatmusicApi,
    pub settings: Arc<dyn SettingsStore>,
    pub clock: Arc<dyn Clock>,
    pub tracker: InvalidationTracker,
    pub events: Option<EventBus>,
    pub staleness: StalenessConfig,
}

impl DataContext {
    pub fn ledger(&self, name: &str, ttl: Duration) -> LastRequests {
        LastRequests::new(name, self.settings.clone(), self.clock.clone(), ttl)
    }

    fn attach_events<K, T, V>(&self, store: Store<K, T, V>) -> Store<K, T, V>
    where
        K: StoreKey,
        T: Send + 'static,
        V: Clone + Send + Sync + 'static,
    {
        match &self.events {
            Some(events) => store.with_event_bus(events.clone()),
            None => store,
        }
    }
}

impl std::fmt::Debug for DataContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataContext")
            .field("api", &self.api)
            .field("staleness", &self.staleness)
            .finish_non_exhaustive()
    }
}

/// Every concrete store, wired to one [`DataContext`].
#[derive(Clone)]
pub struct Stores {
    pub audios: SearchStore<Audio>,
    pub artists: SearchStore<Artist>,
    pub albums: SearchStore<Album>,
    pub artist_details: ArtistDetailsStore,
    pub album_details: AlbumDetailsStore,
}

impl Stores {
    pub fn new(context: &DataContext) -> Self {
        Self {
            audios: context.attach_events(search::search_store::<Audio>(
                context,
                context.staleness.audios_search,
            )),
            artists: context.attach_events(search::search_store::<Artist>(
                context,
                context.staleness.artists_search,
            )),
            albums: context.attach_events(search::search_store::<Album>(
                context,
                context.staleness.albums_search,
            )),
            artist_details: context.attach_events(details::artist_details_store(context)),
            album_details: context.attach_events(details::album_details_store(context)),
        }
    }

    /// Wipes every cached row and staleness record.
    pub async fn clear_all(&self) -> Result<()> {
        self.audios.clear_all().await?;
        self.artists.clear_all().await?;
        self.albums.clear_all().await?;
        self.artist_details.clear_all().await?;
        self.album_details.clear_all().await?;
        Ok(())
    }
}
