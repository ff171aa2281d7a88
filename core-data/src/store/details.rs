//! Artist and album detail stores
//!
//! Detail writes merge into whatever row already holds the business id and
//! also cache the nested audios and albums as standalone rows keyed by id,
//! all in one transaction.

use super::{DataContext, Fetcher, SourceOfTruth, Store};
use crate::error::{DataError, Result};
use crate::invalidation::InvalidationTracker;
use crate::last_requests::LastRequests;
use crate::models::{Album, Artist, Audio, PaginatedEntity};
use crate::params::{AlbumParams, ArtistParams, StoreKey};
use crate::remote::DatmusicApi;
use crate::repositories::{EntityTable, PaginatedEntityRepository};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

pub type ArtistDetailsStore = Store<ArtistParams, Artist, Artist>;
pub type AlbumDetailsStore = Store<AlbumParams, AlbumDetails, Vec<Audio>>;

/// Nested rows are stored under their own id, in response order.
fn as_standalone<E: PaginatedEntity>(entries: &[E]) -> Vec<E> {
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let mut entry = entry.clone();
            let id = entry.id().to_string();
            entry.assign_position("", 0, index as u32, id);
            entry
        })
        .collect()
}

// =============================================================================
// Artist details
// =============================================================================

pub struct ArtistDetailsFetcher {
    api: DatmusicApi,
}

impl ArtistDetailsFetcher {
    pub fn new(api: DatmusicApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Fetcher<ArtistParams, Artist> for ArtistDetailsFetcher {
    async fn fetch(&self, params: &ArtistParams) -> Result<Artist> {
        self.api
            .artist(params)
            .await?
            .artist
            .ok_or_else(|| DataError::EmptyResult(params.cache_key()))
    }
}

pub struct ArtistDetailsSource {
    artists: PaginatedEntityRepository<Artist>,
    audios: PaginatedEntityRepository<Audio>,
    albums: PaginatedEntityRepository<Album>,
    ledger: LastRequests,
    tracker: InvalidationTracker,
}

impl ArtistDetailsSource {
    pub fn new(pool: SqlitePool, ledger: LastRequests, tracker: InvalidationTracker) -> Self {
        Self {
            artists: PaginatedEntityRepository::new(pool.clone()),
            audios: PaginatedEntityRepository::new(pool.clone()),
            albums: PaginatedEntityRepository::new(pool),
            ledger,
            tracker,
        }
    }
}

#[async_trait]
impl SourceOfTruth<ArtistParams, Artist, Artist> for ArtistDetailsSource {
    async fn read(&self, params: &ArtistParams) -> Result<Option<Artist>> {
        let Some(artist) = self.artists.details_entry(&params.id).await? else {
            return Ok(None);
        };
        if !artist.details_fetched || self.ledger.is_expired(&params.cache_key()).await? {
            return Ok(None);
        }
        Ok(Some(artist))
    }

    async fn write(&self, params: &ArtistParams, response: Artist) -> Result<usize> {
        let mut tx = self.artists.pool().begin().await?;

        let mut entry = match self.artists.details_entry_in(&mut *tx, &params.id).await? {
            Some(existing) => existing,
            None => {
                let mut entry = response.clone();
                let id = entry.id.clone();
                entry.assign_position("", 0, 0, id);
                entry
            }
        };
        entry.audios = response.audios.clone();
        entry.albums = response.albums.clone();
        entry.details_fetched = true;
        self.artists.upsert(&mut *tx, &entry).await?;

        let audios = self
            .audios
            .insert_missing(&mut *tx, &as_standalone(&response.audios))
            .await?;
        let albums = self
            .albums
            .insert_missing(&mut *tx, &as_standalone(&response.albums))
            .await?;
        tx.commit().await?;

        self.ledger.save(&params.cache_key()).await?;
        self.tracker
            .notify(&[Artist::TABLE, Audio::TABLE, Album::TABLE]);

        debug!(artist = %params.id, audios, albums, "Stored artist details");
        Ok(1)
    }

    async fn delete(&self, params: &ArtistParams) -> Result<()> {
        let mut conn = self.artists.pool().acquire().await?;
        self.artists.delete_by_primary_key(&mut conn, &params.id).await?;
        drop(conn);

        self.ledger.clear(&params.cache_key()).await?;
        self.tracker.notify(&[Artist::TABLE]);
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        let mut conn = self.artists.pool().acquire().await?;
        self.artists.delete_all(&mut conn).await?;
        drop(conn);

        self.ledger.clear_store().await?;
        self.tracker.notify(&[Artist::TABLE]);
        Ok(())
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.tracker.subscribe(Artist::TABLE)
    }
}

// =============================================================================
// Album details
// =============================================================================

/// Album endpoint payload: the album plus its tracklist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumDetails {
    pub album: Album,
    pub audios: Vec<Audio>,
}

pub struct AlbumDetailsFetcher {
    api: DatmusicApi,
}

impl AlbumDetailsFetcher {
    pub fn new(api: DatmusicApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Fetcher<AlbumParams, AlbumDetails> for AlbumDetailsFetcher {
    async fn fetch(&self, params: &AlbumParams) -> Result<AlbumDetails> {
        let data = self.api.album(params).await?;
        let Some(album) = data.album else {
            return Err(DataError::EmptyResult(params.cache_key()));
        };
        // The tracklist may also arrive nested in the album
        let audios = if data.audios.is_empty() {
            album.audios.clone()
        } else {
            data.audios
        };
        Ok(AlbumDetails { album, audios })
    }
}

pub struct AlbumDetailsSource {
    albums: PaginatedEntityRepository<Album>,
    audios: PaginatedEntityRepository<Audio>,
    ledger: LastRequests,
    tracker: InvalidationTracker,
}

impl AlbumDetailsSource {
    pub fn new(pool: SqlitePool, ledger: LastRequests, tracker: InvalidationTracker) -> Self {
        Self {
            albums: PaginatedEntityRepository::new(pool.clone()),
            audios: PaginatedEntityRepository::new(pool),
            ledger,
            tracker,
        }
    }
}

#[async_trait]
impl SourceOfTruth<AlbumParams, AlbumDetails, Vec<Audio>> for AlbumDetailsSource {
    async fn read(&self, params: &AlbumParams) -> Result<Option<Vec<Audio>>> {
        let Some(album) = self.albums.details_entry(&params.id).await? else {
            return Ok(None);
        };
        if !album.details_fetched || self.ledger.is_expired(&params.cache_key()).await? {
            return Ok(None);
        }
        Ok(Some(album.audios))
    }

    async fn write(&self, params: &AlbumParams, response: AlbumDetails) -> Result<usize> {
        let AlbumDetails { album, audios } = response;
        let mut tx = self.albums.pool().begin().await?;

        let mut entry = match self.albums.details_entry_in(&mut *tx, &params.id).await? {
            Some(existing) => existing,
            None => {
                let mut entry = album.clone();
                let id = entry.id.clone();
                entry.assign_position("", 0, 0, id);
                entry
            }
        };
        entry.audios = audios.clone();
        entry.details_fetched = true;
        entry.year = album.year;
        self.albums.upsert(&mut *tx, &entry).await?;

        let inserted = self
            .audios
            .insert_missing(&mut *tx, &as_standalone(&audios))
            .await?;
        tx.commit().await?;

        self.ledger.save(&params.cache_key()).await?;
        self.tracker.notify(&[Album::TABLE, Audio::TABLE]);

        debug!(album = %params.id, audios = audios.len(), inserted, "Stored album details");
        Ok(audios.len())
    }

    async fn delete(&self, params: &AlbumParams) -> Result<()> {
        let mut conn = self.albums.pool().acquire().await?;
        self.albums.delete_by_primary_key(&mut conn, &params.id).await?;
        drop(conn);

        self.ledger.clear(&params.cache_key()).await?;
        self.tracker.notify(&[Album::TABLE]);
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        let mut conn = self.albums.pool().acquire().await?;
        self.albums.delete_all(&mut conn).await?;
        drop(conn);

        self.ledger.clear_store().await?;
        self.tracker.notify(&[Album::TABLE]);
        Ok(())
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.tracker.subscribe(Album::TABLE)
    }
}

pub(crate) fn artist_details_store(context: &DataContext) -> ArtistDetailsStore {
    let ledger = context.ledger("artist_details", context.staleness.artist_details);
    Store::new(
        "artist_details",
        Arc::new(ArtistDetailsFetcher::new(context.api.clone())),
        Arc::new(ArtistDetailsSource::new(
            context.pool.clone(),
            ledger,
            context.tracker.clone(),
        )),
    )
}

pub(crate) fn album_details_store(context: &DataContext) -> AlbumDetailsStore {
    let ledger = context.ledger("album_details", context.staleness.album_details);
    Store::new(
        "album_details",
        Arc::new(AlbumDetailsFetcher::new(context.api.clone())),
        Arc::new(AlbumDetailsSource::new(
            context.pool.clone(),
            ledger,
            context.tracker.clone(),
        )),
    )
}
