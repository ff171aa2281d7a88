//! Search result stores, one per entity kind

use super::{DataContext, Fetcher, SourceOfTruth, Store};
use crate::error::{DataError, Result};
use crate::invalidation::InvalidationTracker;
use crate::last_requests::LastRequests;
use crate::models::{Album, Artist, Audio};
use crate::params::{BackendType, SearchParams};
use crate::remote::{ApiData, DatmusicApi};
use crate::repositories::{EntityTable, PaginatedEntityRepository};
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

pub type SearchStore<E> = Store<SearchParams, Vec<E>, Vec<E>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchKind {
    Audios,
    Artists,
    Albums,
}

impl SearchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchKind::Audios => "audios",
            SearchKind::Artists => "artists",
            SearchKind::Albums => "albums",
        }
    }

    /// Staleness ledger name, e.g. `search_audios`.
    pub fn ledger_name(&self) -> String {
        format!("search_{}", self.as_str())
    }

    /// Backends requested for this kind. Audio searches keep the caller's
    /// audio backends, falling back to plain `audios`.
    pub fn backends(&self, params: &SearchParams) -> Vec<BackendType> {
        match self {
            SearchKind::Audios => {
                let backends: Vec<_> = params
                    .backends
                    .iter()
                    .copied()
                    .filter(BackendType::is_audio)
                    .collect();
                if backends.is_empty() {
                    vec![BackendType::Audios]
                } else {
                    backends
                }
            }
            SearchKind::Artists => vec![BackendType::Artists],
            SearchKind::Albums => vec![BackendType::Albums],
        }
    }
}

/// An entity kind that can be searched for.
pub trait SearchEntity: EntityTable {
    const KIND: SearchKind;

    fn from_response(data: ApiData) -> Vec<Self>;
}

impl SearchEntity for Audio {
    const KIND: SearchKind = SearchKind::Audios;

    fn from_response(data: ApiData) -> Vec<Self> {
        data.all_audios()
    }
}

impl SearchEntity for Artist {
    const KIND: SearchKind = SearchKind::Artists;

    fn from_response(data: ApiData) -> Vec<Self> {
        data.artists
    }
}

impl SearchEntity for Album {
    const KIND: SearchKind = SearchKind::Albums;

    fn from_response(data: ApiData) -> Vec<Self> {
        data.albums
    }
}

pub struct SearchFetcher<E> {
    api: DatmusicApi,
    _entity: PhantomData<fn() -> E>,
}

impl<E> SearchFetcher<E> {
    pub fn new(api: DatmusicApi) -> Self {
        Self {
            api,
            _entity: PhantomData,
        }
    }
}

#[async_trait]
impl<E: SearchEntity> Fetcher<SearchParams, Vec<E>> for SearchFetcher<E> {
    async fn fetch(&self, params: &SearchParams) -> Result<Vec<E>> {
        let backends = E::KIND.backends(params);
        let data = self.api.multisearch(params, &backends).await?;
        let entries = E::from_response(data);
        if entries.is_empty() {
            return Err(DataError::EmptyResult(params.page_key()));
        }
        Ok(entries)
    }
}

pub struct SearchSource<E> {
    repo: PaginatedEntityRepository<E>,
    ledger: LastRequests,
    tracker: InvalidationTracker,
}

impl<E: SearchEntity> SearchSource<E> {
    pub fn new(
        repo: PaginatedEntityRepository<E>,
        ledger: LastRequests,
        tracker: InvalidationTracker,
    ) -> Self {
        Self {
            repo,
            ledger,
            tracker,
        }
    }
}

#[async_trait]
impl<E: SearchEntity> SourceOfTruth<SearchParams, Vec<E>, Vec<E>> for SearchSource<E> {
    async fn read(&self, params: &SearchParams) -> Result<Option<Vec<E>>> {
        if self.ledger.is_expired(&params.page_key()).await? {
            return Ok(None);
        }
        let entries = self.repo.entries(&params.fingerprint(), params.page).await?;
        Ok((!entries.is_empty()).then_some(entries))
    }

    async fn write(&self, params: &SearchParams, mut entries: Vec<E>) -> Result<usize> {
        let fingerprint = params.fingerprint();
        for (index, entry) in entries.iter_mut().enumerate() {
            let primary_key = params.primary_key_for(entry.id());
            entry.assign_position(&fingerprint, params.page, index as u32, primary_key);
        }

        let mut tx = self.repo.pool().begin().await?;
        self.repo
            .replace_page(&mut *tx, &fingerprint, params.page, &entries)
            .await?;
        tx.commit().await?;

        if params.page == 0 {
            // Other pages were just dropped with their rows
            self.ledger
                .clear_prefix(&format!("{}#page=", fingerprint))
                .await?;
        }
        self.ledger.save(&params.page_key()).await?;
        self.tracker.notify(&[E::TABLE]);

        debug!(kind = E::KIND.as_str(), page = params.page, count = entries.len(), "Stored search page");
        Ok(entries.len())
    }

    async fn delete(&self, params: &SearchParams) -> Result<()> {
        let mut conn = self.repo.pool().acquire().await?;
        self.repo
            .delete_page(&mut conn, &params.fingerprint(), params.page)
            .await?;
        drop(conn);

        self.ledger.clear(&params.page_key()).await?;
        self.tracker.notify(&[E::TABLE]);
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        let mut conn = self.repo.pool().acquire().await?;
        self.repo.delete_all(&mut conn).await?;
        drop(conn);

        self.ledger.clear_store().await?;
        self.tracker.notify(&[E::TABLE]);
        Ok(())
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.tracker.subscribe(E::TABLE)
    }
}

pub(crate) fn search_store<E: SearchEntity>(context: &DataContext, ttl: Duration) -> SearchStore<E> {
    let ledger = context.ledger(&E::KIND.ledger_name(), ttl);
    let source = SearchSource::new(
        PaginatedEntityRepository::<E>::new(context.pool.clone()),
        ledger,
        context.tracker.clone(),
    );
    Store::new(
        format!("search_{}", E::KIND.as_str()),
        Arc::new(SearchFetcher::<E>::new(context.api.clone())),
        Arc::new(source),
    )
}
