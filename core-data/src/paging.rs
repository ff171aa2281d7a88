//! Paginated search synchronization
//!
//! [`SearchPager`] decides which API page to fetch next and serves the paged
//! view straight from SQLite, so memory stays bounded by the window size
//! rather than by how many pages were fetched.

use crate::error::{DataError, Result};
use crate::params::SearchParams;
use crate::repositories::{Page, PageRequest, PaginatedEntityRepository};
use crate::store::{SearchEntity, SearchStore};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadType {
    /// Restart from page 0, replacing every stored page
    Refresh,
    Prepend,
    /// Fetch the page after the last stored one
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediatorResult {
    pub end_of_pagination: bool,
}

impl MediatorResult {
    fn more() -> Self {
        Self {
            end_of_pagination: false,
        }
    }

    fn end() -> Self {
        Self {
            end_of_pagination: true,
        }
    }
}

pub struct SearchPager<E> {
    store: SearchStore<E>,
    repo: PaginatedEntityRepository<E>,
    exhausted: Arc<Mutex<HashSet<String>>>,
    events: Option<EventBus>,
}

impl<E> Clone for SearchPager<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            repo: self.repo.clone(),
            exhausted: self.exhausted.clone(),
            events: self.events.clone(),
        }
    }
}

impl<E: SearchEntity> SearchPager<E> {
    pub fn new(store: SearchStore<E>, repo: PaginatedEntityRepository<E>) -> Self {
        Self {
            store,
            repo,
            exhausted: Arc::new(Mutex::new(HashSet::new())),
            events: None,
        }
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Highest API page stored for the search.
    pub async fn last_known_page(&self, params: &SearchParams) -> Result<Option<u32>> {
        self.repo.max_page(&params.fingerprint()).await
    }

    pub fn is_exhausted(&self, params: &SearchParams) -> bool {
        self.exhausted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&params.fingerprint())
    }

    fn set_exhausted(&self, fingerprint: &str, exhausted: bool) {
        let mut set = self.exhausted.lock().unwrap_or_else(PoisonError::into_inner);
        if exhausted {
            set.insert(fingerprint.to_string());
        } else {
            set.remove(fingerprint);
        }
    }

    #[instrument(skip(self, params), fields(page = params.page))]
    pub async fn load(&self, params: &SearchParams, load_type: LoadType) -> Result<MediatorResult> {
        let fingerprint = params.fingerprint();
        match load_type {
            LoadType::Prepend => Ok(MediatorResult::end()),
            LoadType::Refresh => {
                self.set_exhausted(&fingerprint, false);
                self.store.fresh(&params.clone().with_page(0)).await?;
                Ok(MediatorResult::more())
            }
            LoadType::Append => {
                if self.is_exhausted(params) {
                    return Ok(MediatorResult::end());
                }
                let Some(last_page) = self.last_known_page(params).await? else {
                    return Ok(MediatorResult::end());
                };

                let next = params.clone().with_page(last_page + 1);
                match self.store.fresh(&next).await {
                    Ok(_) => Ok(MediatorResult::more()),
                    Err(DataError::EmptyResult(_)) => {
                        info!(page = next.page, "Pagination exhausted");
                        self.set_exhausted(&fingerprint, true);
                        if let Some(events) = &self.events {
                            let _ = events.emit(CoreEvent::Cache(CacheEvent::PaginationExhausted {
                                key: fingerprint,
                            }));
                        }
                        Ok(MediatorResult::end())
                    }
                    Err(error) => Err(error),
                }
            }
        }
    }

    /// One window of every stored page, ordered by page then position.
    pub async fn paging_source(&self, params: &SearchParams, request: PageRequest) -> Result<Page<E>> {
        self.repo.entries_page(&params.fingerprint(), request).await
    }

    /// [`SearchPager::paging_source`] re-run after every change to the table.
    pub fn observe_page(
        &self,
        params: SearchParams,
        request: PageRequest,
    ) -> BoxStream<'static, Result<Page<E>>> {
        let pager = self.clone();
        let changes = self.store.changes();

        stream::unfold((changes, true), move |(mut changes, first)| {
            let pager = pager.clone();
            let params = params.clone();
            async move {
                if first {
                    changes.borrow_and_update();
                } else if changes.changed().await.is_err() {
                    return None;
                }
                debug!(window = request.page, "Reloading paged view");
                let page = pager.paging_source(&params, request).await;
                Some((page, (changes, false)))
            }
        })
        .boxed()
    }
}
