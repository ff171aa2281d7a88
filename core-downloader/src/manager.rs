//! Awaitable adapter over the callback-based download engine

use crate::bridge::single_resume;
use crate::error::{DownloaderError, Result};
use bridge_traits::download::{
    DownloadEngine, EngineAction, EngineDownload, EngineError, EngineId, EngineQuery,
    EngineRequest, EngineStatus,
};
use core_runtime::config::DownloaderConfig;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Outcome of handing a request to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEnqueueResult {
    /// The request with its engine id set
    Success(EngineRequest),
    Failed(EngineError),
}

#[derive(Clone)]
pub struct DownloadManager {
    engine: Arc<dyn DownloadEngine>,
    callback_timeout: Duration,
    max_ids_per_query: usize,
}

impl DownloadManager {
    pub fn new(engine: Arc<dyn DownloadEngine>, config: &DownloaderConfig) -> Self {
        let engine_limit = engine.max_ids_per_query().max(1);
        let max_ids_per_query = config
            .max_ids_per_query
            .map_or(engine_limit, |limit| limit.clamp(1, engine_limit));

        Self {
            engine,
            callback_timeout: config.callback_timeout,
            max_ids_per_query,
        }
    }

    pub fn max_ids_per_query(&self) -> usize {
        self.max_ids_per_query
    }

    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn enqueue(&self, request: EngineRequest) -> Result<DownloadEnqueueResult> {
        let (resumer, pending) = single_resume("enqueue");
        self.engine.enqueue(
            request,
            resumer.callback(DownloadEnqueueResult::Success),
            resumer.callback(DownloadEnqueueResult::Failed),
        );
        drop(resumer);

        let result = pending.wait(self.callback_timeout).await?;
        match &result {
            DownloadEnqueueResult::Success(request) => {
                debug!(request_id = ?request.id, "Engine accepted request")
            }
            DownloadEnqueueResult::Failed(error) => warn!(%error, "Engine rejected request"),
        }
        Ok(result)
    }

    async fn query(&self, query: EngineQuery) -> Result<Vec<EngineDownload>> {
        let (resumer, pending) = single_resume("query");
        self.engine
            .query(query, resumer.callback(|downloads: Vec<EngineDownload>| downloads));
        drop(resumer);
        pending.wait(self.callback_timeout).await
    }

    pub async fn get_download(&self, id: EngineId) -> Result<Option<EngineDownload>> {
        let downloads = self.query(EngineQuery::ById(id)).await?;
        Ok(downloads.into_iter().find(|download| download.id == id))
    }

    pub async fn get_downloads(&self) -> Result<Vec<EngineDownload>> {
        self.query(EngineQuery::All).await
    }

    /// Downloads in any of `statuses`, or all of them when `statuses` is empty.
    pub async fn get_downloads_with_statuses(
        &self,
        statuses: &[EngineStatus],
    ) -> Result<Vec<EngineDownload>> {
        if statuses.is_empty() {
            return self.get_downloads().await;
        }
        self.query(EngineQuery::ByStatuses(statuses.to_vec())).await
    }

    /// Downloads among `ids` whose status is in `statuses` (any status when
    /// empty). Id lists longer than the engine's limit are split across
    /// several queries.
    #[instrument(skip(self, ids, statuses), fields(ids = ids.len()))]
    pub async fn get_downloads_with_ids_and_statuses(
        &self,
        ids: &[EngineId],
        statuses: &[EngineStatus],
    ) -> Result<Vec<EngineDownload>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        if !statuses.is_empty() {
            let wanted: HashSet<_> = ids.iter().copied().collect();
            let downloads = self.get_downloads_with_statuses(statuses).await?;
            return Ok(downloads
                .into_iter()
                .filter(|download| wanted.contains(&download.id))
                .collect());
        }

        let mut seen = HashSet::with_capacity(ids.len());
        let unique: Vec<EngineId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        let mut downloads = Vec::with_capacity(unique.len());
        let mut returned = HashSet::with_capacity(unique.len());
        for chunk in unique.chunks(self.max_ids_per_query) {
            let batch = self.query(EngineQuery::ByIds(chunk.to_vec())).await?;
            downloads.extend(batch.into_iter().filter(|download| returned.insert(download.id)));
        }
        Ok(downloads)
    }

    /// Applies `action` to one download.
    #[instrument(skip(self))]
    pub async fn apply(&self, action: EngineAction, id: EngineId) -> Result<()> {
        self.apply_chunk(action, vec![id]).await
    }

    /// Applies `action` to many downloads, chunked like queries. Not atomic:
    /// an engine failure on one chunk is logged and the rest still run.
    /// Returns how many ids the engine accepted.
    #[instrument(skip(self, ids), fields(ids = ids.len()))]
    pub async fn apply_batch(&self, action: EngineAction, ids: &[EngineId]) -> Result<usize> {
        let mut applied = 0;
        for chunk in ids.chunks(self.max_ids_per_query) {
            match self.apply_chunk(action, chunk.to_vec()).await {
                Ok(()) => applied += chunk.len(),
                Err(DownloaderError::Engine(error)) => {
                    warn!(
                        action = action.as_str(),
                        ids = chunk.len(),
                        %error,
                        "Engine action failed for batch"
                    );
                }
                Err(error) => return Err(error),
            }
        }
        Ok(applied)
    }

    async fn apply_chunk(&self, action: EngineAction, ids: Vec<EngineId>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let (resumer, pending) = single_resume(action.as_str());
        let callback = resumer.callback(|outcome: std::result::Result<(), EngineError>| outcome);
        self.engine.apply(action, ids, callback);
        drop(resumer);
        pending.wait(self.callback_timeout).await??;
        Ok(())
    }

    pub async fn pause(&self, ids: &[EngineId]) -> Result<usize> {
        self.apply_batch(EngineAction::Pause, ids).await
    }

    pub async fn resume(&self, ids: &[EngineId]) -> Result<usize> {
        self.apply_batch(EngineAction::Resume, ids).await
    }

    pub async fn cancel(&self, ids: &[EngineId]) -> Result<usize> {
        self.apply_batch(EngineAction::Cancel, ids).await
    }

    pub async fn retry(&self, ids: &[EngineId]) -> Result<usize> {
        self.apply_batch(EngineAction::Retry, ids).await
    }

    pub async fn remove(&self, ids: &[EngineId]) -> Result<usize> {
        self.apply_batch(EngineAction::Remove, ids).await
    }

    pub async fn delete(&self, ids: &[EngineId]) -> Result<usize> {
        self.apply_batch(EngineAction::Delete, ids).await
    }
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("callback_timeout", &self.callback_timeout)
            .field("max_ids_per_query", &self.max_ids_per_query)
            .finish_non_exhaustive()
    }
}
