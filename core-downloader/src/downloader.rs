//! # Downloader
//!
//! Entry point used by the UI: enqueues audios after reconciling any earlier
//! request with the engine, drives batch actions over download items and
//! owns the downloads location flow.
//!
//! Outcomes the user should see are reported on [`DownloaderEvents`], the
//! return values only say whether something was enqueued.

use crate::error::{DownloaderError, Result};
use crate::events::{DownloaderEvent, DownloaderEvents, DownloaderMessage};
use crate::grouping::{AudioDestination, DownloadsSongsGrouping, DOWNLOADS_SONGS_GROUPING_KEY};
use crate::location::DownloadsLocation;
use crate::manager::{DownloadEnqueueResult, DownloadManager};
use crate::models::{AudioDownloadItem, DownloadInfo, DownloadItem, DownloadItems, DownloadRequest};
use crate::observer::{DownloadStatusPoller, ObserveDownloads, ObserveDownloadsParams};
use crate::repository::DownloadRequestRepository;
use bridge_traits::documents::DocumentTree;
use bridge_traits::download::{
    EngineAction, EngineDownload, EngineError, EngineId, EngineRequest, EngineStatus,
};
use bridge_traits::storage::SettingsStore;
use bridge_traits::time::Clock;
use core_data::models::Audio;
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
use futures::stream::BoxStream;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Appends the `redirect` flag the API expects on download links. `None`
/// for audios without a usable URL.
pub fn download_url(audio: &Audio) -> Option<String> {
    let url = audio.download_url.as_deref()?.trim();
    if url.is_empty() {
        return None;
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    Some(format!("{url}{separator}redirect="))
}

#[derive(Clone)]
pub struct Downloader {
    repo: Arc<dyn DownloadRequestRepository>,
    manager: DownloadManager,
    location: DownloadsLocation,
    documents: Arc<dyn DocumentTree>,
    settings: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
    observer: ObserveDownloads,
    bus: Option<EventBus>,
    /// Audio waiting for a downloads location
    pending: Arc<Mutex<Option<Audio>>>,
}

impl Downloader {
    pub fn new(
        repo: Arc<dyn DownloadRequestRepository>,
        manager: DownloadManager,
        poller: DownloadStatusPoller,
        location: DownloadsLocation,
        documents: Arc<dyn DocumentTree>,
        settings: Arc<dyn SettingsStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            observer: ObserveDownloads::new(repo.clone(), poller),
            repo,
            manager,
            location,
            documents,
            settings,
            clock,
            bus: None,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.location = self.location.with_event_bus(bus.clone());
        self.bus = Some(bus);
        self
    }

    fn publish(&self, event: DownloadEvent) {
        if let Some(bus) = &self.bus {
            let _ = bus.emit(CoreEvent::Download(event));
        }
    }

    fn events(&self) -> &DownloaderEvents {
        self.location.events()
    }

    pub fn subscribe_events(&self) -> watch::Receiver<Option<DownloaderEvent>> {
        self.events().subscribe()
    }

    pub fn latest_event(&self) -> Option<DownloaderEvent> {
        self.events().latest()
    }

    pub fn manager(&self) -> &DownloadManager {
        &self.manager
    }

    pub fn location(&self) -> &DownloadsLocation {
        &self.location
    }

    pub fn pending_audio(&self) -> Option<Audio> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ------------------------------------------------------------------
    // Enqueue
    // ------------------------------------------------------------------

    /// Downloads `audio` into the downloads location.
    ///
    /// Returns `Ok(true)` when a new engine request was created and `Ok(false)`
    /// when the flow stopped early with an event for the user.
    #[instrument(skip(self, audio), fields(id = %audio.id))]
    pub async fn enqueue_audio(&self, audio: Audio) -> Result<bool> {
        if !self.reconcile_existing(&audio).await? {
            return Ok(false);
        }

        let Some(location) = self.location.verify_and_get_location().await? else {
            debug!("No usable downloads location, keeping audio as pending");
            *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(audio);
            return Ok(false);
        };

        let Some(url) = download_url(&audio) else {
            warn!("Audio has no download URL");
            self.events().message(DownloaderMessage::InvalidUrl);
            return Ok(false);
        };

        let destination = AudioDestination::for_audio(&audio, self.songs_grouping().await?);
        let file = match self
            .documents
            .create_document(
                &location,
                &destination.directories,
                &destination.display_name,
                destination.mime_type,
            )
            .await
        {
            Ok(file) => file,
            Err(error) => {
                warn!(%error, path = %destination.relative_path(), "Creating download file failed");
                self.report_create_failure(&location, audio).await;
                return Ok(false);
            }
        };

        match self.manager.enqueue(EngineRequest::new(url, file)).await? {
            DownloadEnqueueResult::Success(request) => {
                let Some(request_id) = request.id else {
                    return Err(self.enqueue_failed(
                        &audio,
                        EngineError::new("MISSING_ID", "engine accepted the request without an id"),
                    ));
                };
                if let Err(error) = self.record_queued(&audio, request_id).await {
                    warn!(request_id, %error, "Recording queued download failed, withdrawing it");
                    if let Err(cleanup) = self.manager.delete(&[request_id]).await {
                        warn!(request_id, error = %cleanup, "Deleting unrecorded engine download failed");
                    }
                    return Err(error);
                }

                info!(request_id, "Audio download queued");
                self.events().message(DownloaderMessage::Queued);
                self.publish(DownloadEvent::Enqueued {
                    entity_id: audio.id.clone(),
                    request_id,
                });
                Ok(true)
            }
            DownloadEnqueueResult::Failed(error) => Err(self.enqueue_failed(&audio, error)),
        }
    }

    async fn record_queued(&self, audio: &Audio, request_id: EngineId) -> Result<()> {
        let row = DownloadRequest::from_audio(audio, self.clock.unix_timestamp_millis())?
            .with_request_id(request_id);
        self.repo.upsert(&row).await
    }

    fn enqueue_failed(&self, audio: &Audio, error: EngineError) -> DownloaderError {
        self.events().emit(DownloaderEvent::FetchError {
            message: error.to_string(),
        });
        self.publish(DownloadEvent::EnqueueFailed {
            entity_id: audio.id.clone(),
            message: error.to_string(),
        });
        DownloaderError::EngineEnqueue(error)
    }

    async fn report_create_failure(&self, location: &str, audio: Audio) {
        let folder_exists = match self.documents.exists(location).await {
            Ok(exists) => exists,
            Err(error) => {
                warn!(%error, "Checking downloads location failed");
                false
            }
        };

        if folder_exists {
            self.events().message(DownloaderMessage::FileCreateFailed);
        } else {
            // Retried once a new location is chosen
            self.events().message(DownloaderMessage::FolderNotFound);
            *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(audio);
            self.events().emit(DownloaderEvent::ChooseDownloadsLocation);
        }
    }

    /// Checks an earlier request for the same audio against the engine.
    /// Returns whether enqueuing should go on.
    async fn reconcile_existing(&self, audio: &Audio) -> Result<bool> {
        let Some(existing) = self.repo.find(&audio.id).await? else {
            return Ok(true);
        };

        let download = match existing.request_id {
            Some(request_id) => self.manager.get_download(request_id).await?,
            None => None,
        };
        let Some(download) = download else {
            debug!("Dropping download request unknown to the engine");
            self.repo.delete(&existing.id).await?;
            return Ok(true);
        };

        match download.status {
            EngineStatus::Failed | EngineStatus::Cancelled => {
                debug!(status = ?download.status, "Replacing failed download");
                self.manager.delete(&[download.id]).await?;
                self.repo.delete(&existing.id).await?;
                Ok(true)
            }
            EngineStatus::Paused => {
                self.manager.resume(&[download.id]).await?;
                self.events().message(DownloaderMessage::ResumedExisting);
                Ok(false)
            }
            EngineStatus::Queued | EngineStatus::Downloading => {
                self.events().message(DownloaderMessage::AlreadyQueued);
                Ok(false)
            }
            EngineStatus::Completed => {
                if self.file_exists(&download).await {
                    self.events().message(DownloaderMessage::AlreadyCompleted);
                    Ok(false)
                } else {
                    debug!(file = %download.file, "Completed download lost its file");
                    self.manager.remove(&[download.id]).await?;
                    self.repo.delete(&existing.id).await?;
                    Ok(true)
                }
            }
        }
    }

    async fn file_exists(&self, download: &EngineDownload) -> bool {
        self.documents.exists(&download.file).await.unwrap_or_else(|error| {
            warn!(%error, file = %download.file, "Checking downloaded file failed");
            false
        })
    }

    // ------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------

    async fn apply(&self, action: EngineAction, items: &[DownloadItem]) -> Result<usize> {
        let ids: Vec<EngineId> = items.iter().filter_map(|item| item.info().id()).collect();
        let count = self.manager.apply_batch(action, &ids).await?;
        self.publish(DownloadEvent::ActionApplied {
            action: action.as_str().to_string(),
            count,
        });
        Ok(count)
    }

    pub async fn pause(&self, items: &[DownloadItem]) -> Result<usize> {
        self.apply(EngineAction::Pause, items).await
    }

    pub async fn resume(&self, items: &[DownloadItem]) -> Result<usize> {
        self.apply(EngineAction::Resume, items).await
    }

    pub async fn cancel(&self, items: &[DownloadItem]) -> Result<usize> {
        self.apply(EngineAction::Cancel, items).await
    }

    pub async fn retry(&self, items: &[DownloadItem]) -> Result<usize> {
        self.apply(EngineAction::Retry, items).await
    }

    /// Removes the engine downloads, keeping their files, and the ledger rows.
    pub async fn remove(&self, items: &[DownloadItem]) -> Result<usize> {
        self.apply(EngineAction::Remove, items).await?;
        self.delete_requests(items).await
    }

    /// Like [`remove`](Self::remove) but also deletes the files.
    pub async fn delete(&self, items: &[DownloadItem]) -> Result<usize> {
        self.apply(EngineAction::Delete, items).await?;
        self.delete_requests(items).await
    }

    async fn delete_requests(&self, items: &[DownloadItem]) -> Result<usize> {
        let ids: Vec<String> = items.iter().map(|item| item.request().id.clone()).collect();
        let count = self.repo.delete_many(&ids).await? as usize;
        self.publish(DownloadEvent::RequestsRemoved { count });
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// The download of audio `id` if its engine status is one of
    /// `allowed_statuses`, completed only when that is empty.
    pub async fn get_audio_download(
        &self,
        id: &str,
        allowed_statuses: &[EngineStatus],
    ) -> Result<Option<AudioDownloadItem>> {
        let Some(request) = self.repo.find(id).await? else {
            return Ok(None);
        };
        let Some(request_id) = request.request_id else {
            return Ok(None);
        };
        let Some(download) = self.manager.get_download(request_id).await? else {
            return Ok(None);
        };

        let allowed = if allowed_statuses.is_empty() {
            &[EngineStatus::Completed][..]
        } else {
            allowed_statuses
        };
        if !allowed.contains(&download.status) {
            return Ok(None);
        }
        AudioDownloadItem::from_request(request, DownloadInfo::Engine(download)).map(Some)
    }

    pub fn observe(
        &self,
        params: ObserveDownloadsParams,
    ) -> BoxStream<'static, Result<DownloadItems>> {
        self.observer.observe(params)
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    /// Persists the location, then enqueues the audio that was waiting for it.
    #[instrument(skip(self))]
    pub async fn set_location(&self, uri: &str) -> Result<()> {
        self.location.set_location(uri).await?;

        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(audio) = pending {
            debug!(id = %audio.id, "Enqueuing pending audio");
            self.enqueue_audio(audio).await?;
        }
        Ok(())
    }

    pub async fn reset_location(&self) -> Result<()> {
        self.location.reset_location().await
    }

    pub async fn songs_grouping(&self) -> Result<DownloadsSongsGrouping> {
        let value = self.settings.get_string(DOWNLOADS_SONGS_GROUPING_KEY).await?;
        Ok(DownloadsSongsGrouping::from_setting(value.as_deref()))
    }

    pub async fn set_songs_grouping(&self, grouping: DownloadsSongsGrouping) -> Result<()> {
        self.settings
            .set_string(DOWNLOADS_SONGS_GROUPING_KEY, grouping.as_str())
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("manager", &self.manager)
            .field("pending", &self.pending_audio().map(|audio| audio.id))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(url: Option<&str>) -> Audio {
        Audio {
            id: "1".to_string(),
            download_url: url.map(str::to_string),
            ..Audio::default()
        }
    }

    #[test]
    fn test_download_url_adds_redirect() {
        assert_eq!(
            download_url(&audio(Some("https://cdn.test/a.mp3"))).as_deref(),
            Some("https://cdn.test/a.mp3?redirect=")
        );
        assert_eq!(
            download_url(&audio(Some("https://cdn.test/dl?id=1"))).as_deref(),
            Some("https://cdn.test/dl?id=1&redirect=")
        );
    }

    #[test]
    fn test_missing_download_url() {
        assert_eq!(download_url(&audio(None)), None);
        assert_eq!(download_url(&audio(Some("  "))), None);
    }
}
