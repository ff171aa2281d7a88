//! # Downloads Location
//!
//! The destination directory is a single persisted URI. It is only usable
//! while the application still holds a read+write grant on it, so every use
//! goes through [`DownloadsLocation::verify_and_get_location`].

use crate::error::{DownloaderError, Result};
use crate::events::{DownloaderEvent, DownloaderEvents};
use bridge_traits::documents::UriPermissions;
use bridge_traits::storage::SettingsStore;
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub const DOWNLOADS_LOCATION_KEY: &str = "downloads_location";

#[derive(Clone)]
pub struct DownloadsLocation {
    settings: Arc<dyn SettingsStore>,
    permissions: Arc<dyn UriPermissions>,
    events: DownloaderEvents,
    bus: Option<EventBus>,
}

impl DownloadsLocation {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        permissions: Arc<dyn UriPermissions>,
        events: DownloaderEvents,
    ) -> Self {
        Self {
            settings,
            permissions,
            events,
            bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn events(&self) -> &DownloaderEvents {
        &self.events
    }

    fn publish(&self, event: DownloadEvent) {
        if let Some(bus) = &self.bus {
            let _ = bus.emit(CoreEvent::Download(event));
        }
    }

    /// Stored location, without checking its grant.
    pub async fn get_location(&self) -> Result<Option<String>> {
        let uri = self.settings.get_string(DOWNLOADS_LOCATION_KEY).await?;
        Ok(uri.filter(|uri| !uri.is_empty()))
    }

    pub async fn has_location(&self) -> Result<bool> {
        Ok(self.get_location().await?.is_some())
    }

    /// Whether the application still holds read+write access to `uri`.
    pub async fn has_read_write_grant(&self, uri: &str) -> Result<bool> {
        let grants = self.permissions.persisted().await?;
        Ok(grants
            .iter()
            .any(|grant| grant.uri == uri && grant.is_read_write()))
    }

    /// The usable location, or `None` after emitting the event that asks the
    /// user to fix it.
    #[instrument(skip(self))]
    pub async fn verify_and_get_location(&self) -> Result<Option<String>> {
        let Some(uri) = self.get_location().await? else {
            self.events.emit(DownloaderEvent::ChooseDownloadsLocation);
            return Ok(None);
        };

        if !self.has_read_write_grant(&uri).await? {
            warn!(%uri, "Downloads location lost its read/write grant");
            self.publish(DownloadEvent::PermissionLost { uri: uri.clone() });
            self.events
                .emit(DownloaderEvent::DownloadsLocationPermissionError { uri });
            return Ok(None);
        }
        Ok(Some(uri))
    }

    /// Like [`verify_and_get_location`](Self::verify_and_get_location) but
    /// failing instead of returning `None`.
    pub async fn require_location(&self) -> Result<String> {
        match self.get_location().await? {
            None => {
                self.events.emit(DownloaderEvent::ChooseDownloadsLocation);
                Err(DownloaderError::LocationUnset)
            }
            Some(uri) => match self.verify_and_get_location().await? {
                Some(uri) => Ok(uri),
                None => Err(DownloaderError::Permission { uri }),
            },
        }
    }

    /// Takes the grant first; nothing is persisted if that fails.
    #[instrument(skip(self))]
    pub async fn set_location(&self, uri: &str) -> Result<()> {
        self.permissions
            .take_persistable(uri)
            .await
            .map_err(|error| {
                warn!(%uri, %error, "Could not take downloads location grant");
                DownloaderError::Permission {
                    uri: uri.to_string(),
                }
            })?;
        self.settings.set_string(DOWNLOADS_LOCATION_KEY, uri).await?;

        info!(%uri, "Downloads location set");
        self.publish(DownloadEvent::LocationChanged {
            uri: Some(uri.to_string()),
        });
        Ok(())
    }

    /// Releases the grant and forgets the location.
    #[instrument(skip(self))]
    pub async fn reset_location(&self) -> Result<()> {
        if let Some(uri) = self.get_location().await? {
            if let Err(error) = self.permissions.release_persistable(&uri).await {
                warn!(%uri, %error, "Could not release downloads location grant");
            }
        }
        self.settings.delete(DOWNLOADS_LOCATION_KEY).await?;

        info!("Downloads location reset");
        self.publish(DownloadEvent::LocationChanged { uri: None });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_desktop::SqliteSettingsStore;
    use bridge_traits::documents::UriPermission;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use mockall::mock;

    mock! {
        Permissions {}

        #[async_trait]
        impl UriPermissions for Permissions {
            async fn take_persistable(&self, uri: &str) -> BridgeResult<()>;
            async fn release_persistable(&self, uri: &str) -> BridgeResult<()>;
            async fn persisted(&self) -> BridgeResult<Vec<UriPermission>>;
        }
    }

    const URI: &str = "content://tree/music";

    fn grant(uri: &str, write: bool) -> UriPermission {
        UriPermission {
            uri: uri.to_string(),
            read: true,
            write,
        }
    }

    async fn location(permissions: MockPermissions) -> (DownloadsLocation, DownloaderEvents) {
        let settings = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
        let events = DownloaderEvents::new();
        let location = DownloadsLocation::new(settings, Arc::new(permissions), events.clone());
        (location, events)
    }

    #[tokio::test]
    async fn test_unset_location_asks_to_choose() {
        let (location, events) = location(MockPermissions::new()).await;

        assert_eq!(location.verify_and_get_location().await.unwrap(), None);
        assert_eq!(events.latest(), Some(DownloaderEvent::ChooseDownloadsLocation));
        assert!(matches!(
            location.require_location().await,
            Err(DownloaderError::LocationUnset)
        ));
    }

    #[tokio::test]
    async fn test_set_location_requires_grant() {
        let mut permissions = MockPermissions::new();
        permissions
            .expect_take_persistable()
            .withf(|uri| uri == URI)
            .returning(|_| Err(BridgeError::PermissionDenied("refused".to_string())));
        let (location, _) = location(permissions).await;

        let error = location.set_location(URI).await.unwrap_err();

        assert!(matches!(error, DownloaderError::Permission { .. }));
        assert_eq!(location.get_location().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_verified_location() {
        let mut permissions = MockPermissions::new();
        permissions.expect_take_persistable().returning(|_| Ok(()));
        permissions
            .expect_persisted()
            .returning(|| Ok(vec![grant("content://tree/other", true), grant(URI, true)]));
        let (location, events) = location(permissions).await;

        location.set_location(URI).await.unwrap();

        assert_eq!(
            location.verify_and_get_location().await.unwrap(),
            Some(URI.to_string())
        );
        assert_eq!(events.latest(), None);
    }

    #[tokio::test]
    async fn test_revoked_grant_is_a_permission_error() {
        let mut permissions = MockPermissions::new();
        permissions.expect_take_persistable().returning(|_| Ok(()));
        permissions
            .expect_persisted()
            .returning(|| Ok(vec![grant(URI, false)]));
        let (location, events) = location(permissions).await;
        location.set_location(URI).await.unwrap();

        assert_eq!(location.verify_and_get_location().await.unwrap(), None);
        assert_eq!(
            events.latest(),
            Some(DownloaderEvent::DownloadsLocationPermissionError {
                uri: URI.to_string()
            })
        );
        assert!(matches!(
            location.require_location().await,
            Err(DownloaderError::Permission { .. })
        ));
    }

    #[tokio::test]
    async fn test_reset_releases_grant() {
        let mut permissions = MockPermissions::new();
        permissions.expect_take_persistable().returning(|_| Ok(()));
        permissions
            .expect_release_persistable()
            .withf(|uri| uri == URI)
            .times(1)
            .returning(|_| Ok(()));
        let (location, _) = location(permissions).await;
        location.set_location(URI).await.unwrap();

        location.reset_location().await.unwrap();

        assert!(!location.has_location().await.unwrap());
    }
}
