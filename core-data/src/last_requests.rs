//! Staleness ledger
//!
//! Remembers when each key was last fetched successfully. Records live in the
//! host [`SettingsStore`] under `last_requests_<name>_<key>` as epoch
//! milliseconds, so they survive restarts alongside the cached rows.

use crate::error::Result;
use bridge_traits::{Clock, SettingsStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

pub const LAST_REQUESTS_PREFIX: &str = "last_requests_";

#[derive(Clone)]
pub struct LastRequests {
    name: String,
    settings: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl LastRequests {
    /// A ledger named `name` (e.g. `search_audios`) with default window `ttl`.
    pub fn new(
        name: impl Into<String>,
        settings: Arc<dyn SettingsStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            settings,
            clock,
            ttl,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn store_prefix(&self) -> String {
        format!("{}{}_", LAST_REQUESTS_PREFIX, self.name)
    }

    fn settings_key(&self, key: &str) -> String {
        format!("{}{}", self.store_prefix(), key)
    }

    /// Records a successful fetch of `key` at the current time.
    pub async fn save(&self, key: &str) -> Result<()> {
        let now = self.clock.unix_timestamp_millis();
        self.settings.set_i64(&self.settings_key(key), now).await?;
        trace!(ledger = %self.name, key, "Saved last request");
        Ok(())
    }

    /// True when `key` has no record or its record is older than the ledger's
    /// window.
    pub async fn is_expired(&self, key: &str) -> Result<bool> {
        self.is_expired_within(key, self.ttl).await
    }

    pub async fn is_expired_within(&self, key: &str, ttl: Duration) -> Result<bool> {
        let Some(saved) = self.settings.get_i64(&self.settings_key(key)).await? else {
            return Ok(true);
        };
        let elapsed = self.clock.unix_timestamp_millis().saturating_sub(saved);
        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Ok(elapsed > ttl_millis)
    }

    pub async fn clear(&self, key: &str) -> Result<()> {
        self.settings.delete(&self.settings_key(key)).await?;
        Ok(())
    }

    /// Clears every record of this ledger whose key starts with `key_prefix`.
    pub async fn clear_prefix(&self, key_prefix: &str) -> Result<usize> {
        let prefix = self.settings_key(key_prefix);
        Ok(self.settings.delete_with_prefix(&prefix).await?)
    }

    /// Clears every record of this ledger.
    pub async fn clear_store(&self) -> Result<usize> {
        self.clear_prefix("").await
    }

    /// Clears the records of every ledger.
    pub async fn clear_all(settings: &dyn SettingsStore) -> Result<usize> {
        let removed = settings.delete_with_prefix(LAST_REQUESTS_PREFIX).await?;
        debug!(removed, "Cleared all staleness records");
        Ok(removed)
    }
}

impl std::fmt::Debug for LastRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LastRequests")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bridge_desktop::SqliteSettingsStore;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Mutex;

    /// Clock that only moves when told to.
    pub(crate) struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        pub(crate) fn new() -> Self {
            Self {
                now: Mutex::new(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()),
            }
        }

        pub(crate) fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += chrono::Duration::from_std(by).unwrap();
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    async fn ledger(name: &str, ttl: Duration) -> (LastRequests, Arc<ManualClock>, Arc<dyn SettingsStore>) {
        let settings: Arc<dyn SettingsStore> = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
        let clock = Arc::new(ManualClock::new());
        let ledger = LastRequests::new(name, settings.clone(), clock.clone(), ttl);
        (ledger, clock, settings)
    }

    #[tokio::test]
    async fn test_missing_record_is_expired() {
        let (ledger, _, _) = ledger("search_audios", Duration::from_secs(60)).await;
        assert!(ledger.is_expired("query=abc#page=0").await.unwrap());
    }

    #[tokio::test]
    async fn test_expires_only_after_ttl() {
        let (ledger, clock, _) = ledger("search_audios", Duration::from_secs(60)).await;
        ledger.save("k").await.unwrap();
        assert!(!ledger.is_expired("k").await.unwrap());

        clock.advance(Duration::from_secs(60));
        assert!(!ledger.is_expired("k").await.unwrap(), "boundary is not expired");

        clock.advance(Duration::from_millis(1));
        assert!(ledger.is_expired("k").await.unwrap());
        assert!(!ledger.is_expired_within("k", Duration::from_secs(3600)).await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_scopes() {
        let (audios, _, settings) = ledger("search_audios", Duration::from_secs(60)).await;
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let artists = LastRequests::new("artist_details", settings.clone(), clock, Duration::from_secs(60));

        audios.save("query=a#page=0").await.unwrap();
        audios.save("query=a#page=1").await.unwrap();
        audios.save("query=b#page=0").await.unwrap();
        artists.save("artist=1").await.unwrap();

        audios.clear("query=b#page=0").await.unwrap();
        assert!(audios.is_expired("query=b#page=0").await.unwrap());

        assert_eq!(audios.clear_prefix("query=a#").await.unwrap(), 2);
        assert!(!artists.is_expired("artist=1").await.unwrap());

        artists.save("artist=2").await.unwrap();
        assert_eq!(LastRequests::clear_all(settings.as_ref()).await.unwrap(), 2);
        assert!(artists.is_expired("artist=1").await.unwrap());
    }
}
