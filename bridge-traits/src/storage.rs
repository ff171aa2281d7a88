//! Preferences Storage Abstraction

use async_trait::async_trait;

use crate::error::Result;

/// Key-value settings storage trait
///
/// Abstracts platform-specific preferences storage:
/// - iOS: UserDefaults
/// - Android: SharedPreferences / DataStore
/// - Desktop: SQLite-backed key-value table
///
/// The data core keeps small pieces of state here: staleness timestamps,
/// the downloads location and the songs grouping preference.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn remember(store: &dyn SettingsStore) -> Result<()> {
///     store.set_string("downloads_location", "file:///music").await?;
///     store.set_i64("last_requests_search_audios_query=abc#page=0", 1_700_000_000_000).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Store a string value
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Store an integer value
    async fn set_i64(&self, key: &str, value: i64) -> Result<()>;

    /// Retrieve an integer value
    async fn get_i64(&self, key: &str) -> Result<Option<i64>>;

    /// Delete a setting. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List all setting keys
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Delete every key starting with `prefix`, returning how many were removed.
    async fn delete_with_prefix(&self, prefix: &str) -> Result<usize> {
        let mut removed = 0;
        for key in self.list_keys().await? {
            if key.starts_with(prefix) {
                self.delete(&key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
