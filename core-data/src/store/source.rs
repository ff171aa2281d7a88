use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::watch;

/// Local side of a [`Store`](super::Store).
///
/// `T` is what the fetcher returns, `V` is what readers get back. A source
/// owns its staleness records: `read` treats an expired key as absent and
/// `write` marks the key fresh once the rows are committed.
#[async_trait]
pub trait SourceOfTruth<K, T, V>: Send + Sync + 'static
where
    K: Send + Sync,
    T: Send + 'static,
{
    /// Valid cached value, or `None` when absent or stale.
    async fn read(&self, key: &K) -> Result<Option<V>>;

    /// Writes a fetched value in one transaction. Returns the number of
    /// primary rows written.
    async fn write(&self, key: &K, value: T) -> Result<usize>;

    /// Deletes the rows and staleness record of one key.
    async fn delete(&self, key: &K) -> Result<()>;

    /// Deletes everything this source owns.
    async fn delete_all(&self) -> Result<()>;

    /// Version counter bumped after each committed write to the backing table.
    fn changes(&self) -> watch::Receiver<u64>;
}
