use crate::error::Result;
use async_trait::async_trait;

/// Remote side of a [`Store`](super::Store).
///
/// Implementations return [`DataError::EmptyResult`](crate::DataError::EmptyResult)
/// when a response carries nothing of the requested kind.
#[async_trait]
pub trait Fetcher<K, T>: Send + Sync + 'static
where
    K: Send + Sync,
{
    async fn fetch(&self, key: &K) -> Result<T>;
}
