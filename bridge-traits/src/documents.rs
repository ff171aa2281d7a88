//! Destination Documents and Permission Grants
//!
//! Downloads are written into a user-chosen directory tree. On mobile hosts
//! access to that tree is a persistable grant that can be revoked at any time,
//! so the core re-checks it before every use.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A persisted permission grant on a URI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UriPermission {
    pub uri: String,
    pub read: bool,
    pub write: bool,
}

impl UriPermission {
    pub fn is_read_write(&self) -> bool {
        self.read && self.write
    }
}

/// Persistable URI permission grants
///
/// - Android: `takePersistableUriPermission` / `persistedUriPermissions`
/// - iOS: security-scoped bookmarks
/// - Desktop: directory access checks
#[async_trait]
pub trait UriPermissions: Send + Sync {
    /// Acquire a persistable read+write grant. Fails if the host refuses.
    async fn take_persistable(&self, uri: &str) -> Result<()>;

    /// Release a previously taken grant. Releasing an unknown grant is not an error.
    async fn release_persistable(&self, uri: &str) -> Result<()>;

    /// Grants currently held by the application
    async fn persisted(&self) -> Result<Vec<UriPermission>>;
}

/// Document provider used to create download destinations
#[async_trait]
pub trait DocumentTree: Send + Sync {
    /// Whether the document or directory behind `uri` exists
    async fn exists(&self, uri: &str) -> Result<bool>;

    /// Create a document named `display_name` under `parent_uri`, creating the
    /// intermediate `directories` as needed. Returns the new document URI.
    async fn create_document(
        &self,
        parent_uri: &str,
        directories: &[String],
        display_name: &str,
        mime_type: &str,
    ) -> Result<String>;
}
