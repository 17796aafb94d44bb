//! Cloud backend interface.
//!
//! Backends (WebDAV, S3, vendor APIs) live outside this crate. The pipeline
//! only needs the handful of namespace operations below, all addressed by
//! [`CloudPath`].

use crate::error::CloudProviderError;
use crate::item::{CloudItemMetadata, ItemList};
use crate::path::CloudPath;
use async_trait::async_trait;
use bytes::Bytes;

/// Result type for cloud backend calls.
pub type CloudResult<T> = Result<T, CloudProviderError>;

/// A remote storage backend.
///
/// Implementations must be safe to call concurrently; the pipeline decides
/// which calls may overlap.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// List one page of the folder at `path`.
    async fn list(&self, path: &CloudPath, page_token: Option<&str>) -> CloudResult<ItemList>;

    /// Fetch the contents of the file at `path`.
    async fn fetch(&self, path: &CloudPath) -> CloudResult<Bytes>;

    /// Store `contents` at `path`.
    ///
    /// With `is_update == false` the call fails with
    /// [`CloudProviderError::ItemAlreadyExists`] if something is already
    /// there; with `is_update == true` an existing file is replaced.
    async fn store(&self, path: &CloudPath, contents: Bytes, is_update: bool) -> CloudResult<CloudItemMetadata>;

    /// Create a folder at `path`.
    async fn create_folder(&self, path: &CloudPath) -> CloudResult<CloudItemMetadata>;

    /// Delete the file or folder (recursively) at `path`.
    async fn delete(&self, path: &CloudPath) -> CloudResult<()>;

    /// Move the item at `source` to `target`.
    async fn move_item(&self, source: &CloudPath, target: &CloudPath) -> CloudResult<CloudItemMetadata>;
}

