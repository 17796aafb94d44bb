//! Terminal handlers that perform the cloud operation of a task.
//!
//! Each executor accepts exactly one task kind and rejects every other kind
//! with [`SyncError::IncompatibleTask`]. Executors never delegate further.
//! Cloud failures are returned as [`SyncError::Cloud`]; translating them is
//! the [`ErrorMapper`](super::ErrorMapper)'s job.

use super::middleware::WorkflowMiddleware;
use super::TaskOutcome;
use crate::cloud::CloudProvider;
use crate::error::{SyncError, SyncResult};
use crate::item::{CloudItemMetadata, ItemMetadata, ItemStatus};
use crate::metadata::MetadataStore;
use crate::task::CloudTask;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

fn incompatible(handler: &'static str, task: &CloudTask) -> SyncError {
    SyncError::IncompatibleTask {
        handler,
        kind: task.kind(),
    }
}

/// Persist an item after the cloud accepted a change to it.
fn record_in_cloud(
    metadata: &dyn MetadataStore,
    item: &mut ItemMetadata,
    cloud: &CloudItemMetadata,
) -> SyncResult<()> {
    item.mark_uploaded(cloud);
    metadata.cache(item)?;
    Ok(())
}

/// Lists one page of a folder.
pub struct ItemEnumerationExecutor {
    cloud: Arc<dyn CloudProvider>,
}

impl ItemEnumerationExecutor {
    pub const NAME: &'static str = "ItemEnumerationExecutor";

    pub fn new(cloud: Arc<dyn CloudProvider>) -> Self {
        Self { cloud }
    }
}

#[async_trait]
impl WorkflowMiddleware for ItemEnumerationExecutor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, task: CloudTask) -> SyncResult<TaskOutcome> {
        let CloudTask::ItemEnumeration { item, page_token } = task else {
            return Err(incompatible(Self::NAME, &task));
        };
        let list = self.cloud.list(&item.cloud_path, page_token.as_deref()).await?;
        debug!(path = %item.cloud_path, items = list.items.len(), more = list.next_page_token.is_some(), "Enumerated folder");
        Ok(TaskOutcome::Listed(list))
    }
}

/// Fetches the contents of a file.
pub struct DownloadExecutor {
    cloud: Arc<dyn CloudProvider>,
}

impl DownloadExecutor {
    pub const NAME: &'static str = "DownloadExecutor";

    pub fn new(cloud: Arc<dyn CloudProvider>) -> Self {
        Self { cloud }
    }
}

#[async_trait]
impl WorkflowMiddleware for DownloadExecutor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, task: CloudTask) -> SyncResult<TaskOutcome> {
        let CloudTask::Download { item } = task else {
            return Err(incompatible(Self::NAME, &task));
        };
        let contents = self.cloud.fetch(&item.cloud_path).await?;
        debug!(path = %item.cloud_path, bytes = contents.len(), "Downloaded file");
        Ok(TaskOutcome::Downloaded { item, contents })
    }
}

/// Stores file contents and records the upload in the metadata store.
///
/// Placeholders are created; anything else replaces the existing file. A
/// failed upload marks the cached item with [`ItemStatus::UploadError`].
pub struct UploadExecutor {
    cloud: Arc<dyn CloudProvider>,
    metadata: Arc<dyn MetadataStore>,
}

impl UploadExecutor {
    pub const NAME: &'static str = "UploadExecutor";

    pub fn new(cloud: Arc<dyn CloudProvider>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self { cloud, metadata }
    }
}

#[async_trait]
impl WorkflowMiddleware for UploadExecutor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, task: CloudTask) -> SyncResult<TaskOutcome> {
        let CloudTask::Upload { mut item, contents } = task else {
            return Err(incompatible(Self::NAME, &task));
        };
        let is_update = !item.is_placeholder;

        match self.cloud.store(&item.cloud_path, contents, is_update).await {
            Ok(stored) => {
                record_in_cloud(self.metadata.as_ref(), &mut item, &stored)?;
                debug!(path = %item.cloud_path, is_update, "Uploaded file");
                Ok(TaskOutcome::Uploaded(item))
            }
            Err(e) => {
                if item.id.is_some() {
                    item.status = ItemStatus::UploadError;
                    if let Err(store_err) = self.metadata.update(&item) {
                        warn!(path = %item.cloud_path, error = %store_err, "Failed to record upload error");
                    }
                }
                Err(e.into())
            }
        }
    }
}

/// Creates a folder and records it in the metadata store.
pub struct FolderCreationExecutor {
    cloud: Arc<dyn CloudProvider>,
    metadata: Arc<dyn MetadataStore>,
}

impl FolderCreationExecutor {
    pub const NAME: &'static str = "FolderCreationExecutor";

    pub fn new(cloud: Arc<dyn CloudProvider>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self { cloud, metadata }
    }
}

#[async_trait]
impl WorkflowMiddleware for FolderCreationExecutor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, task: CloudTask) -> SyncResult<TaskOutcome> {
        let CloudTask::FolderCreation { mut item } = task else {
            return Err(incompatible(Self::NAME, &task));
        };
        let created = self.cloud.create_folder(&item.cloud_path).await?;
        record_in_cloud(self.metadata.as_ref(), &mut item, &created)?;
        debug!(path = %item.cloud_path, "Created folder");
        Ok(TaskOutcome::FolderCreated(item))
    }
}

/// Deletes a file or folder.
pub struct DeletionExecutor {
    cloud: Arc<dyn CloudProvider>,
}

impl DeletionExecutor {
    pub const NAME: &'static str = "DeletionExecutor";

    pub fn new(cloud: Arc<dyn CloudProvider>) -> Self {
        Self { cloud }
    }
}

#[async_trait]
impl WorkflowMiddleware for DeletionExecutor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, task: CloudTask) -> SyncResult<TaskOutcome> {
        let CloudTask::Deletion { item } = task else {
            return Err(incompatible(Self::NAME, &task));
        };
        self.cloud.delete(&item.cloud_path).await?;
        debug!(path = %item.cloud_path, "Deleted item");
        Ok(TaskOutcome::Deleted)
    }
}

/// Moves an item and records its new location.
pub struct ReparentExecutor {
    cloud: Arc<dyn CloudProvider>,
    metadata: Arc<dyn MetadataStore>,
}

impl ReparentExecutor {
    pub const NAME: &'static str = "ReparentExecutor";

    pub fn new(cloud: Arc<dyn CloudProvider>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self { cloud, metadata }
    }
}

#[async_trait]
impl WorkflowMiddleware for ReparentExecutor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, task: CloudTask) -> SyncResult<TaskOutcome> {
        let CloudTask::Reparent { mut item, source } = task else {
            return Err(incompatible(Self::NAME, &task));
        };
        let moved = self.cloud.move_item(&source, &item.cloud_path).await?;
        record_in_cloud(self.metadata.as_ref(), &mut item, &moved)?;
        debug!(from = %source, to = %item.cloud_path, "Moved item");
        Ok(TaskOutcome::Moved(item))
    }
}
