//! Item metadata as cached by the metadata store.

use crate::path::CloudPath;
use std::fmt;
use std::time::SystemTime;

/// Identifier assigned to an item by the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub u64);

impl ItemId {
    /// Identifier of the root container.
    pub const ROOT: ItemId = ItemId(1);
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of item in the cloud namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    /// A regular file.
    File,
    /// A folder.
    Folder,
}

/// Synchronization state of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ItemStatus {
    /// Present in the cloud and in sync with the local cache.
    #[default]
    Uploaded,
    /// A local change is being pushed to the cloud.
    Uploading,
    /// The last upload failed.
    UploadError,
}

/// Cached metadata of a single file or folder.
///
/// Items own no locks; they are the unit tasks refer to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemMetadata {
    /// Store-assigned identifier, `None` until first cached.
    pub id: Option<ItemId>,
    /// Display name (last path component).
    pub name: String,
    /// File or folder.
    pub item_type: ItemType,
    /// Size in bytes, if known.
    pub size: Option<u64>,
    /// Identifier of the containing folder.
    pub parent_id: ItemId,
    /// Last modification time reported by the cloud.
    pub last_modified: Option<SystemTime>,
    /// Synchronization state.
    pub status: ItemStatus,
    /// Location in the cloud namespace.
    pub cloud_path: CloudPath,
    /// Whether the item exists only locally so far.
    pub is_placeholder: bool,
}

impl ItemMetadata {
    /// Create metadata for an item at `cloud_path`, naming it after the last component.
    pub fn new(cloud_path: CloudPath, item_type: ItemType, parent_id: ItemId) -> Self {
        Self {
            id: None,
            name: cloud_path.file_name().unwrap_or_default().to_string(),
            item_type,
            size: None,
            parent_id,
            last_modified: None,
            status: ItemStatus::Uploaded,
            cloud_path,
            is_placeholder: false,
        }
    }

    /// Metadata for a file or folder that has not been uploaded yet.
    #[must_use]
    pub fn placeholder(mut self) -> Self {
        self.status = ItemStatus::Uploading;
        self.is_placeholder = true;
        self
    }

    /// Set the store identifier.
    #[must_use]
    pub fn with_id(mut self, id: ItemId) -> Self {
        self.id = Some(id);
        self
    }

    /// Point the item at a new location, keeping `name` in sync.
    pub fn relocate(&mut self, cloud_path: CloudPath) {
        self.name = cloud_path.file_name().unwrap_or_default().to_string();
        self.cloud_path = cloud_path;
    }

    /// Apply what the cloud reported after a successful upload.
    pub fn mark_uploaded(&mut self, cloud: &CloudItemMetadata) {
        self.last_modified = cloud.last_modified;
        self.size = cloud.size;
        self.status = ItemStatus::Uploaded;
        self.is_placeholder = false;
    }

    /// Check if this is a folder.
    pub fn is_folder(&self) -> bool {
        self.item_type == ItemType::Folder
    }
}

/// Metadata returned by the cloud for a stored or listed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudItemMetadata {
    /// Item name.
    pub name: String,
    /// Location in the cloud namespace.
    pub cloud_path: CloudPath,
    /// File or folder.
    pub item_type: ItemType,
    /// Last modification time, if reported.
    pub last_modified: Option<SystemTime>,
    /// Size in bytes, if reported.
    pub size: Option<u64>,
}

/// One page of a folder listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemList {
    /// Items on this page.
    pub items: Vec<CloudItemMetadata>,
    /// Token for the next page, `None` on the last page.
    pub next_page_token: Option<String>,
}
