//! Cloud tasks: the unit of work a workflow executes.
//!
//! A task references exactly one item. Its [`TaskAccess`] decides which
//! locking discipline the pipeline applies around it.

use crate::error::{SyncError, SyncResult};
use crate::item::ItemMetadata;
use crate::path::CloudPath;
use bytes::Bytes;
use std::fmt;

/// The kind of a [`CloudTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// List the children of a folder.
    ItemEnumeration,
    /// Fetch file contents.
    Download,
    /// Store file contents.
    Upload,
    /// Create a folder.
    FolderCreation,
    /// Delete a file or folder.
    Deletion,
    /// Move or rename an item.
    Reparent,
}

/// How a task accesses the namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskAccess {
    /// Reads the item at its path.
    Read,
    /// Creates, replaces or deletes the item at its path.
    Write,
    /// Removes the item from one path and creates it at another.
    Move,
}

impl TaskKind {
    /// Read/write classification of this kind.
    pub fn access(self) -> TaskAccess {
        match self {
            TaskKind::ItemEnumeration | TaskKind::Download => TaskAccess::Read,
            TaskKind::Upload | TaskKind::FolderCreation | TaskKind::Deletion => TaskAccess::Write,
            TaskKind::Reparent => TaskAccess::Move,
        }
    }

    /// Returns a human-readable name for this kind.
    pub fn name(self) -> &'static str {
        match self {
            TaskKind::ItemEnumeration => "item enumeration",
            TaskKind::Download => "download",
            TaskKind::Upload => "upload",
            TaskKind::FolderCreation => "folder creation",
            TaskKind::Deletion => "deletion",
            TaskKind::Reparent => "reparent",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A unit of work bound to one item.
///
/// The item's `cloud_path` is always the path the task targets. For a
/// reparent task the item has already been relocated to its destination and
/// `source` records where it currently lives in the cloud.
#[derive(Debug, Clone)]
pub enum CloudTask {
    /// List a folder, optionally continuing from a page token.
    ItemEnumeration {
        item: ItemMetadata,
        page_token: Option<String>,
    },
    /// Download a file.
    Download { item: ItemMetadata },
    /// Upload file contents.
    Upload { item: ItemMetadata, contents: Bytes },
    /// Create a folder.
    FolderCreation { item: ItemMetadata },
    /// Delete an item.
    Deletion { item: ItemMetadata },
    /// Move an item from `source` to `item.cloud_path`.
    Reparent { item: ItemMetadata, source: CloudPath },
}

impl CloudTask {
    /// Enumerate the folder described by `item`.
    pub fn enumerate(item: ItemMetadata, page_token: Option<String>) -> Self {
        CloudTask::ItemEnumeration { item, page_token }
    }

    /// Download the file described by `item`.
    pub fn download(item: ItemMetadata) -> Self {
        CloudTask::Download { item }
    }

    /// Upload `contents` to the location of `item`.
    pub fn upload(item: ItemMetadata, contents: impl Into<Bytes>) -> Self {
        CloudTask::Upload {
            item,
            contents: contents.into(),
        }
    }

    /// Create the folder described by `item`.
    pub fn create_folder(item: ItemMetadata) -> Self {
        CloudTask::FolderCreation { item }
    }

    /// Delete the item.
    pub fn delete(item: ItemMetadata) -> Self {
        CloudTask::Deletion { item }
    }

    /// Move `item` from its current path to `target`.
    ///
    /// Moves where either path is a strict ancestor of the other are
    /// rejected here, before any lock is requested: they would move a folder
    /// into itself or onto one of its own ancestors. Identical paths are
    /// accepted.
    pub fn reparent(mut item: ItemMetadata, target: CloudPath) -> SyncResult<Self> {
        let source = item.cloud_path.clone();
        if source.is_ancestor_of(&target) || target.is_ancestor_of(&source) {
            return Err(SyncError::InvalidMove {
                from: source,
                to: target,
            });
        }
        item.relocate(target);
        Ok(CloudTask::Reparent { item, source })
    }

    /// The kind of this task.
    pub fn kind(&self) -> TaskKind {
        match self {
            CloudTask::ItemEnumeration { .. } => TaskKind::ItemEnumeration,
            CloudTask::Download { .. } => TaskKind::Download,
            CloudTask::Upload { .. } => TaskKind::Upload,
            CloudTask::FolderCreation { .. } => TaskKind::FolderCreation,
            CloudTask::Deletion { .. } => TaskKind::Deletion,
            CloudTask::Reparent { .. } => TaskKind::Reparent,
        }
    }

    /// Read/write classification of this task.
    pub fn access(&self) -> TaskAccess {
        self.kind().access()
    }

    /// The item this task refers to.
    pub fn item(&self) -> &ItemMetadata {
        match self {
            CloudTask::ItemEnumeration { item, .. }
            | CloudTask::Download { item }
            | CloudTask::Upload { item, .. }
            | CloudTask::FolderCreation { item }
            | CloudTask::Deletion { item }
            | CloudTask::Reparent { item, .. } => item,
        }
    }

    /// Mutable access to the item this task refers to.
    pub fn item_mut(&mut self) -> &mut ItemMetadata {
        match self {
            CloudTask::ItemEnumeration { item, .. }
            | CloudTask::Download { item }
            | CloudTask::Upload { item, .. }
            | CloudTask::FolderCreation { item }
            | CloudTask::Deletion { item }
            | CloudTask::Reparent { item, .. } => item,
        }
    }

    /// The path this task targets.
    pub fn cloud_path(&self) -> &CloudPath {
        &self.item().cloud_path
    }

    /// The source path of a reparent task.
    pub fn source_path(&self) -> Option<&CloudPath> {
        match self {
            CloudTask::Reparent { source, .. } => Some(source),
            _ => None,
        }
    }

    /// All full paths this task touches: the source (for moves) and the target.
    pub fn paths(&self) -> Vec<CloudPath> {
        match self {
            CloudTask::Reparent { item, source } => vec![source.clone(), item.cloud_path.clone()],
            _ => vec![self.cloud_path().clone()],
        }
    }

    /// Redirect the task to a new target path.
    pub fn retarget(&mut self, path: CloudPath) {
        self.item_mut().relocate(path);
    }
}
