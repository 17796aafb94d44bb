//! Testing utilities for pipeline and coordination tests.
//!
//! [`MemoryCloud`] is a [`CloudProvider`] backed by an in-memory tree. It
//! enforces the same namespace rules a real backend does (parents must
//! exist, creating over an existing item fails), and adds knobs tests need:
//!
//! - **Latency**: every call sleeps for a fixed duration, so overlapping
//!   calls really overlap.
//! - **Fault injection**: queue errors for the next call of an operation.
//! - **Observation**: a log of every call and the peak number of calls in
//!   flight per operation.
//!
//! # Usage
//!
//! ```
//! use oxcrypt_sync::cloud::CloudProvider;
//! use oxcrypt_sync::error::CloudProviderError;
//! use oxcrypt_sync::path::CloudPath;
//! use oxcrypt_sync::testing::{CloudOperation, MemoryCloud};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cloud = MemoryCloud::new();
//! cloud.insert_folder(&CloudPath::new("/docs"));
//! cloud.fail_next(CloudOperation::Fetch, CloudProviderError::NoInternetConnection);
//!
//! let result = cloud.fetch(&CloudPath::new("/docs/missing.txt")).await;
//! assert_eq!(result, Err(CloudProviderError::NoInternetConnection));
//! # }
//! ```

use crate::cloud::{CloudProvider, CloudResult};
use crate::error::CloudProviderError;
use crate::item::{CloudItemMetadata, ItemList, ItemType};
use crate::path::CloudPath;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, SystemTime};

/// Default number of items per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// The cloud operations, for fault injection and observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudOperation {
    List,
    Fetch,
    Store,
    CreateFolder,
    Delete,
    Move,
}

#[derive(Debug, Clone)]
struct Entry {
    item_type: ItemType,
    contents: Bytes,
    modified: SystemTime,
}

impl Entry {
    fn folder() -> Self {
        Self {
            item_type: ItemType::Folder,
            contents: Bytes::new(),
            modified: SystemTime::now(),
        }
    }

    fn file(contents: Bytes) -> Self {
        Self {
            item_type: ItemType::File,
            contents,
            modified: SystemTime::now(),
        }
    }

    fn metadata(&self, path: &CloudPath) -> CloudItemMetadata {
        CloudItemMetadata {
            name: path.file_name().unwrap_or_default().to_string(),
            cloud_path: path.clone(),
            item_type: self.item_type,
            last_modified: Some(self.modified),
            size: match self.item_type {
                ItemType::File => Some(self.contents.len() as u64),
                ItemType::Folder => None,
            },
        }
    }
}

#[derive(Debug, Default)]
struct Activity {
    log: Vec<(CloudOperation, CloudPath)>,
    in_flight: HashMap<CloudOperation, usize>,
    peak: HashMap<CloudOperation, usize>,
}

/// In-memory [`CloudProvider`].
#[derive(Debug)]
pub struct MemoryCloud {
    tree: Mutex<BTreeMap<CloudPath, Entry>>,
    failures: Mutex<VecDeque<(CloudOperation, CloudProviderError)>>,
    activity: Mutex<Activity>,
    latency: Option<Duration>,
    page_size: usize,
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter when a call finishes.
struct InFlight<'a> {
    cloud: &'a MemoryCloud,
    operation: CloudOperation,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut activity = self.cloud.activity.lock();
        if let Some(count) = activity.in_flight.get_mut(&self.operation) {
            *count = count.saturating_sub(1);
        }
    }
}

impl MemoryCloud {
    /// Create an empty cloud containing only the root folder.
    pub fn new() -> Self {
        let mut tree = BTreeMap::new();
        tree.insert(CloudPath::root(), Entry::folder());
        Self {
            tree: Mutex::new(tree),
            failures: Mutex::new(VecDeque::new()),
            activity: Mutex::new(Activity::default()),
            latency: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Make every call take at least `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of items per listing page.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Create a folder and any missing ancestors.
    pub fn insert_folder(&self, path: &CloudPath) {
        let mut tree = self.tree.lock();
        for partial in path.partial_paths() {
            tree.entry(partial).or_insert_with(Entry::folder);
        }
    }

    /// Create or replace a file, creating missing ancestor folders.
    pub fn insert_file(&self, path: &CloudPath, contents: impl Into<Bytes>) {
        if let Some(parent) = path.parent() {
            self.insert_folder(&parent);
        }
        self.tree
            .lock()
            .insert(path.clone(), Entry::file(contents.into()));
    }

    /// Check if an item exists at `path`.
    pub fn exists(&self, path: &CloudPath) -> bool {
        self.tree.lock().contains_key(path)
    }

    /// Contents of the file at `path`, if there is one.
    pub fn contents(&self, path: &CloudPath) -> Option<Bytes> {
        self.tree
            .lock()
            .get(path)
            .filter(|entry| entry.item_type == ItemType::File)
            .map(|entry| entry.contents.clone())
    }

    /// Fail the next call of `operation` with `error`.
    ///
    /// Failures queue up: calling this twice fails the next two calls.
    pub fn fail_next(&self, operation: CloudOperation, error: CloudProviderError) {
        self.failures.lock().push_back((operation, error));
    }

    /// Every call made so far, oldest first.
    pub fn operations(&self) -> Vec<(CloudOperation, CloudPath)> {
        self.activity.lock().log.clone()
    }

    /// Number of calls of `operation` made so far.
    pub fn call_count(&self, operation: CloudOperation) -> usize {
        self.activity
            .lock()
            .log
            .iter()
            .filter(|(op, _)| *op == operation)
            .count()
    }

    /// Highest number of simultaneous calls of `operation` observed.
    pub fn peak_in_flight(&self, operation: CloudOperation) -> usize {
        self.activity
            .lock()
            .peak
            .get(&operation)
            .copied()
            .unwrap_or_default()
    }

    /// Record the call, apply latency and injected failures.
    async fn begin(&self, operation: CloudOperation, path: &CloudPath) -> CloudResult<InFlight<'_>> {
        {
            let mut activity = self.activity.lock();
            activity.log.push((operation, path.clone()));
            let count = activity.in_flight.entry(operation).or_default();
            *count += 1;
            let current = *count;
            let peak = activity.peak.entry(operation).or_default();
            *peak = (*peak).max(current);
        }
        let guard = InFlight {
            cloud: self,
            operation,
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let injected = {
            let mut failures = self.failures.lock();
            failures
                .iter()
                .position(|(op, _)| *op == operation)
                .and_then(|index| failures.remove(index))
        };
        match injected {
            Some((_, error)) => Err(error),
            None => Ok(guard),
        }
    }

    fn check_parent(tree: &BTreeMap<CloudPath, Entry>, path: &CloudPath) -> CloudResult<()> {
        let parent = path.parent().ok_or_else(|| {
            CloudProviderError::Other("the root folder cannot be replaced".to_string())
        })?;
        match tree.get(&parent) {
            Some(entry) if entry.item_type == ItemType::Folder => Ok(()),
            Some(_) => Err(CloudProviderError::ItemTypeMismatch { path: parent }),
            None => Err(CloudProviderError::ParentFolderDoesNotExist { path: path.clone() }),
        }
    }
}

#[async_trait]
impl CloudProvider for MemoryCloud {
    async fn list(&self, path: &CloudPath, page_token: Option<&str>) -> CloudResult<ItemList> {
        let _call = self.begin(CloudOperation::List, path).await?;
        let tree = self.tree.lock();

        match tree.get(path) {
            Some(entry) if entry.item_type == ItemType::Folder => {}
            Some(_) => return Err(CloudProviderError::ItemTypeMismatch { path: path.clone() }),
            None => return Err(CloudProviderError::ItemNotFound { path: path.clone() }),
        }

        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| CloudProviderError::PageTokenInvalid)?,
            None => 0,
        };

        let children: Vec<CloudItemMetadata> = tree
            .iter()
            .filter(|(child, _)| child.parent().as_ref() == Some(path))
            .map(|(child, entry)| entry.metadata(child))
            .collect();
        if offset > children.len() {
            return Err(CloudProviderError::PageTokenInvalid);
        }

        let end = (offset + self.page_size).min(children.len());
        let next_page_token = (end < children.len()).then(|| end.to_string());
        Ok(ItemList {
            items: children[offset..end].to_vec(),
            next_page_token,
        })
    }

    async fn fetch(&self, path: &CloudPath) -> CloudResult<Bytes> {
        let _call = self.begin(CloudOperation::Fetch, path).await?;
        match self.tree.lock().get(path) {
            Some(entry) if entry.item_type == ItemType::File => Ok(entry.contents.clone()),
            Some(_) => Err(CloudProviderError::ItemTypeMismatch { path: path.clone() }),
            None => Err(CloudProviderError::ItemNotFound { path: path.clone() }),
        }
    }

    async fn store(&self, path: &CloudPath, contents: Bytes, is_update: bool) -> CloudResult<CloudItemMetadata> {
        let _call = self.begin(CloudOperation::Store, path).await?;
        let mut tree = self.tree.lock();
        Self::check_parent(&tree, path)?;

        match tree.get(path) {
            Some(entry) if entry.item_type == ItemType::Folder => {
                return Err(CloudProviderError::ItemTypeMismatch { path: path.clone() });
            }
            Some(_) if !is_update => {
                return Err(CloudProviderError::ItemAlreadyExists { path: path.clone() });
            }
            _ => {}
        }

        let entry = Entry::file(contents);
        let metadata = entry.metadata(path);
        tree.insert(path.clone(), entry);
        Ok(metadata)
    }

    async fn create_folder(&self, path: &CloudPath) -> CloudResult<CloudItemMetadata> {
        let _call = self.begin(CloudOperation::CreateFolder, path).await?;
        let mut tree = self.tree.lock();
        Self::check_parent(&tree, path)?;
        if tree.contains_key(path) {
            return Err(CloudProviderError::ItemAlreadyExists { path: path.clone() });
        }

        let entry = Entry::folder();
        let metadata = entry.metadata(path);
        tree.insert(path.clone(), entry);
        Ok(metadata)
    }

    async fn delete(&self, path: &CloudPath) -> CloudResult<()> {
        let _call = self.begin(CloudOperation::Delete, path).await?;
        let mut tree = self.tree.lock();
        if path.is_root() {
            return Err(CloudProviderError::Other("the root folder cannot be deleted".to_string()));
        }
        if tree.remove(path).is_none() {
            return Err(CloudProviderError::ItemNotFound { path: path.clone() });
        }
        tree.retain(|other, _| !path.is_ancestor_of(other));
        Ok(())
    }

    async fn move_item(&self, source: &CloudPath, target: &CloudPath) -> CloudResult<CloudItemMetadata> {
        let _call = self.begin(CloudOperation::Move, source).await?;
        let mut tree = self.tree.lock();
        if source.is_root() {
            return Err(CloudProviderError::Other("the root folder cannot be moved".to_string()));
        }

        let Some(entry) = tree.get(source).cloned() else {
            return Err(CloudProviderError::ItemNotFound {
                path: source.clone(),
            });
        };
        if source == target {
            return Ok(entry.metadata(target));
        }
        Self::check_parent(&tree, target)?;
        if tree.contains_key(target) {
            return Err(CloudProviderError::ItemAlreadyExists {
                path: target.clone(),
            });
        }

        let moved: Vec<CloudPath> = tree
            .keys()
            .filter(|other| *other == source || source.is_ancestor_of(other))
            .cloned()
            .collect();
        let prefix = source.as_relative_str().len() + 1;
        for old in moved {
            let Some(value) = tree.remove(&old) else {
                continue;
            };
            let new = if &old == source {
                target.clone()
            } else {
                target.join(old.as_relative_str().get(prefix..).unwrap_or_default())
            };
            tree.insert(new, value);
        }
        Ok(entry.metadata(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> CloudPath {
        CloudPath::new(s)
    }

    #[tokio::test]
    async fn test_store_requires_parent() {
        let cloud = MemoryCloud::new();
        let err = cloud
            .store(&path("/missing/a.txt"), Bytes::from_static(b"x"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, CloudProviderError::ParentFolderDoesNotExist { .. }));
    }

    #[tokio::test]
    async fn test_store_collision() {
        let cloud = MemoryCloud::new();
        cloud.insert_file(&path("/a.txt"), &b"old"[..]);

        let err = cloud
            .store(&path("/a.txt"), Bytes::from_static(b"new"), false)
            .await
            .unwrap_err();
        assert_eq!(err, CloudProviderError::ItemAlreadyExists { path: path("/a.txt") });

        cloud
            .store(&path("/a.txt"), Bytes::from_static(b"new"), true)
            .await
            .unwrap();
        assert_eq!(cloud.contents(&path("/a.txt")).unwrap(), Bytes::from_static(b"new"));
    }

    #[tokio::test]
    async fn test_list_pages() {
        let cloud = MemoryCloud::new().with_page_size(2);
        for name in ["a", "b", "c"] {
            cloud.insert_file(&path("/dir").join(name), &b""[..]);
        }

        let first = cloud.list(&path("/dir"), None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        let token = first.next_page_token.unwrap();

        let second = cloud.list(&path("/dir"), Some(&token)).await.unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].name, "c");
        assert!(second.next_page_token.is_none());

        let err = cloud.list(&path("/dir"), Some("bogus")).await.unwrap_err();
        assert_eq!(err, CloudProviderError::PageTokenInvalid);
    }

    #[tokio::test]
    async fn test_move_subtree() {
        let cloud = MemoryCloud::new();
        cloud.insert_file(&path("/a/b/c.txt"), &b"c"[..]);
        cloud.insert_folder(&path("/x"));

        cloud.move_item(&path("/a"), &path("/x/a2")).await.unwrap();
        assert!(!cloud.exists(&path("/a")));
        assert!(!cloud.exists(&path("/a/b/c.txt")));
        assert_eq!(cloud.contents(&path("/x/a2/b/c.txt")).unwrap(), Bytes::from_static(b"c"));
    }

    #[tokio::test]
    async fn test_delete_subtree() {
        let cloud = MemoryCloud::new();
        cloud.insert_file(&path("/a/b.txt"), &b""[..]);
        cloud.delete(&path("/a")).await.unwrap();
        assert!(!cloud.exists(&path("/a/b.txt")));
        assert!(cloud.exists(&CloudPath::root()));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_in_order() {
        let cloud = MemoryCloud::new();
        cloud.fail_next(CloudOperation::Store, CloudProviderError::QuotaInsufficient);
        cloud.fail_next(CloudOperation::Delete, CloudProviderError::Unauthorized);

        let err = cloud.delete(&path("/nothing")).await.unwrap_err();
        assert_eq!(err, CloudProviderError::Unauthorized);

        let err = cloud
            .store(&path("/f"), Bytes::new(), false)
            .await
            .unwrap_err();
        assert_eq!(err, CloudProviderError::QuotaInsufficient);

        cloud.store(&path("/f"), Bytes::new(), false).await.unwrap();
        assert_eq!(cloud.call_count(CloudOperation::Store), 2);
        assert_eq!(cloud.peak_in_flight(CloudOperation::Store), 1);
    }
}
