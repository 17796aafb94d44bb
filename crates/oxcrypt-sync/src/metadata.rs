//! Metadata store interface and an in-memory implementation.
//!
//! The on-disk schema is owned by the host; the pipeline only reads and
//! updates item records through [`MetadataStore`].

use crate::error::MetadataError;
use crate::item::{ItemId, ItemMetadata, ItemType};
use crate::path::CloudPath;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Persistent cache of item metadata.
pub trait MetadataStore: Send + Sync {
    /// Fetch the record for `id`.
    fn get(&self, id: ItemId) -> Result<ItemMetadata, MetadataError>;

    /// Find the record currently at `path`.
    fn find_by_path(&self, path: &CloudPath) -> Result<Option<ItemMetadata>, MetadataError>;

    /// Insert a new record or replace an existing one, assigning an id if
    /// the item has none. Returns the item's id.
    fn cache(&self, item: &mut ItemMetadata) -> Result<ItemId, MetadataError>;

    /// Replace the record of an already cached item.
    fn update(&self, item: &ItemMetadata) -> Result<(), MetadataError>;
}

/// [`MetadataStore`] kept entirely in memory.
///
/// Starts with a record for the root folder under [`ItemId::ROOT`].
#[derive(Debug)]
pub struct InMemoryMetadataStore {
    items: DashMap<ItemId, ItemMetadata>,
    next_id: AtomicU64,
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMetadataStore {
    /// Create a store containing only the root folder.
    pub fn new() -> Self {
        let items = DashMap::new();
        let root = ItemMetadata::new(CloudPath::root(), ItemType::Folder, ItemId::ROOT).with_id(ItemId::ROOT);
        items.insert(ItemId::ROOT, root);
        Self {
            items,
            next_id: AtomicU64::new(ItemId::ROOT.0 + 1),
        }
    }

    /// Number of cached records, including the root.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the store is empty. Never true: the root is always present.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn get(&self, id: ItemId) -> Result<ItemMetadata, MetadataError> {
        self.items
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(MetadataError::ItemNotFound { id })
    }

    fn find_by_path(&self, path: &CloudPath) -> Result<Option<ItemMetadata>, MetadataError> {
        Ok(self
            .items
            .iter()
            .find(|entry| &entry.value().cloud_path == path)
            .map(|entry| entry.value().clone()))
    }

    fn cache(&self, item: &mut ItemMetadata) -> Result<ItemId, MetadataError> {
        let id = match item.id {
            Some(id) => id,
            None => {
                let id = ItemId(self.next_id.fetch_add(1, Ordering::Relaxed));
                item.id = Some(id);
                id
            }
        };
        trace!(%id, path = %item.cloud_path, "Caching item metadata");
        self.items.insert(id, item.clone());
        Ok(id)
    }

    fn update(&self, item: &ItemMetadata) -> Result<(), MetadataError> {
        let id = item.id.ok_or_else(|| MetadataError::MissingId {
            path: item.cloud_path.clone(),
        })?;
        let mut entry = self
            .items
            .get_mut(&id)
            .ok_or(MetadataError::ItemNotFound { id })?;
        trace!(%id, path = %item.cloud_path, "Updating item metadata");
        *entry = item.clone();
        Ok(())
    }
}
