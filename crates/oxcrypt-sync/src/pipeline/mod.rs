//! Task execution pipeline.
//!
//! A workflow runs one [`CloudTask`](crate::task::CloudTask) through a chain of handlers. Each
//! handler implements [`WorkflowMiddleware`] and delegates to exactly one
//! next handler; the last one (an executor) calls the
//! [`CloudProvider`](crate::cloud::CloudProvider).
//!
//! # Architecture
//!
//! ```text
//!   submit(task)
//!        │
//!        ▼
//! ┌──────────────────────────────┐
//! │ DependencyHandler            │  C2 nodes (default)
//! │   or LockScopeHandler        │  C1 path/data locks
//! ├──────────────────────────────┤
//! │ ConstraintHandler            │  upload/download permits
//! ├──────────────────────────────┤
//! │ ErrorMapper                  │  backend errors -> host categories
//! ├──────────────────────────────┤
//! │ CollisionHandler             │  rename + single retry (writes only)
//! ├──────────────────────────────┤
//! │ *Executor                    │  the cloud call
//! └──────────────────────────────┘
//! ```
//!
//! Locks are acquired before anything below them runs and released after
//! everything below them has returned, whether it succeeded, failed, or
//! the workflow future was dropped.
//!
//! # Usage
//!
//! ```
//! use oxcrypt_sync::config::SyncConfig;
//! use oxcrypt_sync::item::{ItemId, ItemMetadata, ItemType};
//! use oxcrypt_sync::metadata::InMemoryMetadataStore;
//! use oxcrypt_sync::path::CloudPath;
//! use oxcrypt_sync::pipeline::{TaskOutcome, WorkflowFactory};
//! use oxcrypt_sync::task::CloudTask;
//! use oxcrypt_sync::testing::MemoryCloud;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cloud = Arc::new(MemoryCloud::new());
//! let factory = WorkflowFactory::new(SyncConfig::default(), cloud.clone(), Arc::new(InMemoryMetadataStore::new()));
//!
//! let item = ItemMetadata::new(CloudPath::new("/notes.txt"), ItemType::File, ItemId::ROOT).placeholder();
//! let outcome = factory.execute(CloudTask::upload(item, &b"hello"[..])).await.unwrap();
//! assert!(matches!(outcome, TaskOutcome::Uploaded(_)));
//! assert!(cloud.exists(&CloudPath::new("/notes.txt")));
//! # }
//! ```

pub mod collision;
pub mod dependency;
pub mod error_mapper;
pub mod executor;
pub mod factory;
pub mod lock_scope;
pub mod middleware;
pub mod scheduler;

pub use collision::{collision_free_name, collision_free_path, CollisionHandler};
pub use dependency::DependencyHandler;
pub use error_mapper::ErrorMapper;
pub use executor::{
    DeletionExecutor, DownloadExecutor, FolderCreationExecutor, ItemEnumerationExecutor,
    ReparentExecutor, UploadExecutor,
};
pub use factory::{constraint_for, Workflow, WorkflowFactory};
pub use lock_scope::{lock_plan, LockScopeHandler};
pub use middleware::{NextHandler, WorkflowMiddleware};
pub use scheduler::{ConstraintHandler, WorkflowConstraint, WorkflowScheduler};

use crate::item::{ItemList, ItemMetadata};
use bytes::Bytes;

/// Result of a successful workflow.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// One page of a folder listing.
    Listed(ItemList),
    /// File contents and the item they belong to.
    Downloaded { item: ItemMetadata, contents: Bytes },
    /// The uploaded item as now cached.
    Uploaded(ItemMetadata),
    /// The created folder as now cached.
    FolderCreated(ItemMetadata),
    /// The item no longer exists.
    Deleted,
    /// The moved item at its new location.
    Moved(ItemMetadata),
}

impl TaskOutcome {
    /// The item the outcome refers to, if any.
    pub fn item(&self) -> Option<&ItemMetadata> {
        match self {
            TaskOutcome::Downloaded { item, .. }
            | TaskOutcome::Uploaded(item)
            | TaskOutcome::FolderCreated(item)
            | TaskOutcome::Moved(item) => Some(item),
            TaskOutcome::Listed(_) | TaskOutcome::Deleted => None,
        }
    }
}
