//! Hierarchical lock coordination and task pipeline for vault synchronization.
//!
//! This crate orders concurrent file operations on a vault that is mirrored
//! to a cloud backend. The host may enumerate, read, write, create, delete
//! and move overlapping paths at the same time; operations on nested or
//! identical paths must be serialized along the path hierarchy, while
//! operations on disjoint subtrees run fully in parallel.
//!
//! # Components
//!
//! ## Coordination
//!
//! - [`LockManager`] - Readers/writer locks keyed by path, in two classes
//!   (path and data), acquired through ordered sequences
//! - [`DependencyGraph`] - Non-blocking coordinator modelling the same
//!   semantics as a graph of dependency nodes (the pipeline default)
//!
//! ## Pipeline
//!
//! - [`WorkflowFactory`] - Builds a handler chain for each [`CloudTask`]
//! - [`WorkflowMiddleware`] - Trait implemented by every handler
//! - [`WorkflowScheduler`] - Bounds upload and download parallelism
//!
//! ## Collaborators
//!
//! - [`CloudProvider`] - The remote backend (implemented by the host)
//! - [`MetadataStore`] - The item metadata cache (implemented by the host)
//! - [`testing::MemoryCloud`] - In-memory backend for tests
//!
//! # Semantics
//!
//! Reading a path locks every ancestor for reading; writing a path locks
//! the ancestors for reading and the path itself for writing. A writer at
//! `P` excludes every other holder at `P`. Grants proceed root to leaf and
//! releases leaf to root, on success, failure and cancellation alike.
//!
//! # Example
//!
//! ```
//! use oxcrypt_sync::{CloudPath, DependencyGraph};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let graph = DependencyGraph::new(Arc::default());
//!
//! let writer = graph.create_subgraph_for_writing(&CloudPath::new("/docs/a.txt"));
//! let reader = graph.create_subgraph_for_reading(&CloudPath::new("/docs/a.txt"));
//! assert!(!reader.is_locked());
//!
//! writer.locked().await;
//! writer.unlock();
//! reader.locked().await;
//! # }
//! ```

pub mod cloud;
pub mod config;
pub mod error;
pub mod graph;
pub mod item;
pub mod locks;
pub mod metadata;
pub mod metrics;
pub mod path;
pub mod pipeline;
pub mod task;
pub mod testing;

pub use cloud::{CloudProvider, CloudResult};
pub use config::{LockingStrategy, SyncConfig};
pub use error::{CloudProviderError, DependencyError, ErrorCategory, MetadataError, SyncError, SyncResult};
pub use graph::{DependencyGraph, DependencyNode};
pub use item::{CloudItemMetadata, ItemId, ItemList, ItemMetadata, ItemStatus, ItemType};
pub use locks::{LockClass, LockManager, LockMode, LockRequest, LockSequence};
pub use metadata::{InMemoryMetadataStore, MetadataStore};
pub use metrics::{CoordinationMetrics, CoordinationMetricsSnapshot};
pub use path::CloudPath;
pub use pipeline::{TaskOutcome, Workflow, WorkflowFactory, WorkflowMiddleware, WorkflowScheduler};
pub use task::{CloudTask, TaskAccess, TaskKind};
