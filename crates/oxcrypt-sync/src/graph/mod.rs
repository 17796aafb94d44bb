//! Asynchronous dependency graph for hierarchical path locking.
//!
//! The graph realizes the same readers/writer contract as
//! [`locks`](crate::locks) without ever blocking: every lock request becomes
//! a chain of [`DependencyNode`]s, one per path component, and a node is
//! granted once the nodes it depends on have been released.
//!
//! # Structure
//!
//! - **Vertical**: each node's parent is the node for the immediate ancestor
//!   path in the same chain. A node is granted only after its parent, and a
//!   parent is released when its child is. Grants therefore proceed
//!   root-to-leaf and releases leaf-to-root.
//! - **External**: when a node is created it depends on the live nodes
//!   already registered at the same path. A read node depends on write
//!   nodes; a write node depends on every node.
//!
//! Ancestors of a chain are always read nodes; only the leaf carries the
//! requested mode.
//!
//! # Failure
//!
//! A node released with an error still counts as released: dependents wait
//! for their dependencies to settle, not to succeed.
//!
//! # Lifetime
//!
//! Nodes live in an arena owned by the graph and are addressed by
//! generation-checked [`NodeId`]s. Handles are reference counted and a child
//! holds a reference on its parent. A node leaves the graph as soon as its
//! last reference is dropped; from then on new nodes no longer depend on it.
//!
//! # Example
//!
//! ```
//! use oxcrypt_sync::graph::DependencyGraph;
//! use oxcrypt_sync::path::CloudPath;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let graph = DependencyGraph::new(Arc::default());
//! let path = CloudPath::new("/docs/report.txt");
//!
//! let writer = graph.create_subgraph_for_writing(&path);
//! let reader = graph.create_subgraph_for_reading(&path);
//!
//! writer.locked().await;
//! assert!(!reader.is_locked());
//!
//! writer.unlock();
//! reader.locked().await;
//! reader.unlock();
//! # }
//! ```

mod node;
mod signal;

pub use node::{DependencyNode, NodeId};

use crate::error::{DependencyError, SyncError, SyncResult};
use crate::locks::LockMode;
use crate::metrics::CoordinationMetrics;
use crate::path::CloudPath;
use futures::future::join_all;
use parking_lot::Mutex;
use signal::Signal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, trace};

type Released = Result<(), DependencyError>;

#[derive(Debug)]
struct NodeEntry {
    path: CloudPath,
    mode: LockMode,
    parent: Option<NodeId>,
    has_child: bool,
    refs: usize,
    release_requested: bool,
    locked: Signal<()>,
    unlocked: Signal<Released>,
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    entry: Option<NodeEntry>,
}

#[derive(Debug, Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<usize>,
    by_path: HashMap<CloudPath, Vec<NodeId>>,
}

impl Arena {
    fn insert(&mut self, entry: NodeEntry) -> NodeId {
        let path = entry.path.clone();
        let id = match self.free.pop().and_then(|index| {
            self.slots
                .get_mut(index)
                .map(|slot| (index, slot))
        }) {
            Some((index, slot)) => {
                slot.entry = Some(entry);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                NodeId {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        };
        self.by_path.entry(path).or_default().push(id);
        id
    }

    fn get(&self, id: NodeId) -> Option<&NodeEntry> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut NodeEntry> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    fn remove(&mut self, id: NodeId) -> Option<NodeEntry> {
        let slot = self
            .slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)?;
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);

        if let Some(ids) = self.by_path.get_mut(&entry.path) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_path.remove(&entry.path);
            }
        }
        Some(entry)
    }

    /// Release signals of the live nodes a new node at `path` must wait for.
    fn dependencies(&self, path: &CloudPath, mode: LockMode) -> Vec<Signal<Released>> {
        self.by_path
            .get(path)
            .into_iter()
            .flatten()
            .filter_map(|id| self.get(*id))
            .filter(|entry| mode == LockMode::Write || entry.mode == LockMode::Write)
            .map(|entry| entry.unlocked.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

/// The last node created while building a chain.
struct Link {
    id: NodeId,
    locked: Signal<()>,
    unlocked: Signal<Released>,
}

pub(crate) struct GraphInner {
    arena: Mutex<Arena>,
    runtime: Handle,
    metrics: Arc<CoordinationMetrics>,
}

impl GraphInner {
    fn retain(&self, id: NodeId) {
        if let Some(entry) = self.arena.lock().get_mut(id) {
            entry.refs += 1;
        }
    }

    /// Drop one reference, collecting the node and its ancestors as they
    /// become unreferenced.
    fn release_ref(&self, id: NodeId) {
        let mut arena = self.arena.lock();
        let mut next = Some(id);
        while let Some(id) = next.take() {
            let Some(entry) = arena.get_mut(id) else {
                trace!(?id, "Stale dependency node id");
                break;
            };
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs > 0 {
                break;
            }
            let Some(entry) = arena.remove(id) else {
                break;
            };
            self.metrics.record_node_collected();

            // Interior nodes are released by their child
            if !entry.has_child && !entry.release_requested {
                let abandoned = DependencyError::Abandoned {
                    path: entry.path.clone(),
                };
                if entry.unlocked.settle(Err(abandoned)) {
                    debug!(path = %entry.path, "Dependency node abandoned");
                }
            }
            trace!(path = %entry.path, ?id, "Dependency node collected");
            next = entry.parent;
        }
    }

    fn add_node(&self, arena: &mut Arena, path: CloudPath, mode: LockMode, parent: Option<&Link>) -> Link {
        let dependencies = arena.dependencies(&path, mode);
        let locked = Signal::new();
        let unlocked = Signal::new();

        trace!(
            %path,
            ?mode,
            dependencies = dependencies.len(),
            "Creating dependency node"
        );

        let id = arena.insert(NodeEntry {
            path,
            mode,
            parent: parent.map(|link| link.id),
            has_child: false,
            refs: 0,
            release_requested: false,
            locked: locked.clone(),
            unlocked: unlocked.clone(),
        });
        self.metrics.record_node_created();

        let parent_locked = parent.map(|link| link.locked.clone());
        if let Some(link) = parent {
            if let Some(entry) = arena.get_mut(link.id) {
                entry.refs += 1;
                entry.has_child = true;
            }

            // Release cascades leaf-to-root
            let child_unlocked = unlocked.clone();
            let parent_unlocked = link.unlocked.clone();
            self.runtime.spawn(async move {
                if let Some(result) = child_unlocked.wait().await {
                    parent_unlocked.settle(result);
                }
            });
        }

        // Grant: all external dependencies settled, then the parent granted
        let grant = locked.clone();
        self.runtime.spawn(async move {
            join_all(dependencies.iter().map(Signal::wait)).await;
            if let Some(parent_locked) = parent_locked {
                let _ = parent_locked.wait().await;
            }
            grant.settle(());
        });

        Link { id, locked, unlocked }
    }
}

/// Coordinator of dependency nodes.
///
/// Cheap to clone; clones share the same arena. Create one per coordinator
/// and pass it to whoever needs it.
#[derive(Clone)]
pub struct DependencyGraph {
    inner: Arc<GraphInner>,
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("nodes", &self.node_count())
            .finish_non_exhaustive()
    }
}

impl DependencyGraph {
    /// Create a graph that runs its coordination tasks on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside the context of a Tokio runtime.
    pub fn new(metrics: Arc<CoordinationMetrics>) -> Self {
        Self::with_runtime(Handle::current(), metrics)
    }

    /// Create a graph that runs its coordination tasks on `runtime`.
    pub fn with_runtime(runtime: Handle, metrics: Arc<CoordinationMetrics>) -> Self {
        Self {
            inner: Arc::new(GraphInner {
                arena: Mutex::new(Arena::default()),
                runtime,
                metrics,
            }),
        }
    }

    /// Metrics this graph reports to.
    pub fn metrics(&self) -> &Arc<CoordinationMetrics> {
        &self.inner.metrics
    }

    /// Read nodes for every component of `path`, returning the leaf.
    pub fn create_subgraph_for_reading(&self, path: &CloudPath) -> DependencyNode {
        self.create_subgraph(path, LockMode::Read)
    }

    /// Read nodes for every ancestor of `path` and a write node for `path`,
    /// returning the leaf.
    pub fn create_subgraph_for_writing(&self, path: &CloudPath) -> DependencyNode {
        self.create_subgraph(path, LockMode::Write)
    }

    /// Writing subgraphs for both ends of a move, returned as `[source, target]`.
    ///
    /// Identical paths share one subgraph and the leaf is returned twice.
    /// Moves between paths in an ancestor relation are rejected: the target
    /// chain would wait for the source leaf held by the same move.
    pub fn create_subgraph_for_reparent(
        &self,
        source: &CloudPath,
        target: &CloudPath,
    ) -> SyncResult<[DependencyNode; 2]> {
        if source.is_ancestor_of(target) || target.is_ancestor_of(source) {
            return Err(SyncError::InvalidMove {
                from: source.clone(),
                to: target.clone(),
            });
        }
        if source == target {
            let leaf = self.create_subgraph_for_writing(source);
            return Ok([leaf.clone(), leaf]);
        }
        let source_leaf = self.create_subgraph_for_writing(source);
        let target_leaf = self.create_subgraph_for_writing(target);
        Ok([source_leaf, target_leaf])
    }

    fn create_subgraph(&self, path: &CloudPath, leaf_mode: LockMode) -> DependencyNode {
        let depth = path.depth();
        let mut arena = self.inner.arena.lock();

        let root_mode = if depth == 0 { leaf_mode } else { LockMode::Read };
        let mut link = self
            .inner
            .add_node(&mut arena, CloudPath::root(), root_mode, None);

        for (i, partial) in path.partial_paths().into_iter().enumerate().skip(1) {
            let mode = if i == depth { leaf_mode } else { LockMode::Read };
            link = self.inner.add_node(&mut arena, partial, mode, Some(&link));
        }

        if let Some(entry) = arena.get_mut(link.id) {
            entry.refs += 1;
        }
        debug!(%path, mode = ?leaf_mode, nodes = depth + 1, "Created dependency subgraph");

        DependencyNode {
            graph: Arc::clone(&self.inner),
            id: link.id,
            path: path.clone(),
            mode: leaf_mode,
            locked: link.locked,
            unlocked: link.unlocked,
        }
    }

    /// Number of nodes currently in the graph.
    pub fn node_count(&self) -> usize {
        self.inner.arena.lock().len()
    }

    /// Number of nodes currently registered at `path`.
    pub fn nodes_at(&self, path: &CloudPath) -> usize {
        self.inner
            .arena
            .lock()
            .by_path
            .get(path)
            .map_or(0, Vec::len)
    }
}
