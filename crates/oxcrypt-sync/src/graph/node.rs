//! Reference-counted handles to dependency nodes.

use super::GraphInner;
use super::signal::Signal;
use crate::error::DependencyError;
use crate::locks::LockMode;
use crate::path::CloudPath;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Generation-checked index of a node in the graph arena.
///
/// A slot is reused once its node is collected; the generation tells a
/// stale id apart from the slot's new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub(super) index: usize,
    pub(super) generation: u64,
}

/// One granted or pending lock request for one path component.
///
/// Handles are reference counted: cloning adds a reference, dropping
/// removes one. When the last reference to a node goes away the node leaves
/// the graph and no longer delays nodes created after it. A node whose last
/// handle is dropped before it was unlocked is abandoned, which releases it
/// with [`DependencyError::Abandoned`].
pub struct DependencyNode {
    pub(super) graph: Arc<GraphInner>,
    pub(super) id: NodeId,
    pub(super) path: CloudPath,
    pub(super) mode: LockMode,
    pub(super) locked: Signal<()>,
    pub(super) unlocked: Signal<Result<(), DependencyError>>,
}

impl DependencyNode {
    /// Arena id of the node.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Path this node locks.
    pub fn path(&self) -> &CloudPath {
        &self.path
    }

    /// Read or write.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Wait until the node is granted.
    ///
    /// Never fails: dependencies are awaited until they settle, whether they
    /// released cleanly or with an error.
    pub async fn locked(&self) {
        let _ = self.locked.wait().await;
    }

    /// Wait until the node is released, returning how it was released.
    pub async fn unlocked(&self) -> Result<(), DependencyError> {
        match self.unlocked.wait().await {
            Some(result) => result,
            None => Err(DependencyError::Abandoned {
                path: self.path.clone(),
            }),
        }
    }

    /// Check if the node has been granted.
    pub fn is_locked(&self) -> bool {
        self.locked.is_settled()
    }

    /// Check if the node has been released.
    pub fn is_unlocked(&self) -> bool {
        self.unlocked.is_settled()
    }

    /// Release the node successfully.
    ///
    /// Takes effect once the node is granted. Ancestors are released by
    /// their child, so calling this on an interior node does nothing.
    pub fn unlock(&self) {
        self.release(Ok(()));
    }

    /// Release the node with an error.
    ///
    /// Dependents are released all the same; the error is only reported
    /// through [`unlocked`](Self::unlocked).
    pub fn unlock_with(&self, error: DependencyError) {
        self.release(Err(error));
    }

    fn release(&self, result: Result<(), DependencyError>) {
        {
            let mut arena = self.graph.arena.lock();
            match arena.get_mut(self.id) {
                Some(entry) if entry.has_child => {
                    debug!(path = %self.path, "Ignoring unlock of interior dependency node");
                    return;
                }
                Some(entry) => entry.release_requested = true,
                None => return,
            }
        }

        if self.locked.is_settled() {
            self.unlocked.settle(result);
        } else {
            let locked = self.locked.clone();
            let unlocked = self.unlocked.clone();
            self.graph.runtime.spawn(async move {
                let _ = locked.wait().await;
                unlocked.settle(result);
            });
        }
    }

    /// Handle to the node for the immediate ancestor path.
    pub fn parent(&self) -> Option<DependencyNode> {
        let mut arena = self.graph.arena.lock();
        let parent_id = arena.get(self.id)?.parent?;
        let entry = arena.get_mut(parent_id)?;
        entry.refs += 1;
        Some(DependencyNode {
            graph: Arc::clone(&self.graph),
            id: parent_id,
            path: entry.path.clone(),
            mode: entry.mode,
            locked: entry.locked.clone(),
            unlocked: entry.unlocked.clone(),
        })
    }
}

impl Clone for DependencyNode {
    fn clone(&self) -> Self {
        self.graph.retain(self.id);
        Self {
            graph: Arc::clone(&self.graph),
            id: self.id,
            path: self.path.clone(),
            mode: self.mode,
            locked: self.locked.clone(),
            unlocked: self.unlocked.clone(),
        }
    }
}

impl Drop for DependencyNode {
    fn drop(&mut self) {
        self.graph.release_ref(self.id);
    }
}

impl fmt::Debug for DependencyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyNode")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("locked", &self.is_locked())
            .field("unlocked", &self.unlocked.peek())
            .finish_non_exhaustive()
    }
}

impl PartialEq for DependencyNode {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.graph, &other.graph) && self.id == other.id
    }
}

impl Eq for DependencyNode {}
