//! Dependency-graph lock scope around a task.

use super::middleware::{NextHandler, WorkflowMiddleware};
use super::TaskOutcome;
use crate::error::{DependencyError, SyncError, SyncResult};
use crate::graph::{DependencyGraph, DependencyNode};
use crate::task::{CloudTask, TaskAccess};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Leaf nodes for `task`: one for reads and writes, source and target for moves.
pub fn create_nodes(graph: &DependencyGraph, task: &CloudTask) -> SyncResult<Vec<DependencyNode>> {
    let target = task.cloud_path();
    Ok(match task.access() {
        TaskAccess::Read => vec![graph.create_subgraph_for_reading(target)],
        TaskAccess::Write => vec![graph.create_subgraph_for_writing(target)],
        TaskAccess::Move => {
            let source = task.source_path().unwrap_or(target);
            graph.create_subgraph_for_reparent(source, target)?.into()
        }
    })
}

/// Runs the next handler once the task's dependency nodes are granted.
///
/// Nodes are normally created when the workflow is built, so that
/// workflows are ordered by submission rather than by when they start
/// running. A handler built without nodes creates them on first use.
///
/// A handler built with [`for_task`](Self::for_task) must be executed with
/// that same task.
///
/// After the next handler returns, the nodes are released: successfully, or
/// with the workflow's error text. Dependents proceed either way.
#[derive(Debug)]
pub struct DependencyHandler {
    graph: DependencyGraph,
    nodes: Mutex<Option<Vec<DependencyNode>>>,
    timeout: Option<Duration>,
    next: NextHandler,
}

impl DependencyHandler {
    pub const NAME: &'static str = "DependencyHandler";

    /// A handler that creates its nodes when it runs.
    pub fn new(graph: DependencyGraph, timeout: Option<Duration>) -> Self {
        Self {
            graph,
            nodes: Mutex::new(None),
            timeout,
            next: NextHandler::empty(),
        }
    }

    /// A handler whose nodes for `task` are registered right away.
    pub fn for_task(graph: DependencyGraph, task: &CloudTask, timeout: Option<Duration>) -> SyncResult<Self> {
        let nodes = create_nodes(&graph, task)?;
        Ok(Self {
            graph,
            nodes: Mutex::new(Some(nodes)),
            timeout,
            next: NextHandler::empty(),
        })
    }

    #[must_use]
    pub fn with_next(mut self, next: Arc<dyn WorkflowMiddleware>) -> Self {
        self.next = NextHandler::new(next);
        self
    }
}

#[async_trait]
impl WorkflowMiddleware for DependencyHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, task: CloudTask) -> SyncResult<TaskOutcome> {
        let path = task.cloud_path().clone();
        let prepared = self.nodes.lock().take();
        let nodes = match prepared {
            Some(nodes) => {
                debug_assert!(
                    nodes.iter().map(DependencyNode::path).eq(task.paths().iter()),
                    "{} task at {path} does not match its registered nodes",
                    task.kind()
                );
                nodes
            }
            None => create_nodes(&self.graph, &task)?,
        };

        trace!(%path, nodes = nodes.len(), "Waiting for dependency nodes");
        let granted = join_all(nodes.iter().map(DependencyNode::locked));
        match self.timeout {
            Some(timeout) => {
                if tokio::time::timeout(timeout, granted).await.is_err() {
                    // Dropping the nodes abandons them
                    return Err(SyncError::LockTimeout { path, timeout });
                }
            }
            None => {
                granted.await;
            }
        }
        debug!(%path, kind = %task.kind(), "Dependency nodes granted");

        let result = self.next.execute(Self::NAME, task).await;

        match &result {
            Ok(_) => nodes.iter().for_each(DependencyNode::unlock),
            Err(e) => {
                for node in &nodes {
                    node.unlock_with(DependencyError::Failed {
                        path: node.path().clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        trace!(%path, "Dependency nodes released");
        result
    }
}
