//! Assembly of handler chains into runnable workflows.

use super::collision::CollisionHandler;
use super::dependency::DependencyHandler;
use super::error_mapper::ErrorMapper;
use super::executor::{
    DeletionExecutor, DownloadExecutor, FolderCreationExecutor, ItemEnumerationExecutor,
    ReparentExecutor, UploadExecutor,
};
use super::lock_scope::LockScopeHandler;
use super::middleware::WorkflowMiddleware;
use super::scheduler::{ConstraintHandler, WorkflowConstraint, WorkflowScheduler};
use super::TaskOutcome;
use crate::cloud::CloudProvider;
use crate::config::{LockingStrategy, SyncConfig};
use crate::error::SyncResult;
use crate::graph::DependencyGraph;
use crate::locks::LockManager;
use crate::metadata::MetadataStore;
use crate::metrics::CoordinationMetrics;
use crate::task::{CloudTask, TaskKind};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

/// A task bound to the handler chain that will run it.
pub struct Workflow {
    task: CloudTask,
    constraint: WorkflowConstraint,
    chain: Arc<dyn WorkflowMiddleware>,
}

impl Workflow {
    pub fn task(&self) -> &CloudTask {
        &self.task
    }

    pub fn constraint(&self) -> WorkflowConstraint {
        self.constraint
    }

    /// Name of the outermost handler.
    pub fn entry(&self) -> &'static str {
        self.chain.name()
    }

    /// Run the task through the chain.
    pub async fn run(self) -> SyncResult<TaskOutcome> {
        self.chain.execute(self.task).await
    }
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("kind", &self.task.kind())
            .field("path", self.task.cloud_path())
            .field("constraint", &self.constraint)
            .field("entry", &self.chain.name())
            .finish()
    }
}

/// Parallelism budget for each task kind.
pub fn constraint_for(kind: TaskKind) -> WorkflowConstraint {
    match kind {
        TaskKind::Upload => WorkflowConstraint::UploadConstrained,
        TaskKind::Download => WorkflowConstraint::DownloadConstrained,
        TaskKind::ItemEnumeration | TaskKind::FolderCreation | TaskKind::Deletion | TaskKind::Reparent => {
            WorkflowConstraint::Unconstrained
        }
    }
}

/// Builds workflows for a single coordinator.
///
/// Owns the coordination state every workflow shares: the lock registries,
/// the dependency graph, the scheduler budgets and the metrics. Two
/// factories never coordinate with each other.
///
/// Chains are composed outermost first:
///
/// ```text
/// lock handler ─▶ ConstraintHandler ─▶ ErrorMapper ─▶ [CollisionHandler] ─▶ executor
/// ```
///
/// The collision handler is only present for uploads, folder creation and
/// moves.
pub struct WorkflowFactory {
    config: SyncConfig,
    cloud: Arc<dyn CloudProvider>,
    metadata: Arc<dyn MetadataStore>,
    locks: LockManager,
    graph: DependencyGraph,
    scheduler: WorkflowScheduler,
    metrics: Arc<CoordinationMetrics>,
}

impl WorkflowFactory {
    /// Create a factory on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(config: SyncConfig, cloud: Arc<dyn CloudProvider>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self::with_runtime(config, cloud, metadata, Handle::current())
    }

    /// Create a factory spawning onto `runtime`.
    pub fn with_runtime(
        config: SyncConfig,
        cloud: Arc<dyn CloudProvider>,
        metadata: Arc<dyn MetadataStore>,
        runtime: Handle,
    ) -> Self {
        let metrics = Arc::new(CoordinationMetrics::new());
        Self {
            locks: LockManager::new(metrics.clone()),
            graph: DependencyGraph::with_runtime(runtime.clone(), metrics.clone()),
            scheduler: WorkflowScheduler::new(&config, runtime),
            config,
            cloud,
            metadata,
            metrics,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn scheduler(&self) -> &WorkflowScheduler {
        &self.scheduler
    }

    pub fn metrics(&self) -> &Arc<CoordinationMetrics> {
        &self.metrics
    }

    fn executor(&self, kind: TaskKind) -> Arc<dyn WorkflowMiddleware> {
        let cloud = self.cloud.clone();
        match kind {
            TaskKind::ItemEnumeration => Arc::new(ItemEnumerationExecutor::new(cloud)),
            TaskKind::Download => Arc::new(DownloadExecutor::new(cloud)),
            TaskKind::Upload => Arc::new(UploadExecutor::new(cloud, self.metadata.clone())),
            TaskKind::FolderCreation => Arc::new(FolderCreationExecutor::new(cloud, self.metadata.clone())),
            TaskKind::Deletion => Arc::new(DeletionExecutor::new(cloud)),
            TaskKind::Reparent => Arc::new(ReparentExecutor::new(cloud, self.metadata.clone())),
        }
    }

    /// Build the workflow for `task`.
    ///
    /// With the dependency-graph strategy the task's nodes are registered
    /// here, so workflows are ordered by creation. Fails with
    /// [`SyncError::InvalidMove`](crate::error::SyncError::InvalidMove) for
    /// a move between ancestor-related paths.
    pub fn create(&self, task: CloudTask) -> SyncResult<Workflow> {
        let kind = task.kind();
        let constraint = constraint_for(kind);
        let timeout = self.config.lock_timeout;

        let mut chain = self.executor(kind);
        if matches!(kind, TaskKind::Upload | TaskKind::FolderCreation | TaskKind::Reparent) {
            chain = Arc::new(CollisionHandler::new(self.metadata.clone(), self.metrics.clone()).with_next(chain));
        }
        chain = Arc::new(ErrorMapper::new(self.metrics.clone()).with_next(chain));
        chain = Arc::new(ConstraintHandler::new(self.scheduler.clone(), constraint).with_next(chain));
        let chain: Arc<dyn WorkflowMiddleware> = match self.config.locking {
            LockingStrategy::DependencyGraph => {
                Arc::new(DependencyHandler::for_task(self.graph.clone(), &task, timeout)?.with_next(chain))
            }
            LockingStrategy::PathLocks => Arc::new(LockScopeHandler::new(self.locks.clone(), timeout).with_next(chain)),
        };

        trace!(%kind, path = %task.cloud_path(), entry = chain.name(), "Workflow created");
        Ok(Workflow {
            task,
            constraint,
            chain,
        })
    }

    /// Build the workflow for `task` and run it in the background.
    pub fn submit(&self, task: CloudTask) -> SyncResult<JoinHandle<SyncResult<TaskOutcome>>> {
        let workflow = self.create(task)?;
        Ok(self.scheduler.spawn(workflow))
    }

    /// Build the workflow for `task` and run it to completion.
    pub async fn execute(&self, task: CloudTask) -> SyncResult<TaskOutcome> {
        self.create(task)?.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::item::{ItemId, ItemMetadata, ItemType};
    use crate::metadata::InMemoryMetadataStore;
    use crate::path::CloudPath;
    use crate::testing::MemoryCloud;

    fn factory(config: SyncConfig) -> WorkflowFactory {
        WorkflowFactory::new(config, Arc::new(MemoryCloud::new()), Arc::new(InMemoryMetadataStore::new()))
    }

    fn file(path: &str) -> ItemMetadata {
        ItemMetadata::new(CloudPath::new(path), ItemType::File, ItemId::ROOT)
    }

    #[test]
    fn test_constraints() {
        assert_eq!(constraint_for(TaskKind::Upload), WorkflowConstraint::UploadConstrained);
        assert_eq!(constraint_for(TaskKind::Download), WorkflowConstraint::DownloadConstrained);
        assert_eq!(constraint_for(TaskKind::Reparent), WorkflowConstraint::Unconstrained);
    }

    #[tokio::test]
    async fn test_entry_follows_strategy() {
        let graph = factory(SyncConfig::default());
        let workflow = graph.create(CloudTask::download(file("/a"))).unwrap();
        assert_eq!(workflow.entry(), DependencyHandler::NAME);
        assert_eq!(graph.graph().nodes_at(&CloudPath::new("/a")), 1);

        let locks = factory(SyncConfig::default().locking(LockingStrategy::PathLocks));
        let workflow = locks.create(CloudTask::download(file("/a"))).unwrap();
        assert_eq!(workflow.entry(), LockScopeHandler::NAME);
        assert_eq!(locks.graph().node_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_move_is_rejected_at_creation() {
        let factory = factory(SyncConfig::default());
        let task = CloudTask::Reparent {
            item: file("/a/b"),
            source: CloudPath::new("/a/b/c"),
        };
        assert!(matches!(factory.create(task), Err(SyncError::InvalidMove { .. })));
        assert_eq!(factory.graph().node_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_workflow_releases_nodes() {
        let factory = factory(SyncConfig::default());
        let first = factory.create(CloudTask::upload(file("/a.txt"), &b""[..])).unwrap();
        let second = factory.create(CloudTask::download(file("/a.txt"))).unwrap();
        drop(first);

        let outcome = tokio::time::timeout(std::time::Duration::from_secs(2), second.run())
            .await
            .unwrap();
        assert!(matches!(outcome, Err(SyncError::NotFound { .. })));
    }
}
