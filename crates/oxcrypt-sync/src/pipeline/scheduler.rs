//! Bounded parallelism for uploads and downloads.
//!
//! Workflows carry a [`WorkflowConstraint`]. Upload- and download-constrained
//! workflows need a permit from the matching semaphore before their cloud
//! operation runs; unconstrained workflows (enumeration, folder creation,
//! deletion, moves) never wait.
//!
//! Permits are taken by [`ConstraintHandler`], which sits inside the lock
//! handler. A workflow waiting for its locks therefore never holds a permit,
//! and a permit holder never waits for a lock.

use super::factory::Workflow;
use super::middleware::{NextHandler, WorkflowMiddleware};
use super::TaskOutcome;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::task::CloudTask;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Which parallelism budget a workflow counts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowConstraint {
    /// Bounded by `max_parallel_uploads`.
    UploadConstrained,
    /// Bounded by `max_parallel_downloads`.
    DownloadConstrained,
    /// Never waits for a permit.
    Unconstrained,
}

/// Admits and spawns workflows.
///
/// Cloning yields another handle to the same budgets.
#[derive(Debug, Clone)]
pub struct WorkflowScheduler {
    uploads: Arc<Semaphore>,
    downloads: Arc<Semaphore>,
    runtime: Handle,
}

impl WorkflowScheduler {
    /// Budgets from `config`, spawning onto `runtime`.
    ///
    /// A limit of zero is treated as one.
    pub fn new(config: &SyncConfig, runtime: Handle) -> Self {
        Self {
            uploads: Arc::new(Semaphore::new(config.max_parallel_uploads.max(1))),
            downloads: Arc::new(Semaphore::new(config.max_parallel_downloads.max(1))),
            runtime,
        }
    }

    fn semaphore(&self, constraint: WorkflowConstraint) -> Option<&Arc<Semaphore>> {
        match constraint {
            WorkflowConstraint::UploadConstrained => Some(&self.uploads),
            WorkflowConstraint::DownloadConstrained => Some(&self.downloads),
            WorkflowConstraint::Unconstrained => None,
        }
    }

    /// Wait for a permit under `constraint`.
    ///
    /// Returns `None` for unconstrained workflows. The permit is returned
    /// when dropped.
    pub async fn admit(&self, constraint: WorkflowConstraint) -> SyncResult<Option<OwnedSemaphorePermit>> {
        let Some(semaphore) = self.semaphore(constraint) else {
            return Ok(None);
        };
        let contended = semaphore.available_permits() == 0;
        let permit = Arc::clone(semaphore)
            .acquire_owned()
            .await
            .map_err(|_| SyncError::SchedulerClosed)?;
        trace!(?constraint, contended, "Workflow admitted");
        Ok(Some(permit))
    }

    /// Permits currently available under `constraint`.
    pub fn available(&self, constraint: WorkflowConstraint) -> Option<usize> {
        self.semaphore(constraint).map(|s| s.available_permits())
    }

    /// Stop admitting constrained workflows.
    ///
    /// Workflows waiting for a permit fail with [`SyncError::SchedulerClosed`];
    /// workflows already holding one run to completion.
    pub fn close(&self) {
        debug!("Closing workflow scheduler");
        self.uploads.close();
        self.downloads.close();
    }

    /// Check if [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.uploads.is_closed()
    }

    /// Run `workflow` in the background.
    pub fn spawn(&self, workflow: Workflow) -> JoinHandle<SyncResult<TaskOutcome>> {
        debug!(kind = %workflow.task().kind(), path = %workflow.task().cloud_path(), constraint = ?workflow.constraint(), "Scheduling workflow");
        self.runtime.spawn(workflow.run())
    }
}

/// Holds a scheduler permit around the next handler.
#[derive(Debug)]
pub struct ConstraintHandler {
    scheduler: WorkflowScheduler,
    constraint: WorkflowConstraint,
    next: NextHandler,
}

impl ConstraintHandler {
    pub const NAME: &'static str = "ConstraintHandler";

    pub fn new(scheduler: WorkflowScheduler, constraint: WorkflowConstraint) -> Self {
        Self {
            scheduler,
            constraint,
            next: NextHandler::empty(),
        }
    }

    #[must_use]
    pub fn with_next(mut self, next: Arc<dyn WorkflowMiddleware>) -> Self {
        self.next = NextHandler::new(next);
        self
    }
}

#[async_trait]
impl WorkflowMiddleware for ConstraintHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, task: CloudTask) -> SyncResult<TaskOutcome> {
        let _permit = self.scheduler.admit(self.constraint).await?;
        self.next.execute(Self::NAME, task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn scheduler(uploads: usize) -> WorkflowScheduler {
        WorkflowScheduler::new(&SyncConfig::default().max_parallel_uploads(uploads), Handle::current())
    }

    #[tokio::test]
    async fn test_unconstrained_needs_no_permit() {
        let scheduler = scheduler(1);
        assert!(scheduler.admit(WorkflowConstraint::Unconstrained).await.unwrap().is_none());
        assert_eq!(scheduler.available(WorkflowConstraint::Unconstrained), None);
    }

    #[tokio::test]
    async fn test_permits_are_bounded() {
        let scheduler = scheduler(2);
        let a = scheduler.admit(WorkflowConstraint::UploadConstrained).await.unwrap();
        let _b = scheduler.admit(WorkflowConstraint::UploadConstrained).await.unwrap();
        assert_eq!(scheduler.available(WorkflowConstraint::UploadConstrained), Some(0));

        // Downloads have their own budget
        assert_eq!(scheduler.available(WorkflowConstraint::DownloadConstrained), Some(3));

        let third = tokio::time::timeout(
            Duration::from_millis(50),
            scheduler.admit(WorkflowConstraint::UploadConstrained),
        )
        .await;
        assert!(third.is_err(), "third upload should wait");

        drop(a);
        assert_eq!(scheduler.available(WorkflowConstraint::UploadConstrained), Some(1));
    }

    #[tokio::test]
    async fn test_zero_limit_is_clamped() {
        let scheduler = scheduler(0);
        assert_eq!(scheduler.available(WorkflowConstraint::UploadConstrained), Some(1));
    }

    #[tokio::test]
    async fn test_closed_scheduler_rejects() {
        let scheduler = scheduler(1);
        scheduler.close();
        assert!(scheduler.is_closed());
        assert_eq!(
            scheduler.admit(WorkflowConstraint::UploadConstrained).await.unwrap_err(),
            SyncError::SchedulerClosed
        );
        assert!(scheduler.admit(WorkflowConstraint::Unconstrained).await.is_ok());
    }
}
