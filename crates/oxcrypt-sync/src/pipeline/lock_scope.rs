//! Path/data lock scope around a task.

use super::middleware::{NextHandler, WorkflowMiddleware};
use super::TaskOutcome;
use crate::error::{SyncError, SyncResult};
use crate::locks::{LockClass, LockManager, LockRequest};
use crate::path::CloudPath;
use crate::task::{CloudTask, TaskAccess};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Lock requests a task needs, in acquisition order.
///
/// | Access | Sequence |
/// |---|---|
/// | read | read(path, P), read(data, P) |
/// | write | read(path, parent), read(data, parent), write(path, P), write(data, P) |
/// | move | reads on both parents, then writes on source and target |
pub fn lock_plan(task: &CloudTask) -> Vec<LockRequest> {
    let target = task.cloud_path();
    match task.access() {
        TaskAccess::Read => vec![
            LockRequest::read(target.clone(), LockClass::Path),
            LockRequest::read(target.clone(), LockClass::Data),
        ],
        TaskAccess::Write => {
            let mut plan = parent_reads(target);
            plan.extend(writes(target));
            plan
        }
        TaskAccess::Move => {
            let source = task.source_path().unwrap_or(target);
            let mut plan = parent_reads(source);
            plan.extend(parent_reads(target));
            plan.extend(writes(source));
            plan.extend(writes(target));
            plan
        }
    }
}

fn parent_reads(path: &CloudPath) -> Vec<LockRequest> {
    match path.parent() {
        Some(parent) => vec![
            LockRequest::read(parent.clone(), LockClass::Path),
            LockRequest::read(parent, LockClass::Data),
        ],
        None => Vec::new(),
    }
}

fn writes(path: &CloudPath) -> [LockRequest; 2] {
    [
        LockRequest::write(path.clone(), LockClass::Path),
        LockRequest::write(path.clone(), LockClass::Data),
    ]
}

/// Runs the next handler while holding the task's path and data locks.
///
/// The locks are released in reverse order whatever the outcome, including
/// when the workflow future is dropped. If they cannot be acquired (timeout
/// or an invalid sequence) the next handler never runs.
#[derive(Debug)]
pub struct LockScopeHandler {
    locks: LockManager,
    timeout: Option<Duration>,
    next: NextHandler,
}

impl LockScopeHandler {
    pub const NAME: &'static str = "LockScopeHandler";

    pub fn new(locks: LockManager, timeout: Option<Duration>) -> Self {
        Self {
            locks,
            timeout,
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
impl WorkflowMiddleware for LockScopeHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, task: CloudTask) -> SyncResult<TaskOutcome> {
        let path = task.cloud_path().clone();
        let plan = lock_plan(&task);
        trace!(%path, requests = plan.len(), "Acquiring task locks");

        let acquire = self.locks.lock_in_canonical_order(plan);
        let sequence = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, acquire)
                .await
                .map_err(|_| SyncError::LockTimeout {
                    path: path.clone(),
                    timeout,
                })??,
            None => acquire.await?,
        };
        debug!(%path, kind = %task.kind(), locks = sequence.len(), "Task locks acquired");

        let result = self.next.execute(Self::NAME, task).await;

        sequence.release();
        trace!(%path, "Task locks released");
        result
    }
}
