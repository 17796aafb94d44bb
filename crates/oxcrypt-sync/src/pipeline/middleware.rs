//! The middleware trait and chaining.

use super::TaskOutcome;
use crate::error::{SyncError, SyncResult};
use crate::task::CloudTask;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// One handler in a workflow chain.
///
/// A handler either performs the cloud operation itself (executors) or
/// wraps exactly one next handler with a cross-cutting concern.
#[async_trait]
pub trait WorkflowMiddleware: Send + Sync {
    /// Name used in logs and configuration errors.
    fn name(&self) -> &'static str;

    /// Run `task` through this handler and everything after it.
    async fn execute(&self, task: CloudTask) -> SyncResult<TaskOutcome>;
}

/// The handler a middleware delegates to.
///
/// Empty until set; delegating through an empty slot fails with
/// [`SyncError::MissingHandler`].
#[derive(Clone, Default)]
pub struct NextHandler(Option<Arc<dyn WorkflowMiddleware>>);

impl NextHandler {
    /// A slot with no handler.
    pub fn empty() -> Self {
        Self(None)
    }

    /// A slot delegating to `next`.
    pub fn new(next: Arc<dyn WorkflowMiddleware>) -> Self {
        Self(Some(next))
    }

    /// Check if a handler is set.
    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    /// Delegate `task` on behalf of `handler`.
    pub async fn execute(&self, handler: &'static str, task: CloudTask) -> SyncResult<TaskOutcome> {
        match &self.0 {
            Some(next) => next.execute(task).await,
            None => Err(SyncError::MissingHandler { handler }),
        }
    }
}

impl fmt::Debug for NextHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(next) => f.debug_tuple("NextHandler").field(&next.name()).finish(),
            None => f.write_str("NextHandler(None)"),
        }
    }
}
