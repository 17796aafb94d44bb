//! Translation of backend errors into the host taxonomy.

use super::middleware::{NextHandler, WorkflowMiddleware};
use super::TaskOutcome;
use crate::error::{SyncError, SyncResult};
use crate::metrics::CoordinationMetrics;
use crate::task::CloudTask;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Rewrites [`SyncError::Cloud`] failures into host categories.
///
/// Backend errors with no host category, and every non-cloud error, are
/// returned unchanged. Successful outcomes are never touched.
#[derive(Debug)]
pub struct ErrorMapper {
    metrics: Arc<CoordinationMetrics>,
    next: NextHandler,
}

impl ErrorMapper {
    pub const NAME: &'static str = "ErrorMapper";

    pub fn new(metrics: Arc<CoordinationMetrics>) -> Self {
        Self {
            metrics,
            next: NextHandler::empty(),
        }
    }

    #[must_use]
    pub fn with_next(mut self, next: Arc<dyn WorkflowMiddleware>) -> Self {
        self.next = NextHandler::new(next);
        self
    }

    fn map(&self, error: SyncError) -> SyncError {
        let SyncError::Cloud(cloud) = error else {
            return error;
        };
        let translated = cloud.clone().translate();
        if !matches!(translated, SyncError::Cloud(_)) {
            self.metrics.record_translated_error();
            debug!(from = %cloud, to = %translated, "Translated cloud error");
        }
        translated
    }
}

#[async_trait]
impl WorkflowMiddleware for ErrorMapper {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, task: CloudTask) -> SyncResult<TaskOutcome> {
        self.next
            .execute(Self::NAME, task)
            .await
            .map_err(|e| self.map(e))
    }
}
