//! Coordinator configuration.
//!
//! [`SyncConfig`] can be built in code with the builder methods or
//! deserialized from any serde format. Durations use humantime syntax
//! (`"30s"`, `"500ms"`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of uploads allowed to run at once.
pub const DEFAULT_MAX_PARALLEL_UPLOADS: usize = 3;

/// Default number of downloads allowed to run at once.
pub const DEFAULT_MAX_PARALLEL_DOWNLOADS: usize = 3;

/// Locking discipline the pipeline wraps around each task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockingStrategy {
    /// Non-blocking dependency graph of per-path nodes.
    #[default]
    DependencyGraph,
    /// Ordered readers/writer path and data locks.
    PathLocks,
}

/// Configuration options for a sync coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum number of upload-constrained workflows running at once.
    ///
    /// Default: 3.
    pub max_parallel_uploads: usize,

    /// Maximum number of download-constrained workflows running at once.
    ///
    /// Default: 3.
    pub max_parallel_downloads: usize,

    /// Locking discipline used by workflows.
    ///
    /// Default: [`LockingStrategy::DependencyGraph`].
    pub locking: LockingStrategy,

    /// Upper bound on how long a workflow waits for its locks.
    ///
    /// When the bound is hit the workflow fails with
    /// [`SyncError::LockTimeout`](crate::error::SyncError::LockTimeout) and
    /// releases every lock it had already been granted. Default: unbounded.
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_parallel_uploads: DEFAULT_MAX_PARALLEL_UPLOADS,
            max_parallel_downloads: DEFAULT_MAX_PARALLEL_DOWNLOADS,
            locking: LockingStrategy::default(),
            lock_timeout: None,
        }
    }
}

impl SyncConfig {
    /// Sets the upload parallelism.
    #[must_use]
    pub fn max_parallel_uploads(mut self, limit: usize) -> Self {
        self.max_parallel_uploads = limit;
        self
    }

    /// Sets the download parallelism.
    #[must_use]
    pub fn max_parallel_downloads(mut self, limit: usize) -> Self {
        self.max_parallel_downloads = limit;
        self
    }

    /// Sets the locking strategy.
    #[must_use]
    pub fn locking(mut self, strategy: LockingStrategy) -> Self {
        self.locking = strategy;
        self
    }

    /// Bounds lock acquisition.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}
