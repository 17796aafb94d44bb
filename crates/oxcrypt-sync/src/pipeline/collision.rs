//! Name-collision retry.

use super::middleware::{NextHandler, WorkflowMiddleware};
use super::TaskOutcome;
use crate::error::SyncResult;
use crate::metadata::MetadataStore;
use crate::metrics::CoordinationMetrics;
use crate::path::CloudPath;
use crate::task::CloudTask;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Next free-looking sibling name for `name`.
///
/// A ` (n)` counter is inserted before the extension, or bumped if the name
/// already carries one. Folder names and dot-files have no extension.
///
/// ```
/// use oxcrypt_sync::pipeline::collision_free_name;
///
/// assert_eq!(collision_free_name("foo.txt", false), "foo (1).txt");
/// assert_eq!(collision_free_name("foo (1).txt", false), "foo (2).txt");
/// assert_eq!(collision_free_name("v1.2", true), "v1.2 (1)");
/// assert_eq!(collision_free_name(".env", false), ".env (1)");
/// ```
pub fn collision_free_name(name: &str, is_folder: bool) -> String {
    let (stem, extension) = match name.rfind('.') {
        Some(dot) if dot > 0 && !is_folder => name.split_at(dot),
        _ => (name, ""),
    };
    let (base, counter) = split_counter(stem);
    format!("{base} ({}){extension}", counter + 1)
}

/// Split `"name (3)"` into `("name", 3)`; names without a counter get 0.
fn split_counter(stem: &str) -> (&str, u64) {
    stem.strip_suffix(')')
        .and_then(|rest| rest.rsplit_once(" ("))
        .filter(|(_, digits)| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|(base, digits)| digits.parse().ok().map(|n| (base, n)))
        .unwrap_or((stem, 0))
}

/// Sibling path of `path` under its collision-free name.
pub fn collision_free_path(path: &CloudPath, is_folder: bool) -> CloudPath {
    let name = path.file_name().unwrap_or_default();
    path.with_file_name(collision_free_name(name, is_folder))
}

/// Retries a task once under a new name when its target already exists.
///
/// The renamed item is persisted before the retry, so the metadata store
/// reflects the new name even if the retry fails. Only one collision is
/// absorbed: a second one is returned as is.
pub struct CollisionHandler {
    metadata: Arc<dyn MetadataStore>,
    metrics: Arc<CoordinationMetrics>,
    next: NextHandler,
}

impl CollisionHandler {
    pub const NAME: &'static str = "CollisionHandler";

    pub fn new(metadata: Arc<dyn MetadataStore>, metrics: Arc<CoordinationMetrics>) -> Self {
        Self {
            metadata,
            metrics,
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
impl WorkflowMiddleware for CollisionHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, task: CloudTask) -> SyncResult<TaskOutcome> {
        let mut retry = task.clone();
        match self.next.execute(Self::NAME, task).await {
            Err(e) if e.is_collision() => {
                let from = retry.cloud_path().clone();
                let to = collision_free_path(&from, retry.item().is_folder());
                info!(%from, %to, "Name collision, retrying under new name");

                retry.retarget(to);
                self.metadata.cache(retry.item_mut())?;
                self.metrics.record_collision_retry();

                self.next.execute(Self::NAME, retry).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collision_free_name() {
        assert_eq!(collision_free_name("foo.txt", false), "foo (1).txt");
        assert_eq!(collision_free_name("foo (1).txt", false), "foo (2).txt");
        assert_eq!(collision_free_name("foo (9)", true), "foo (10)");
        assert_eq!(collision_free_name("folder", true), "folder (1)");
        assert_eq!(collision_free_name(".env", false), ".env (1)");
        assert_eq!(collision_free_name("archive.tar.gz", false), "archive.tar (1).gz");
        assert_eq!(collision_free_name("noext", false), "noext (1)");
    }

    #[test]
    fn test_counter_requires_digits() {
        assert_eq!(collision_free_name("foo ().txt", false), "foo () (1).txt");
        assert_eq!(collision_free_name("foo (a).txt", false), "foo (a) (1).txt");
        assert_eq!(collision_free_name("foo(1).txt", false), "foo(1) (1).txt");
    }

    #[test]
    fn test_collision_free_path() {
        let path = CloudPath::new("/docs/foo.txt");
        assert_eq!(collision_free_path(&path, false), CloudPath::new("/docs/foo (1).txt"));
    }
}
