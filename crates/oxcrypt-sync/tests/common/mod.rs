//! Shared harness for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use oxcrypt_sync::pipeline::{TaskOutcome, WorkflowMiddleware};
use oxcrypt_sync::testing::MemoryCloud;
use oxcrypt_sync::{
    CloudPath, CloudTask, InMemoryMetadataStore, ItemId, ItemMetadata, ItemType, SyncConfig, SyncError, SyncResult,
    TaskAccess, WorkflowFactory,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

/// Upper bound for anything that should not block.
pub const NO_HANG: Duration = Duration::from_secs(5);

static TRACING: Once = Once::new();

/// Install a subscriber honoring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A factory wired to an in-memory cloud and metadata store.
pub struct Harness {
    pub cloud: Arc<MemoryCloud>,
    pub metadata: Arc<InMemoryMetadataStore>,
    pub factory: WorkflowFactory,
}

impl Harness {
    pub fn new(config: SyncConfig) -> Self {
        Self::with_cloud(config, MemoryCloud::new())
    }

    pub fn with_cloud(config: SyncConfig, cloud: MemoryCloud) -> Self {
        init_tracing();
        let cloud = Arc::new(cloud);
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let factory = WorkflowFactory::new(config, cloud.clone(), metadata.clone());
        Self {
            cloud,
            metadata,
            factory,
        }
    }
}

pub fn path(s: &str) -> CloudPath {
    CloudPath::new(s)
}

pub fn file(p: &str) -> ItemMetadata {
    ItemMetadata::new(path(p), ItemType::File, ItemId::ROOT)
}

pub fn folder(p: &str) -> ItemMetadata {
    ItemMetadata::new(path(p), ItemType::Folder, ItemId::ROOT)
}

#[derive(Debug, Default)]
struct Holders {
    readers: usize,
    writer: bool,
}

/// Tracks which paths are held by running tasks and fails on any overlap
/// the hierarchical locking rules forbid.
///
/// A task holds every strict ancestor of its path for reading. Read tasks
/// also hold the path itself for reading, write tasks hold it exclusively.
#[derive(Debug, Default)]
pub struct Occupancy {
    held: Mutex<HashMap<CloudPath, Holders>>,
    violations: Mutex<Vec<String>>,
    peak: Mutex<usize>,
    running: Mutex<usize>,
}

impl Occupancy {
    fn claims(task: &CloudTask) -> Vec<(CloudPath, bool)> {
        let mut claims = Vec::new();
        for target in task.paths() {
            for ancestor in target.ancestors() {
                claims.push((ancestor, false));
            }
            claims.push((target, task.access() != TaskAccess::Read));
        }
        claims
    }

    pub fn enter(&self, task: &CloudTask) {
        let mut held = self.held.lock();
        for (path, exclusive) in Self::claims(task) {
            let holders = held.entry(path.clone()).or_default();
            if holders.writer || (exclusive && holders.readers > 0) {
                self.violations
                    .lock()
                    .push(format!("{} entered {path} while held: {holders:?}", task.kind()));
            }
            if exclusive {
                holders.writer = true;
            } else {
                holders.readers += 1;
            }
        }
        let mut running = self.running.lock();
        *running += 1;
        let mut peak = self.peak.lock();
        *peak = (*peak).max(*running);
    }

    pub fn exit(&self, task: &CloudTask) {
        let mut held = self.held.lock();
        for (path, exclusive) in Self::claims(task) {
            if let Some(holders) = held.get_mut(&path) {
                if exclusive {
                    holders.writer = false;
                } else {
                    holders.readers -= 1;
                }
            }
        }
        *self.running.lock() -= 1;
    }

    pub fn violations(&self) -> Vec<String> {
        self.violations.lock().clone()
    }

    pub fn peak(&self) -> usize {
        *self.peak.lock()
    }
}

/// Terminal middleware that records occupancy while it "runs".
pub struct Recorder {
    pub occupancy: Arc<Occupancy>,
    pub hold: Duration,
    pub log: Mutex<Vec<CloudTask>>,
}

impl Recorder {
    pub fn new(hold: Duration) -> Self {
        Self {
            occupancy: Arc::default(),
            hold,
            log: Mutex::new(Vec::new()),
        }
    }

    /// Target paths in the order tasks started executing.
    pub fn started(&self) -> Vec<CloudPath> {
        self.log.lock().iter().map(|task| task.cloud_path().clone()).collect()
    }

    /// Tasks in the order they started executing.
    pub fn started_tasks(&self) -> Vec<CloudTask> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl WorkflowMiddleware for Recorder {
    fn name(&self) -> &'static str {
        "Recorder"
    }

    async fn execute(&self, task: CloudTask) -> SyncResult<TaskOutcome> {
        self.log.lock().push(task.clone());
        self.occupancy.enter(&task);
        if self.hold.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.hold).await;
        }
        self.occupancy.exit(&task);
        Ok(TaskOutcome::Deleted)
    }
}

/// Terminal middleware that fails every task.
pub struct Failing(pub SyncError);

#[async_trait]
impl WorkflowMiddleware for Failing {
    fn name(&self) -> &'static str {
        "Failing"
    }

    async fn execute(&self, _task: CloudTask) -> SyncResult<TaskOutcome> {
        Err(self.0.clone())
    }
}
