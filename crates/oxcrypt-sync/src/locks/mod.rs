//! Hierarchical readers/writer locks keyed by cloud path.
//!
//! This module provides the blocking-style coordination primitive of the sync
//! core: two independent classes of readers/writer locks, *path* locks and
//! *data* locks, keyed by [`CloudPath`] and acquired through explicit,
//! ordered sequences.
//!
//! # Locking Semantics
//!
//! - **Path read at P**: read-locks every path lock from the root down to P,
//!   so a writer on any ancestor excludes the reader.
//! - **Path write at P**: write-locks P only.
//! - **Data locks**: cover exactly P, in either mode.
//!
//! # Deadlock Prevention
//!
//! 1. A single request acquires its keys root-first.
//! 2. A sequence never acquires the same key twice: repeated requests for a
//!    key it already covers are shared.
//! 3. Never upgrade read locks to write locks: such a sequence is rejected
//!    with [`SyncError::ReentrantLock`] before anything is acquired.
//! 4. [`LockManager::lock_in_canonical_order`] acquires every key of a
//!    sequence in one global order (path, then class), which is what the
//!    pipeline uses.
//!
//! # Registries
//!
//! Lock objects are created lazily on first use and are never removed for
//! the lifetime of the [`LockManager`]. All registry mutation goes through
//! one gate. The manager is an ordinary value: create one per coordinator
//! and pass it to whoever needs it.
//!
//! # Example
//!
//! ```
//! use oxcrypt_sync::locks::{LockClass, LockManager, LockRequest};
//! use oxcrypt_sync::path::CloudPath;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let manager = LockManager::default();
//! let path = CloudPath::new("/docs/report.txt");
//!
//! let sequence = manager
//!     .lock_in_order([
//!         LockRequest::read(path.clone(), LockClass::Path),
//!         LockRequest::read(path.clone(), LockClass::Data),
//!     ])
//!     .await
//!     .unwrap();
//! // ... read the item ...
//! sequence.release();
//! # }
//! ```

mod sequence;

pub use sequence::{LockSequence, lock_in_order, unlock_in_order};

use crate::error::{SyncError, SyncResult};
use crate::metrics::CoordinationMetrics;
use crate::path::CloudPath;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::trace;

/// The two independent lock classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockClass {
    /// Protects the namespace: existence and placement of the item.
    Path,
    /// Protects the item's contents.
    Data,
}

impl fmt::Display for LockClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockClass::Path => f.write_str("path"),
            LockClass::Data => f.write_str("data"),
        }
    }
}

/// Shared or exclusive access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Read,
    Write,
}

/// A single lock object: one class at one path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey {
    pub path: CloudPath,
    pub class: LockClass,
}

/// A request to lock `path` in `class` with `mode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    pub path: CloudPath,
    pub class: LockClass,
    pub mode: LockMode,
}

impl LockRequest {
    /// Shared access to `path`.
    pub fn read(path: CloudPath, class: LockClass) -> Self {
        Self {
            path,
            class,
            mode: LockMode::Read,
        }
    }

    /// Exclusive access to `path`.
    pub fn write(path: CloudPath, class: LockClass) -> Self {
        Self {
            path,
            class,
            mode: LockMode::Write,
        }
    }

    /// The lock objects this request covers, root-first.
    pub fn keys(&self) -> Vec<LockKey> {
        match (self.class, self.mode) {
            (LockClass::Path, LockMode::Read) => self
                .path
                .partial_paths()
                .into_iter()
                .map(|path| LockKey {
                    path,
                    class: LockClass::Path,
                })
                .collect(),
            _ => vec![LockKey {
                path: self.path.clone(),
                class: self.class,
            }],
        }
    }
}

/// Whether a lock was granted or released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockEventKind {
    Granted,
    Released,
}

/// An entry of the optional lock event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEvent {
    pub kind: LockEventKind,
    pub key: LockKey,
    pub mode: LockMode,
}

#[derive(Debug, Default)]
struct LockTables {
    path_locks: HashMap<CloudPath, Arc<RwLock<()>>>,
    data_locks: HashMap<CloudPath, Arc<RwLock<()>>>,
}

#[derive(Debug)]
struct LockRegistry {
    tables: Mutex<LockTables>,
    metrics: Arc<CoordinationMetrics>,
    events: Option<Mutex<Vec<LockEvent>>>,
}

impl LockRegistry {
    fn lock_for(&self, key: &LockKey) -> Arc<RwLock<()>> {
        let mut tables = self.tables.lock();
        let table = match key.class {
            LockClass::Path => &mut tables.path_locks,
            LockClass::Data => &mut tables.data_locks,
        };
        Arc::clone(
            table
                .entry(key.path.clone())
                .or_insert_with(|| Arc::new(RwLock::new(()))),
        )
    }

    /// Acquire one key, trying the uncontended fast path first.
    async fn grant(self: &Arc<Self>, key: LockKey, mode: LockMode) -> KeyGuard {
        let lock = self.lock_for(&key);
        let (guard, contended) = match mode {
            LockMode::Read => match Arc::clone(&lock).try_read_owned() {
                Ok(guard) => (Guard::Read(guard), false),
                Err(_) => {
                    trace!(path = %key.path, class = %key.class, "Waiting for read lock");
                    (Guard::Read(lock.read_owned().await), true)
                }
            },
            LockMode::Write => match Arc::clone(&lock).try_write_owned() {
                Ok(guard) => (Guard::Write(guard), false),
                Err(_) => {
                    trace!(path = %key.path, class = %key.class, "Waiting for write lock");
                    (Guard::Write(lock.write_owned().await), true)
                }
            },
        };

        self.metrics.record_grant(contended);
        self.record(LockEventKind::Granted, &key, mode);
        trace!(path = %key.path, class = %key.class, ?mode, contended, "Lock granted");

        KeyGuard {
            registry: Arc::clone(self),
            key,
            mode,
            _guard: guard,
        }
    }

    fn record(&self, kind: LockEventKind, key: &LockKey, mode: LockMode) {
        if let Some(events) = &self.events {
            events.lock().push(LockEvent {
                kind,
                key: key.clone(),
                mode,
            });
        }
    }
}

#[derive(Debug)]
enum Guard {
    #[allow(dead_code)]
    Read(OwnedRwLockReadGuard<()>),
    #[allow(dead_code)]
    Write(OwnedRwLockWriteGuard<()>),
}

/// One granted key. Releases on drop.
struct KeyGuard {
    registry: Arc<LockRegistry>,
    key: LockKey,
    mode: LockMode,
    _guard: Guard,
}

impl fmt::Debug for KeyGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGuard")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.registry.metrics.record_release();
        self.registry
            .record(LockEventKind::Released, &self.key, self.mode);
        trace!(path = %self.key.path, class = %self.key.class, mode = ?self.mode, "Lock released");
    }
}

/// A lock that has been requested but not acquired.
///
/// The only thing a pending lock can do is [`acquire`](Self::acquire); it
/// holds nothing, so there is nothing to release.
#[must_use = "a pending lock does nothing until acquired"]
pub struct PendingLock {
    registry: Arc<LockRegistry>,
    request: LockRequest,
    keys: Vec<LockKey>,
}

impl fmt::Debug for PendingLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingLock")
            .field("request", &self.request)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl PendingLock {
    /// The request this lock was created for.
    pub fn request(&self) -> &LockRequest {
        &self.request
    }

    /// Suspend until every key of the request is granted, root-first.
    ///
    /// If the returned future is dropped midway, the keys granted so far are
    /// released in reverse order.
    pub async fn acquire(self) -> HeldLock {
        let PendingLock {
            registry,
            request,
            keys,
        } = self;
        let mode = request.mode;
        let mut held = HeldLock {
            request,
            guards: Vec::with_capacity(keys.len()),
        };
        for key in keys {
            let guard = registry.grant(key, mode).await;
            held.guards.push(guard);
        }
        held
    }
}

/// An acquired lock. Dropping it releases its keys leaf-to-root.
#[must_use = "dropping a held lock releases it immediately"]
#[derive(Debug)]
pub struct HeldLock {
    request: LockRequest,
    guards: Vec<KeyGuard>,
}

impl HeldLock {
    /// The request this lock satisfies.
    pub fn request(&self) -> &LockRequest {
        &self.request
    }

    /// Number of lock objects held.
    pub fn key_count(&self) -> usize {
        self.guards.len()
    }

    /// Release the lock.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

/// Owner of the path and data lock registries.
///
/// Cheap to clone; clones share the same registries.
#[derive(Debug, Clone)]
pub struct LockManager {
    registry: Arc<LockRegistry>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(Arc::new(CoordinationMetrics::new()))
    }
}

impl LockManager {
    /// Create a lock manager reporting to `metrics`.
    pub fn new(metrics: Arc<CoordinationMetrics>) -> Self {
        Self::build(metrics, None)
    }

    /// Create a lock manager that records every grant and release.
    ///
    /// Intended for tests; the log grows without bound.
    pub fn with_event_log(metrics: Arc<CoordinationMetrics>) -> Self {
        Self::build(metrics, Some(Mutex::new(Vec::new())))
    }

    fn build(metrics: Arc<CoordinationMetrics>, events: Option<Mutex<Vec<LockEvent>>>) -> Self {
        Self {
            registry: Arc::new(LockRegistry {
                tables: Mutex::new(LockTables::default()),
                metrics,
                events,
            }),
        }
    }

    /// Metrics this manager reports to.
    pub fn metrics(&self) -> &Arc<CoordinationMetrics> {
        &self.registry.metrics
    }

    /// Prepare a lock for `request`.
    pub fn lock(&self, request: LockRequest) -> PendingLock {
        let keys = request.keys();
        PendingLock {
            registry: Arc::clone(&self.registry),
            request,
            keys,
        }
    }

    /// Prepare a read lock.
    pub fn read(&self, path: CloudPath, class: LockClass) -> PendingLock {
        self.lock(LockRequest::read(path, class))
    }

    /// Prepare a write lock.
    pub fn write(&self, path: CloudPath, class: LockClass) -> PendingLock {
        self.lock(LockRequest::write(path, class))
    }

    /// Acquire a read lock, suspending until granted.
    pub async fn acquire_read(&self, path: CloudPath, class: LockClass) -> HeldLock {
        self.read(path, class).acquire().await
    }

    /// Acquire a write lock, suspending until granted.
    pub async fn acquire_write(&self, path: CloudPath, class: LockClass) -> HeldLock {
        self.write(path, class).acquire().await
    }

    /// Acquire `requests` strictly in the given order.
    ///
    /// Keys already covered by an earlier request of the sequence are
    /// shared rather than acquired again. Fails with
    /// [`SyncError::ReentrantLock`], before acquiring anything, if a request
    /// would write a key an earlier request reads.
    pub async fn lock_in_order(
        &self,
        requests: impl IntoIterator<Item = LockRequest>,
    ) -> SyncResult<LockSequence> {
        let pending = self.plan(requests)?;
        Ok(lock_in_order(pending).await)
    }

    /// Acquire `requests` with every key in one global order.
    ///
    /// Same validation and sharing as [`lock_in_order`](Self::lock_in_order),
    /// but the keys of all requests are acquired sorted by path and then
    /// class. Ancestors sort before descendants, so each request is still
    /// granted root-to-leaf, and two sequences can never wait on each other
    /// in a cycle.
    pub async fn lock_in_canonical_order(
        &self,
        requests: impl IntoIterator<Item = LockRequest>,
    ) -> SyncResult<LockSequence> {
        let mut keyed: Vec<(LockKey, LockMode)> = self
            .plan(requests)?
            .into_iter()
            .flat_map(|pending| {
                let mode = pending.request.mode;
                pending.keys.into_iter().map(move |key| (key, mode))
            })
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        let pending = keyed
            .into_iter()
            .map(|(key, mode)| PendingLock {
                registry: Arc::clone(&self.registry),
                request: LockRequest {
                    path: key.path.clone(),
                    class: key.class,
                    mode,
                },
                keys: vec![key],
            })
            .collect();
        Ok(lock_in_order(pending).await)
    }

    /// Validate a sequence and drop keys it already covers.
    fn plan(&self, requests: impl IntoIterator<Item = LockRequest>) -> SyncResult<Vec<PendingLock>> {
        let mut covered: HashMap<LockKey, LockMode> = HashMap::new();
        let mut pending = Vec::new();
        for request in requests {
            let mut keys = Vec::new();
            for key in request.keys() {
                match covered.get(&key) {
                    None => {
                        covered.insert(key.clone(), request.mode);
                        keys.push(key);
                    }
                    Some(LockMode::Read) if request.mode == LockMode::Write => {
                        return Err(SyncError::ReentrantLock {
                            path: key.path,
                            class: key.class,
                        });
                    }
                    Some(_) => {
                        trace!(path = %key.path, class = %key.class, "Sharing key already held by sequence");
                    }
                }
            }
            if !keys.is_empty() {
                pending.push(PendingLock {
                    registry: Arc::clone(&self.registry),
                    request,
                    keys,
                });
            }
        }
        Ok(pending)
    }

    /// Number of path locks created so far.
    pub fn path_lock_count(&self) -> usize {
        self.registry.tables.lock().path_locks.len()
    }

    /// Number of data locks created so far.
    pub fn data_lock_count(&self) -> usize {
        self.registry.tables.lock().data_locks.len()
    }

    /// Recorded grants and releases, oldest first.
    ///
    /// Empty unless the manager was built with [`with_event_log`](Self::with_event_log).
    pub fn events(&self) -> Vec<LockEvent> {
        self.registry
            .events
            .as_ref()
            .map(|events| events.lock().clone())
            .unwrap_or_default()
    }
}
