//! Ordered lock sequences.

use super::{HeldLock, LockRequest, PendingLock};

/// Locks acquired front-to-back, released back-to-front.
///
/// Dropping a sequence releases it, so every exit path (success, error,
/// panic unwinding, or a cancelled future) unwinds exactly the prefix that
/// was acquired, in reverse.
#[must_use = "dropping a lock sequence releases it immediately"]
#[derive(Debug, Default)]
pub struct LockSequence {
    held: Vec<HeldLock>,
}

impl LockSequence {
    /// Number of locks held.
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Check if the sequence holds nothing.
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Requests held, in acquisition order.
    pub fn requests(&self) -> impl Iterator<Item = &LockRequest> {
        self.held.iter().map(HeldLock::request)
    }

    /// Release every lock in reverse acquisition order.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockSequence {
    fn drop(&mut self) {
        // Vec drops front-to-back; unwind explicitly instead
        while let Some(lock) = self.held.pop() {
            drop(lock);
        }
    }
}

/// Acquire `pending` strictly in order.
///
/// Each lock is granted before the next is requested. If the returned future
/// is dropped while waiting, the locks granted so far are released in
/// reverse order.
pub async fn lock_in_order(pending: Vec<PendingLock>) -> LockSequence {
    let mut sequence = LockSequence {
        held: Vec::with_capacity(pending.len()),
    };
    for lock in pending {
        let held = lock.acquire().await;
        sequence.held.push(held);
    }
    sequence
}

/// Release `sequence` in exact reverse order of acquisition.
pub fn unlock_in_order(sequence: LockSequence) {
    sequence.release();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::{LockClass, LockEventKind, LockManager};
    use crate::path::CloudPath;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_release_is_reverse_of_acquire() {
        let manager = LockManager::with_event_log(Arc::default());
        let pending = vec![
            manager.read(CloudPath::new("/a"), LockClass::Path),
            manager.read(CloudPath::new("/a"), LockClass::Data),
            manager.write(CloudPath::new("/a/b"), LockClass::Path),
            manager.write(CloudPath::new("/a/b"), LockClass::Data),
        ];

        let sequence = lock_in_order(pending).await;
        assert_eq!(sequence.len(), 4);
        unlock_in_order(sequence);

        let events = manager.events();
        let (granted, released): (Vec<_>, Vec<_>) =
            events.iter().partition(|e| e.kind == LockEventKind::Granted);
        assert_eq!(granted.len(), 5);
        assert_eq!(released.len(), 5);

        let mut reversed: Vec<_> = granted.iter().map(|e| e.key.clone()).collect();
        reversed.reverse();
        let released: Vec<_> = released.iter().map(|e| e.key.clone()).collect();
        assert_eq!(released, reversed);
    }

    #[tokio::test]
    async fn test_cancelled_acquisition_releases_prefix() {
        let manager = LockManager::with_event_log(Arc::default());
        let blocker = manager
            .acquire_write(CloudPath::new("/b"), LockClass::Data)
            .await;

        let pending = vec![
            manager.read(CloudPath::new("/a"), LockClass::Path),
            manager.read(CloudPath::new("/a"), LockClass::Data),
            manager.write(CloudPath::new("/b"), LockClass::Data),
        ];
        let result = timeout(Duration::from_millis(50), lock_in_order(pending)).await;
        assert!(result.is_err(), "Acquisition should block on /b");

        // Prefix must be fully released after cancellation
        let snapshot = manager.metrics().snapshot();
        assert_eq!(snapshot.outstanding_locks(), 1, "Only the blocker remains");

        let released: Vec<_> = manager
            .events()
            .into_iter()
            .filter(|e| e.kind == LockEventKind::Released)
            .map(|e| e.key.path.to_string())
            .collect();
        assert_eq!(released, ["/a", "/a", "/"]);
        drop(blocker);
    }

    #[tokio::test]
    async fn test_empty_sequence() {
        let sequence = lock_in_order(Vec::new()).await;
        assert!(sequence.is_empty());
        assert_eq!(sequence.requests().count(), 0);
    }
}
