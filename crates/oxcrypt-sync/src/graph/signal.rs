//! Settle-once signals backed by a watch channel.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// A value that is set at most once and can be awaited by any number of tasks.
///
/// Waiters that subscribe after the value was set observe it immediately.
pub(crate) struct Signal<T> {
    tx: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signal").field(&*self.tx.borrow()).finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Signal<T> {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Set the value. Returns `false` if it was already set.
    pub(crate) fn settle(&self, value: T) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
            true
        })
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub(crate) fn peek(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// Wait for the value.
    ///
    /// The returned future keeps the channel alive, so it only resolves to
    /// `None` if the sender is gone, which cannot happen while it is polled.
    pub(crate) fn wait(&self) -> impl Future<Output = Option<T>> + Send + 'static {
        let tx = Arc::clone(&self.tx);
        async move {
            let mut rx = tx.subscribe();
            match rx.wait_for(Option::is_some).await {
                Ok(value) => (*value).clone(),
                Err(_) => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_settles_once() {
        let signal = Signal::new();
        assert!(!signal.is_settled());
        assert!(signal.settle(1));
        assert!(!signal.settle(2));
        assert_eq!(signal.peek(), Some(1));
        assert_eq!(signal.wait().await, Some(1));
    }

    #[tokio::test]
    async fn test_multiple_waiters() {
        let signal: Signal<&'static str> = Signal::new();
        let first = tokio::spawn(signal.wait());
        let second = tokio::spawn(signal.wait());

        tokio::task::yield_now().await;
        signal.settle("done");

        let results = timeout(Duration::from_millis(100), async {
            (first.await.unwrap(), second.await.unwrap())
        })
        .await
        .unwrap();
        assert_eq!(results, (Some("done"), Some("done")));
    }

    #[tokio::test]
    async fn test_wait_blocks_until_settled() {
        let signal: Signal<()> = Signal::new();
        assert!(timeout(Duration::from_millis(20), signal.wait()).await.is_err());
    }
}
