//! Pending-update buffer shared by all watcher implementations

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::address::Update;
use crate::error::{NamingError, Result};

/// Single buffer of not-yet-delivered updates.
///
/// Producers append; `next()` drains the whole buffer at once, so unread diffs
/// coalesce instead of piling up as separate batches.
#[derive(Debug, Default)]
pub(crate) struct UpdateQueue {
    pending: Mutex<Vec<Update>>,
    notify: Notify,
    closed: AtomicBool,
}

impl UpdateQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append updates. Returns `false` when nothing was queued (empty input or closed).
    pub(crate) fn push(&self, updates: impl IntoIterator<Item = Update>) -> bool {
        if self.is_closed() {
            return false;
        }

        let added = {
            let mut pending = self.pending.lock();
            let before = pending.len();
            pending.extend(updates);
            pending.len() > before
        };

        if added {
            self.notify.notify_waiters();
        }
        added
    }

    /// Drain the buffer, waiting until it holds at least one update
    pub(crate) async fn next(&self) -> Result<Vec<Update>> {
        loop {
            // Register interest before inspecting state so a push in between is not lost
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return Err(NamingError::WatcherClosed);
            }

            {
                let mut pending = self.pending.lock();
                if !pending.is_empty() {
                    return Ok(std::mem::take(&mut *pending));
                }
            }

            notified.await;
        }
    }

    /// Mark closed and wake every waiter. Returns `true` on the first call only.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.pending.lock().clear();
        self.notify.notify_waiters();
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_next_returns_queued_updates_immediately() {
        let queue = UpdateQueue::new();
        assert!(queue.push(vec![Update::add("a:1"), Update::add("b:1")]));

        let batch = queue.next().await.unwrap();
        assert_eq!(batch, vec![Update::add("a:1"), Update::add("b:1")]);
    }

    #[tokio::test]
    async fn test_unread_pushes_coalesce_into_one_batch() {
        let queue = UpdateQueue::new();
        queue.push(vec![Update::add("a:1")]);
        queue.push(vec![Update::del("a:1"), Update::add("b:1")]);

        let batch = queue.next().await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[2], Update::add("b:1"));
    }

    #[tokio::test]
    async fn test_empty_push_is_ignored() {
        let queue = UpdateQueue::new();
        assert!(!queue.push(Vec::new()));

        let waited = tokio::time::timeout(Duration::from_millis(20), queue.next()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_waiter_is_woken_by_push() {
        let queue = Arc::new(UpdateQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };

        tokio::task::yield_now().await;
        queue.push(vec![Update::add("a:1")]);

        let batch = waiter.await.unwrap().unwrap();
        assert_eq!(batch, vec![Update::add("a:1")]);
    }

    #[tokio::test]
    async fn test_close_rejects_pending_and_future_next() {
        let queue = Arc::new(UpdateQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };

        tokio::task::yield_now().await;
        assert!(queue.close());
        assert!(!queue.close());

        assert_eq!(waiter.await.unwrap(), Err(NamingError::WatcherClosed));
        assert_eq!(queue.next().await, Err(NamingError::WatcherClosed));
        assert!(!queue.push(vec![Update::add("a:1")]));
    }
}
