//! Caller-driven resolution
//!
//! [`ManualResolver`] hands out watchers that only report what the caller
//! pushes. Useful for deterministic tests and for plugging in a discovery
//! source that is not DNS.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::address::Update;
use crate::error::Result;
use crate::queue::UpdateQueue;
use crate::watcher::{Resolver, Watcher};

#[derive(Debug, Clone, Default)]
pub struct ManualResolver {
    watchers: Arc<Mutex<Vec<Weak<UpdateQueue>>>>,
}

impl ManualResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `updates` as one batch to every open watcher.
    ///
    /// Returns the number of watchers that accepted the batch. An empty batch is dropped.
    pub fn push(&self, updates: Vec<Update>) -> usize {
        if updates.is_empty() {
            return 0;
        }

        let mut watchers = self.watchers.lock();
        watchers.retain(|w| w.upgrade().is_some_and(|q| !q.is_closed()));

        let delivered = watchers
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|queue| queue.push(updates.iter().cloned()))
            .count();

        debug!(count = updates.len(), delivered, "Manual updates pushed");
        delivered
    }

    /// Number of watchers still open
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.watchers
            .lock()
            .iter()
            .filter(|w| w.upgrade().is_some_and(|q| !q.is_closed()))
            .count()
    }
}

impl Resolver for ManualResolver {
    fn resolve(&self, target: &str) -> Result<Arc<dyn Watcher>> {
        let queue = Arc::new(UpdateQueue::new());
        self.watchers.lock().push(Arc::downgrade(&queue));
        debug!(target = %target, "Manual watcher registered");
        Ok(Arc::new(ManualWatcher { queue }))
    }
}

/// Watcher fed through [`ManualResolver::push`]
#[derive(Debug)]
pub struct ManualWatcher {
    queue: Arc<UpdateQueue>,
}

#[async_trait]
impl Watcher for ManualWatcher {
    async fn next(&self) -> Result<Vec<Update>> {
        self.queue.next().await
    }

    fn close(&self) {
        self.queue.close();
    }
}
