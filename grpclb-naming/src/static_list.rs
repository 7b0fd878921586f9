//! Fixed address list resolution

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::address::Update;
use crate::error::{NamingError, Result};
use crate::queue::UpdateQueue;
use crate::watcher::{Resolver, Watcher};

/// Resolver for comma-separated `host:port` lists
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticResolver;

impl StaticResolver {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, target: &str) -> Result<Arc<dyn Watcher>> {
        Ok(Arc::new(StaticWatcher::parse(target)?))
    }
}

/// Watcher that delivers its address list once and then stays silent
#[derive(Debug)]
pub struct StaticWatcher {
    addrs: Vec<String>,
    queue: UpdateQueue,
}

impl StaticWatcher {
    /// Parse `target` and queue a single all-ADD batch.
    ///
    /// Entries are trimmed and duplicates collapse to their first occurrence.
    pub fn parse(target: &str) -> Result<Self> {
        if target.trim().is_empty() {
            return Err(NamingError::invalid_target(target, "empty address list"));
        }

        let mut seen = HashSet::new();
        let mut addrs = Vec::new();
        for entry in target.split(',').map(str::trim) {
            if entry.is_empty() {
                return Err(NamingError::invalid_target(target, "empty address entry"));
            }
            if seen.insert(entry) {
                addrs.push(entry.to_string());
            }
        }

        let queue = UpdateQueue::new();
        queue.push(addrs.iter().cloned().map(Update::add));
        debug!(count = addrs.len(), "Static address list parsed");

        Ok(Self { addrs, queue })
    }

    /// Parsed addresses in list order
    #[must_use]
    pub fn addresses(&self) -> &[String] {
        &self.addrs
    }
}

#[async_trait]
impl Watcher for StaticWatcher {
    async fn next(&self) -> Result<Vec<Update>> {
        self.queue.next().await
    }

    fn close(&self) {
        self.queue.close();
    }
}
