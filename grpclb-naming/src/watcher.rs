//! Resolver and watcher interfaces

use std::sync::Arc;

use async_trait::async_trait;

use crate::address::Update;
use crate::error::Result;

/// Source of incremental membership updates for one resolution target.
///
/// `next()` never yields an empty batch. Once `close()` has been called, every
/// pending and future `next()` completes with [`NamingError::WatcherClosed`].
///
/// [`NamingError::WatcherClosed`]: crate::NamingError::WatcherClosed
#[async_trait]
pub trait Watcher: Send + Sync {
    /// Wait for the next non-empty batch of updates
    async fn next(&self) -> Result<Vec<Update>>;

    /// Stop resolving and release resources. Safe to call more than once.
    fn close(&self);
}

/// Binds a target string to a fresh [`Watcher`].
///
/// Must not block. Errors are reserved for malformed targets.
pub trait Resolver: Send + Sync {
    fn resolve(&self, target: &str) -> Result<Arc<dyn Watcher>>;
}
