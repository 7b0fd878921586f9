//! DNS SRV based resolution
//!
//! The watcher re-runs a full SRV lookup on a fixed interval and turns each
//! snapshot into a diff against the previous one. A failed lookup counts as
//! "no observed change": the last known snapshot is kept so a DNS hiccup does
//! not evict every backend.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
#[cfg(test)]
use mockall::automock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::address::{Address, Update};
use crate::error::{NamingError, Result};
use crate::queue::UpdateQueue;
use crate::watcher::{Resolver, Watcher};

/// Default interval between SRV lookups
pub const DEFAULT_DNS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Performs one SRV lookup and returns the `host:port` of every record.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SrvLookup: Send + Sync + 'static {
    async fn lookup(&self, name: &str) -> Result<Vec<Address>>;
}

/// [`SrvLookup`] backed by the hickory async resolver
pub struct HickorySrvLookup {
    resolver: TokioAsyncResolver,
}

impl HickorySrvLookup {
    /// Use the system resolver configuration, falling back to hickory defaults
    #[must_use]
    pub fn from_system_conf() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read system DNS configuration, using defaults");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { resolver }
    }
}

#[async_trait]
impl SrvLookup for HickorySrvLookup {
    async fn lookup(&self, name: &str) -> Result<Vec<Address>> {
        let records = self
            .resolver
            .srv_lookup(name)
            .await
            .map_err(|e| NamingError::Resolution {
                target: name.to_string(),
                reason: e.to_string(),
            })?;

        // Priority and weight are not used for selection
        Ok(records
            .iter()
            .map(|srv| {
                let host = srv.target().to_utf8();
                Address::new(format!("{}:{}", host.trim_end_matches('.'), srv.port()))
            })
            .collect())
    }
}

/// Resolver for `_service._proto.name` targets
#[derive(Clone)]
pub struct DnsResolver {
    lookup: Arc<dyn SrvLookup>,
    poll_interval: Duration,
}

impl DnsResolver {
    /// Create a resolver using the system DNS configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_lookup(Arc::new(HickorySrvLookup::from_system_conf()), DEFAULT_DNS_POLL_INTERVAL)
    }

    #[must_use]
    pub fn with_lookup(lookup: Arc<dyn SrvLookup>, poll_interval: Duration) -> Self {
        Self {
            lookup,
            poll_interval,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver for DnsResolver {
    fn resolve(&self, target: &str) -> Result<Arc<dyn Watcher>> {
        let name = target.trim();
        if name.is_empty() {
            return Err(NamingError::invalid_target(target, "empty DNS name"));
        }
        if name.contains(|c: char| c.is_whitespace() || c == ',' || c == '/') {
            return Err(NamingError::invalid_target(target, "not a DNS name"));
        }
        if self.poll_interval.is_zero() {
            return Err(NamingError::invalid_target(target, "poll interval must be non-zero"));
        }

        let watcher = DnsWatcher::spawn(name.to_string(), self.lookup.clone(), self.poll_interval)?;
        Ok(Arc::new(watcher))
    }
}

/// Watcher that polls DNS in a background task
pub struct DnsWatcher {
    target: String,
    queue: Arc<UpdateQueue>,
    cancel_token: CancellationToken,
}

impl DnsWatcher {
    /// Start polling `target`. The first lookup runs immediately.
    pub fn spawn(target: String, lookup: Arc<dyn SrvLookup>, poll_interval: Duration) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current().map_err(|e| NamingError::Runtime(e.to_string()))?;

        let queue = Arc::new(UpdateQueue::new());
        let cancel_token = CancellationToken::new();

        handle.spawn(poll_loop(
            target.clone(),
            lookup,
            poll_interval,
            queue.clone(),
            cancel_token.clone(),
        ));

        Ok(Self {
            target,
            queue,
            cancel_token,
        })
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait]
impl Watcher for DnsWatcher {
    async fn next(&self) -> Result<Vec<Update>> {
        debug!(target = %self.target, "Waiting for DNS updates");
        self.queue.next().await
    }

    fn close(&self) {
        self.cancel_token.cancel();
        if self.queue.close() {
            info!(target = %self.target, "DNS watcher closed");
        }
    }
}

impl Drop for DnsWatcher {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn poll_loop(
    target: String,
    lookup: Arc<dyn SrvLookup>,
    poll_interval: Duration,
    queue: Arc<UpdateQueue>,
    cancel_token: CancellationToken,
) {
    let mut snapshot = BTreeSet::new();

    loop {
        tokio::select! {
            biased;
            () = cancel_token.cancelled() => break,
            result = lookup.lookup(&target) => match result {
                Ok(addrs) => {
                    let next: BTreeSet<String> = addrs.into_iter().map(|a| a.addr).collect();
                    let updates = diff(&snapshot, &next);
                    if !updates.is_empty() {
                        debug!(target = %target, count = updates.len(), "DNS membership changed");
                        queue.push(updates);
                    }
                    snapshot = next;
                }
                Err(e) => {
                    warn!(
                        target = %target,
                        error = %e,
                        known = snapshot.len(),
                        "DNS lookup failed, keeping last known addresses"
                    );
                }
            }
        }

        // Reschedule unconditionally, unless closed
        tokio::select! {
            biased;
            () = cancel_token.cancelled() => break,
            () = tokio::time::sleep(poll_interval) => {}
        }
    }

    debug!(target = %target, "DNS poll loop stopped");
}

/// Updates turning `old` into `new`: removals first, then additions, each in address order
pub(crate) fn diff(old: &BTreeSet<String>, new: &BTreeSet<String>) -> Vec<Update> {
    old.difference(new)
        .map(|addr| Update::del(addr.clone()))
        .chain(new.difference(old).map(|addr| Update::add(addr.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const INTERVAL: Duration = Duration::from_millis(100);

    fn set(addrs: &[&str]) -> BTreeSet<String> {
        addrs.iter().map(|s| (*s).to_string()).collect()
    }

    fn addrs(addrs: &[&str]) -> Result<Vec<Address>> {
        Ok(addrs.iter().map(|s| Address::from(*s)).collect())
    }

    fn lookup_failure() -> Result<Vec<Address>> {
        Err(NamingError::Resolution {
            target: "_grpc._tcp.svc".to_string(),
            reason: "SERVFAIL".to_string(),
        })
    }

    /// Mock that replays `script` in order and then repeats the last answer forever
    fn scripted_lookup(script: Vec<Result<Vec<Address>>>) -> (MockSrvLookup, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let script = Arc::new(Mutex::new(VecDeque::from(script)));

        let mut mock = MockSrvLookup::new();
        let counter = calls.clone();
        mock.expect_lookup().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut script = script.lock();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        });
        (mock, calls)
    }

    #[test]
    fn test_diff_emits_dels_then_adds() {
        let updates = diff(&set(&["a:1", "b:1", "c:1"]), &set(&["b:1", "d:1", "c:1"]));
        assert_eq!(updates, vec![Update::del("a:1"), Update::add("d:1")]);
    }

    #[test]
    fn test_diff_of_identical_sets_is_empty() {
        assert!(diff(&set(&["a:1", "b:1"]), &set(&["b:1", "a:1"])).is_empty());
    }

    #[test]
    fn test_diff_from_empty_is_full_add() {
        let updates = diff(&BTreeSet::new(), &set(&["b:1", "a:1"]));
        assert_eq!(updates, vec![Update::add("a:1"), Update::add("b:1")]);
    }

    #[tokio::test]
    async fn test_resolve_rejects_malformed_targets() {
        let (mock, _) = scripted_lookup(vec![addrs(&[])]);
        let resolver = DnsResolver::with_lookup(Arc::new(mock), INTERVAL);

        assert!(matches!(resolver.resolve("   "), Err(NamingError::InvalidTarget { .. })));
        assert!(matches!(resolver.resolve("a.example, b.example"), Err(NamingError::InvalidTarget { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_batch_is_full_set() {
        let (mock, _) = scripted_lookup(vec![addrs(&["10.0.0.2:80", "10.0.0.1:80"])]);
        let resolver = DnsResolver::with_lookup(Arc::new(mock), INTERVAL);
        let watcher = resolver.resolve("_grpc._tcp.svc").unwrap();

        let batch = watcher.next().await.unwrap();
        assert_eq!(batch, vec![Update::add("10.0.0.1:80"), Update::add("10.0.0.2:80")]);
        watcher.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_snapshots_emit_nothing_but_keep_polling() {
        let (mock, calls) = scripted_lookup(vec![addrs(&["10.0.0.1:80"])]);
        let resolver = DnsResolver::with_lookup(Arc::new(mock), INTERVAL);
        let watcher = resolver.resolve("_grpc._tcp.svc").unwrap();

        watcher.next().await.unwrap();

        let waited = tokio::time::timeout(INTERVAL * 10, watcher.next()).await;
        assert!(waited.is_err(), "no batch expected for an unchanged address set");
        assert!(calls.load(Ordering::SeqCst) >= 5);
        watcher.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_membership_change_is_delivered_as_diff() {
        let (mock, _) = scripted_lookup(vec![
            addrs(&["10.0.0.1:80", "10.0.0.2:80"]),
            addrs(&["10.0.0.2:80", "10.0.0.3:80"]),
        ]);
        let resolver = DnsResolver::with_lookup(Arc::new(mock), INTERVAL);
        let watcher = resolver.resolve("_grpc._tcp.svc").unwrap();

        watcher.next().await.unwrap();
        let batch = watcher.next().await.unwrap();
        assert_eq!(batch, vec![Update::del("10.0.0.1:80"), Update::add("10.0.0.3:80")]);
        watcher.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_lookup_keeps_last_snapshot_and_reschedules() {
        let (mock, calls) = scripted_lookup(vec![
            addrs(&["10.0.0.1:80", "10.0.0.2:80"]),
            lookup_failure(),
            lookup_failure(),
            addrs(&["10.0.0.1:80", "10.0.0.2:80", "10.0.0.3:80"]),
        ]);
        let resolver = DnsResolver::with_lookup(Arc::new(mock), INTERVAL);
        let watcher = resolver.resolve("_grpc._tcp.svc").unwrap();

        watcher.next().await.unwrap();

        // The failures must neither evict nor stop polling
        let batch = watcher.next().await.unwrap();
        assert_eq!(batch, vec![Update::add("10.0.0.3:80")]);
        assert!(calls.load(Ordering::SeqCst) >= 4);
        watcher.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_polling_and_rejects_next() {
        let (mock, calls) = scripted_lookup(vec![addrs(&["10.0.0.1:80"])]);
        let resolver = DnsResolver::with_lookup(Arc::new(mock), INTERVAL);
        let watcher = resolver.resolve("_grpc._tcp.svc").unwrap();

        watcher.next().await.unwrap();
        watcher.close();
        watcher.close();

        // Let any in-flight iteration observe the cancellation
        tokio::time::sleep(INTERVAL).await;
        let after_close = calls.load(Ordering::SeqCst);

        tokio::time::sleep(INTERVAL * 10).await;
        assert_eq!(calls.load(Ordering::SeqCst), after_close);
        assert_eq!(watcher.next().await, Err(NamingError::WatcherClosed));
    }

    #[test]
    fn test_resolve_without_runtime_is_an_error() {
        let (mock, _) = scripted_lookup(vec![addrs(&[])]);
        let resolver = DnsResolver::with_lookup(Arc::new(mock), INTERVAL);
        assert!(matches!(resolver.resolve("_grpc._tcp.svc"), Err(NamingError::Runtime(_))));
    }
}
