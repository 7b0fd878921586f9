//! Resolution loop, client registry and round-robin selection

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use grpclb_naming::{NamingError, Resolver, Update, UpdateOp, Watcher};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{Client, ClientFactory};
use crate::error::{BalancerError, ClientError, Result};
use crate::registry::Registry;

/// Capacity of the change notification channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Pause after an unexpected watcher error before asking again
const WATCHER_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Published once per applied batch
#[derive(Debug, Clone)]
pub struct RegistryChanged {
    /// Every registered client, sorted by address
    pub clients: Vec<Client>,
    /// ADDs in this batch whose client could not be built
    pub failures: Vec<ConstructionFailure>,
}

impl RegistryChanged {
    #[must_use]
    pub fn addresses(&self) -> Vec<&str> {
        self.clients.iter().map(Client::address).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructionFailure {
    pub address: String,
    pub reason: String,
}

/// Observable lifecycle stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalancerState {
    Created,
    Running,
    Closed,
}

enum Lifecycle {
    Created,
    Running {
        target: String,
        watcher: Arc<dyn Watcher>,
        task: JoinHandle<()>,
    },
    Closed,
}

/// Keeps one [`Client`] per resolved address and selects among them round robin.
///
/// The registry is only written by the resolution loop spawned in [`start`];
/// readers never wait on I/O.
///
/// [`start`]: Balancer::start
pub struct Balancer {
    resolver: Arc<dyn Resolver>,
    factory: Arc<dyn ClientFactory>,
    registry: Arc<RwLock<Registry>>,
    cursor: AtomicUsize,
    events: broadcast::Sender<RegistryChanged>,
    state: Mutex<Lifecycle>,
    cancel_token: CancellationToken,
}

impl Balancer {
    pub fn new(resolver: Arc<dyn Resolver>, factory: Arc<dyn ClientFactory>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            resolver,
            factory,
            registry: Arc::new(RwLock::new(Registry::default())),
            cursor: AtomicUsize::new(0),
            events,
            state: Mutex::new(Lifecycle::Created),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Resolve `target` and start reconciling the registry against it.
    ///
    /// Must be called from within a tokio runtime. On error the balancer stays
    /// in `Created` and may be started again.
    pub fn start(&self, target: &str) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            Lifecycle::Created => {}
            Lifecycle::Running { .. } => {
                return Err(BalancerError::InvalidState("balancer already started".to_string()));
            }
            Lifecycle::Closed => {
                return Err(BalancerError::InvalidState("balancer is closed".to_string()));
            }
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BalancerError::InvalidState(format!("no tokio runtime: {e}")))?;
        let watcher = self.resolver.resolve(target)?;

        let resolution = ResolutionLoop {
            target: target.to_string(),
            watcher: watcher.clone(),
            factory: self.factory.clone(),
            registry: self.registry.clone(),
            events: self.events.clone(),
            cancel_token: self.cancel_token.clone(),
        };
        let task = runtime.spawn(resolution.run());

        info!(target = %target, "Balancer started");
        *state = Lifecycle::Running {
            target: target.to_string(),
            watcher,
            task,
        };
        Ok(())
    }

    /// Next connected client in address order, wrapping around
    pub fn pick_next(&self) -> Result<Client> {
        match *self.state.lock() {
            Lifecycle::Running { .. } => {}
            Lifecycle::Created => {
                return Err(BalancerError::InvalidState("balancer not started".to_string()));
            }
            Lifecycle::Closed => {
                return Err(BalancerError::InvalidState("balancer is closed".to_string()));
            }
        }

        let registry = self.registry.read();
        let live = registry.connected();
        if live.is_empty() {
            return Err(BalancerError::NoAvailableClient);
        }

        let n = live.len();
        let index = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c % n + 1) % n))
            .unwrap_or_else(|c| c)
            % n;
        Ok(live[index].clone())
    }

    /// Receive a [`RegistryChanged`] after every applied batch
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryChanged> {
        self.events.subscribe()
    }

    /// Registered clients in address order, connected or not
    pub fn clients(&self) -> Vec<Client> {
        self.registry.read().snapshot()
    }

    pub fn state(&self) -> BalancerState {
        match *self.state.lock() {
            Lifecycle::Created => BalancerState::Created,
            Lifecycle::Running { .. } => BalancerState::Running,
            Lifecycle::Closed => BalancerState::Closed,
        }
    }

    /// Stop resolving and tear down every client. Safe to call more than once.
    pub async fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), Lifecycle::Closed);

        let Lifecycle::Running { target, watcher, task } = previous else {
            return;
        };

        self.cancel_token.cancel();
        watcher.close();
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                error!(target = %target, error = %e, "Resolution loop panicked");
            }
        }

        let clients = self.registry.write().drain();
        let count = clients.len();
        join_all(clients.iter().map(teardown)).await;

        info!(target = %target, clients = count, "Balancer closed");
    }
}

impl Drop for Balancer {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        if let Lifecycle::Running { watcher, .. } = &*self.state.lock() {
            watcher.close();
        }
    }
}

/// Shut a client down. Errors and panics are logged; the client is released either way.
async fn teardown(client: &Client) {
    let result = AssertUnwindSafe(client.shutdown())
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(ClientError::Teardown {
                address: client.address().to_string(),
                reason: format!("panicked: {}", panic_message(panic.as_ref())),
            })
        });

    match result {
        Ok(()) => debug!(addr = %client.address(), "Client torn down"),
        Err(e) => warn!(addr = %client.address(), error = %e, "Client teardown failed"),
    }
}

/// Build a client, turning a panicking factory into an ordinary error
fn create_client(factory: &dyn ClientFactory, address: &str) -> std::result::Result<Client, ClientError> {
    std::panic::catch_unwind(AssertUnwindSafe(|| factory.create(address))).unwrap_or_else(|panic| {
        Err(ClientError::Construction(format!(
            "factory panicked: {}",
            panic_message(panic.as_ref())
        )))
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

struct ResolutionLoop {
    target: String,
    watcher: Arc<dyn Watcher>,
    factory: Arc<dyn ClientFactory>,
    registry: Arc<RwLock<Registry>>,
    events: broadcast::Sender<RegistryChanged>,
    cancel_token: CancellationToken,
}

impl ResolutionLoop {
    async fn run(self) {
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => break,
                next = self.watcher.next() => next,
            };

            match next {
                Ok(batch) => {
                    let failures = self.apply(&batch).await;

                    // No notifications once closing has begun
                    if self.cancel_token.is_cancelled() {
                        break;
                    }

                    let changed = RegistryChanged {
                        clients: self.registry.read().snapshot(),
                        failures,
                    };
                    // Err only means nobody is subscribed
                    let _ = self.events.send(changed);
                }
                Err(NamingError::WatcherClosed) => {
                    info!(target = %self.target, "Watcher closed, stopping resolution loop");
                    break;
                }
                Err(e) => {
                    error!(target = %self.target, error = %e, "Watcher returned an error");
                    tokio::select! {
                        biased;
                        () = self.cancel_token.cancelled() => break,
                        () = tokio::time::sleep(WATCHER_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        debug!(target = %self.target, "Resolution loop stopped");
    }

    /// Apply updates strictly in order, returning the ADDs whose client could not be built
    async fn apply(&self, batch: &[Update]) -> Vec<ConstructionFailure> {
        debug!(target = %self.target, updates = batch.len(), "Applying update batch");
        let mut failures = Vec::new();

        for update in batch {
            match update.op {
                UpdateOp::Add => {
                    if self.registry.read().contains(&update.addr) {
                        continue;
                    }
                    match create_client(self.factory.as_ref(), &update.addr) {
                        Ok(client) => {
                            let total = {
                                let mut registry = self.registry.write();
                                registry.insert(client);
                                registry.len()
                            };
                            info!(addr = %update.addr, total, "Client added");
                        }
                        Err(e) => {
                            warn!(addr = %update.addr, error = %e, "Failed to create client");
                            failures.push(ConstructionFailure {
                                address: update.addr.clone(),
                                reason: e.to_string(),
                            });
                        }
                    }
                }
                UpdateOp::Del => {
                    let removed = self.registry.write().remove(&update.addr);
                    if let Some(client) = removed {
                        info!(addr = %update.addr, "Client removed");
                        teardown(&client).await;
                    }
                }
            }
        }

        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockTransport, Transport};
    use crate::error::{CallError, ClientError};
    use bytes::Bytes;
    use grpclb_core::resilience;
    use grpclb_naming::{ManualResolver, StaticResolver};
    use std::sync::atomic::AtomicBool;

    fn mock_client(address: &str, connected: Arc<AtomicBool>) -> Client {
        let mut transport = MockTransport::new();
        transport
            .expect_is_connected()
            .returning(move || connected.load(Ordering::SeqCst));
        transport.expect_shutdown().returning(|| Ok(()));
        Client::new(
            address,
            1,
            Arc::new(transport),
            resilience::create(5, Duration::from_secs(1), Duration::from_secs(2)),
        )
    }

    fn connected_factory() -> Arc<dyn ClientFactory> {
        Arc::new(|address: &str| -> std::result::Result<Client, ClientError> {
            Ok(mock_client(address, Arc::new(AtomicBool::new(true))))
        })
    }

    #[tokio::test]
    async fn test_pick_next_before_start_is_invalid_state() {
        let balancer = Balancer::new(Arc::new(ManualResolver::new()), connected_factory());
        assert_eq!(balancer.state(), BalancerState::Created);
        assert!(matches!(balancer.pick_next(), Err(BalancerError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_start_twice_is_invalid_state() {
        let balancer = Balancer::new(Arc::new(ManualResolver::new()), connected_factory());
        balancer.start("svc").unwrap();
        assert!(matches!(balancer.start("svc"), Err(BalancerError::InvalidState(_))));
        balancer.close().await;
        assert!(matches!(balancer.start("svc"), Err(BalancerError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_malformed_target_keeps_balancer_startable() {
        let balancer = Balancer::new(Arc::new(StaticResolver::new()), connected_factory());
        assert!(matches!(
            balancer.start("a:1,,b:2"),
            Err(BalancerError::Naming(NamingError::InvalidTarget { .. }))
        ));
        assert_eq!(balancer.state(), BalancerState::Created);
        assert!(balancer.start("a:1,b:2").is_ok());
        balancer.close().await;
    }

    #[tokio::test]
    async fn test_static_target_populates_registry() {
        let balancer = Balancer::new(Arc::new(StaticResolver::new()), connected_factory());
        let mut events = balancer.subscribe();
        balancer.start("10.0.0.2:80,10.0.0.1:80").unwrap();

        let changed = events.recv().await.unwrap();
        assert_eq!(changed.addresses(), vec!["10.0.0.1:80", "10.0.0.2:80"]);
        assert!(changed.failures.is_empty());

        assert_eq!(balancer.pick_next().unwrap().address(), "10.0.0.1:80");
        assert_eq!(balancer.pick_next().unwrap().address(), "10.0.0.2:80");
        assert_eq!(balancer.pick_next().unwrap().address(), "10.0.0.1:80");
        balancer.close().await;
    }

    #[tokio::test]
    async fn test_no_connected_client() {
        let resolver = ManualResolver::new();
        let online = Arc::new(AtomicBool::new(false));
        let flag = online.clone();
        let factory = Arc::new(move |address: &str| -> std::result::Result<Client, ClientError> {
            Ok(mock_client(address, flag.clone()))
        });

        let balancer = Balancer::new(Arc::new(resolver.clone()), factory);
        let mut events = balancer.subscribe();
        balancer.start("svc").unwrap();
        assert!(matches!(balancer.pick_next(), Err(BalancerError::NoAvailableClient)));

        resolver.push(vec![Update::add("a:1")]);
        events.recv().await.unwrap();
        assert!(matches!(balancer.pick_next(), Err(BalancerError::NoAvailableClient)));
        assert_eq!(balancer.clients().len(), 1);

        online.store(true, Ordering::SeqCst);
        assert_eq!(balancer.pick_next().unwrap().address(), "a:1");
        balancer.close().await;
    }

    #[tokio::test]
    async fn test_close_tears_down_remaining_clients() {
        let resolver = ManualResolver::new();
        let mut transport = MockTransport::new();
        transport.expect_is_connected().return_const(true);
        transport.expect_shutdown().times(1).returning(|| Ok(()));
        let client = Client::new(
            "a:1",
            1,
            Arc::new(transport),
            resilience::create(5, Duration::from_secs(1), Duration::from_secs(2)),
        );
        let factory = Arc::new(move |_: &str| -> std::result::Result<Client, ClientError> { Ok(client.clone()) });

        let balancer = Balancer::new(Arc::new(resolver.clone()), factory);
        let mut events = balancer.subscribe();
        balancer.start("svc").unwrap();
        resolver.push(vec![Update::add("a:1")]);
        events.recv().await.unwrap();

        balancer.close().await;
        balancer.close().await;
        assert_eq!(balancer.state(), BalancerState::Closed);
        assert!(balancer.clients().is_empty());
        assert!(matches!(balancer.pick_next(), Err(BalancerError::InvalidState(_))));
        assert_eq!(resolver.watcher_count(), 0);
    }

    #[test]
    fn test_panicking_factory_becomes_construction_error() {
        let factory = |address: &str| -> std::result::Result<Client, ClientError> {
            panic!("no transport for {address}")
        };
        match create_client(&factory, "x:1") {
            Err(ClientError::Construction(reason)) => {
                assert_eq!(reason, "factory panicked: no transport for x:1");
            }
            other => panic!("unexpected result: {:?}", other.map(|c| c.address().to_string())),
        }
    }

    /// Shutdown that blows up instead of returning
    struct PanickingTransport;

    #[async_trait::async_trait]
    impl Transport for PanickingTransport {
        fn is_connected(&self) -> bool {
            true
        }

        async fn invoke(&self, _method: &str, payload: Bytes) -> std::result::Result<Bytes, CallError> {
            Ok(payload)
        }

        async fn shutdown(&self) -> std::result::Result<(), ClientError> {
            panic!("socket gone")
        }
    }

    #[tokio::test]
    async fn test_teardown_survives_panicking_transport() {
        let client = Client::new(
            "x:1",
            1,
            Arc::new(PanickingTransport),
            resilience::create(5, Duration::from_secs(1), Duration::from_secs(2)),
        );

        teardown(&client).await;
        assert_eq!(panic_message(&"socket gone"), "socket gone");
    }
}
