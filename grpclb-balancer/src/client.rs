//! Per-address client handles

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use grpclb_core::resilience::Breaker;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::error::{CallError, ClientError};

/// Connection to one backend, as seen by a [`Client`]
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Whether the backend is currently usable for selection
    fn is_connected(&self) -> bool;

    /// Issue a unary call. `method` is the bare method name.
    async fn invoke(&self, method: &str, payload: Bytes) -> Result<Bytes, CallError>;

    /// Release the connection and any background work attached to it
    async fn shutdown(&self) -> Result<(), ClientError>;
}

/// Handle for one resolved backend.
///
/// Cheap to clone; clones share the transport and circuit breaker.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    address: String,
    weight: u32,
    transport: Arc<dyn Transport>,
    breaker: Breaker,
}

impl Client {
    pub fn new(address: impl Into<String>, weight: u32, transport: Arc<dyn Transport>, breaker: Breaker) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                address: address.into(),
                weight,
                transport,
                breaker,
            }),
        }
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Informational only, selection ignores it
    #[must_use]
    pub fn weight(&self) -> u32 {
        self.inner.weight
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    #[must_use]
    pub fn breaker(&self) -> &Breaker {
        &self.inner.breaker
    }

    /// Invoke `method` through the circuit breaker
    pub async fn call(&self, method: &str, payload: Bytes) -> Result<Bytes, CallError> {
        let breaker = &self.inner.breaker;
        if !breaker.is_call_permitted() {
            return Err(CallError::CircuitOpen {
                address: self.inner.address.clone(),
            });
        }

        match self.inner.transport.invoke(method, payload).await {
            Ok(reply) => {
                breaker.on_success();
                Ok(reply)
            }
            Err(e) => {
                if e.trips_breaker() {
                    debug!(addr = %self.inner.address, error = %e, "Call failed, recording breaker failure");
                    breaker.on_error();
                } else {
                    breaker.on_success();
                }
                Err(e)
            }
        }
    }

    /// Tear down the transport
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.inner.transport.shutdown().await
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.inner.address)
            .field("weight", &self.inner.weight)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// Builds a [`Client`] for a newly resolved address.
///
/// Must not block; connection establishment should be lazy.
pub trait ClientFactory: Send + Sync + 'static {
    fn create(&self, address: &str) -> Result<Client, ClientError>;
}

impl<F> ClientFactory for F
where
    F: Fn(&str) -> Result<Client, ClientError> + Send + Sync + 'static,
{
    fn create(&self, address: &str) -> Result<Client, ClientError> {
        self(address)
    }
}
