//! Error types for the balancer and its client handles

use grpclb_naming::NamingError;
use thiserror::Error;
use tonic::Code;

/// Balancer error types
#[derive(Debug, Error)]
pub enum BalancerError {
    #[error("No available client")]
    NoAvailableClient,

    #[error("Invalid balancer state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Naming(#[from] NamingError),
}

/// Errors raised while building or tearing down a client handle
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("Client construction failed: {0}")]
    Construction(String),

    #[error("Teardown of '{address}' failed: {reason}")]
    Teardown { address: String, reason: String },
}

/// Errors returned from [`Client::call`](crate::Client::call)
#[derive(Debug, Error)]
pub enum CallError {
    #[error("Circuit open for {address}")]
    CircuitOpen { address: String },

    #[error("RPC failed: {0}")]
    Rpc(Box<tonic::Status>),

    #[error("Transport error on {address}: {reason}")]
    Transport { address: String, reason: String },

    #[error("Invalid method '{method}': {reason}")]
    InvalidMethod { method: String, reason: String },
}

impl From<tonic::Status> for CallError {
    fn from(status: tonic::Status) -> Self {
        Self::Rpc(Box::new(status))
    }
}

impl CallError {
    /// Whether this outcome counts as a backend failure for the circuit breaker.
    ///
    /// Application-level statuses (`NotFound`, `InvalidArgument`, ...) mean the
    /// backend is alive and answering.
    #[must_use]
    pub fn trips_breaker(&self) -> bool {
        match self {
            Self::Rpc(status) => matches!(
                status.code(),
                Code::Unavailable | Code::DeadlineExceeded | Code::Internal | Code::Unknown | Code::ResourceExhausted
            ),
            Self::Transport { .. } => true,
            Self::CircuitOpen { .. } | Self::InvalidMethod { .. } => false,
        }
    }
}

/// Result type for balancer operations
pub type Result<T> = std::result::Result<T, BalancerError>;
