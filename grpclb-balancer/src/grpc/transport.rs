use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::uri::PathAndQuery;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tracing::debug;

use super::codec::RawCodec;
use crate::client::Transport;
use crate::error::{CallError, ClientError};

/// [`Transport`] over a lazily connecting tonic channel
pub struct GrpcTransport {
    address: String,
    channel: Channel,
    /// `/{package}.{service}`
    path_prefix: String,
    connected: Arc<AtomicBool>,
    cancel_token: CancellationToken,
}

impl GrpcTransport {
    pub fn new(
        address: impl Into<String>,
        channel: Channel,
        path_prefix: impl Into<String>,
        connected: Arc<AtomicBool>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            address: address.into(),
            channel,
            path_prefix: path_prefix.into(),
            connected,
            cancel_token,
        }
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn invoke(&self, method: &str, payload: Bytes) -> Result<Bytes, CallError> {
        let path = method_path(&self.path_prefix, method)?;

        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready().await.map_err(|e| CallError::Transport {
            address: self.address.clone(),
            reason: e.to_string(),
        })?;

        let response = grpc.unary(tonic::Request::new(payload), path, RawCodec).await?;
        Ok(response.into_inner())
    }

    async fn shutdown(&self) -> Result<(), ClientError> {
        // Stops the health probe; the channel closes once the last clone drops
        self.cancel_token.cancel();
        self.connected.store(false, Ordering::Release);
        debug!(addr = %self.address, "gRPC transport shut down");
        Ok(())
    }
}

/// Full request path for `method`.
///
/// A bare name is appended to `prefix`; a name starting with `/` is used as is.
pub(crate) fn method_path(prefix: &str, method: &str) -> Result<PathAndQuery, CallError> {
    let invalid = |reason: &str| CallError::InvalidMethod {
        method: method.to_string(),
        reason: reason.to_string(),
    };

    let method = method.trim();
    if method.is_empty() {
        return Err(invalid("empty method name"));
    }

    let path = if method.starts_with('/') {
        method.to_string()
    } else {
        format!("{prefix}/{method}")
    };

    PathAndQuery::try_from(path).map_err(|e| invalid(&e.to_string()))
}
