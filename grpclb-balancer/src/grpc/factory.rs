use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use grpclb_core::config::{BreakerConfig, Config, HealthCheckConfig, TlsConfig, TransportConfig};
use grpclb_core::resilience;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Certificate, ClientTlsConfig, Endpoint, Identity};
use tracing::{debug, info};

use super::health::HealthProbe;
use super::transport::GrpcTransport;
use crate::client::{Client, ClientFactory};
use crate::error::ClientError;

/// Resolved addresses carry no weight, every client gets the same
const DEFAULT_WEIGHT: u32 = 1;

/// Builds [`Client`]s backed by lazily connecting tonic channels
pub struct GrpcClientFactory {
    path_prefix: String,
    health_service: String,
    transport: TransportConfig,
    tls: Option<ClientTlsConfig>,
    health_check: HealthCheckConfig,
    breaker: BreakerConfig,
}

impl GrpcClientFactory {
    /// Reads TLS material from disk, so call once at startup
    pub fn from_config(config: &Config) -> Result<Self, ClientError> {
        let tls = if config.tls.enable {
            Some(build_tls(&config.tls, config.transport.host_override.as_deref())?)
        } else {
            None
        };

        let service = &config.service;
        let health_service = if service.package.is_empty() {
            service.service.clone()
        } else {
            format!("{}.{}", service.package, service.service)
        };

        info!(
            service = %health_service,
            tls = tls.is_some(),
            health_check = config.health_check.enable,
            "gRPC client factory configured"
        );

        Ok(Self {
            path_prefix: service.path_prefix(),
            health_service,
            transport: config.transport.clone(),
            tls,
            health_check: config.health_check.clone(),
            breaker: config.breaker.clone(),
        })
    }

    fn endpoint(&self, address: &str) -> Result<Endpoint, ClientError> {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        let invalid = |reason: String| ClientError::InvalidAddress {
            address: address.to_string(),
            reason,
        };

        let mut endpoint = Endpoint::from_shared(format!("{scheme}://{address}"))
            .map_err(|e| invalid(e.to_string()))?
            .connect_timeout(self.transport.connect_timeout())
            .timeout(self.transport.request_timeout())
            .tcp_keepalive(self.transport.tcp_keepalive());

        if let Some(tls) = &self.tls {
            endpoint = endpoint.tls_config(tls.clone()).map_err(|e| ClientError::Tls(e.to_string()))?;
        }

        Ok(endpoint)
    }
}

impl ClientFactory for GrpcClientFactory {
    fn create(&self, address: &str) -> Result<Client, ClientError> {
        let channel = self.endpoint(address)?.connect_lazy();

        // With probing on, a client is unusable until its first successful check
        let connected = Arc::new(AtomicBool::new(!self.health_check.enable));
        let cancel_token = CancellationToken::new();

        if self.health_check.enable {
            let runtime =
                tokio::runtime::Handle::try_current().map_err(|e| ClientError::Construction(e.to_string()))?;
            runtime.spawn(
                HealthProbe {
                    address: address.to_string(),
                    service: self.health_service.clone(),
                    channel: channel.clone(),
                    interval: self.health_check.interval(),
                    timeout: self.health_check.timeout(),
                    connected: connected.clone(),
                    cancel_token: cancel_token.clone(),
                }
                .run(),
            );
        }

        let transport = GrpcTransport::new(address, channel, self.path_prefix.clone(), connected, cancel_token);
        debug!(addr = %address, "gRPC client created");

        Ok(Client::new(
            address,
            DEFAULT_WEIGHT,
            Arc::new(transport),
            resilience::from_config(&self.breaker),
        ))
    }
}

fn build_tls(tls: &TlsConfig, host_override: Option<&str>) -> Result<ClientTlsConfig, ClientError> {
    let read = |path: &str| std::fs::read(path).map_err(|e| ClientError::Tls(format!("failed to read {path}: {e}")));

    let mut config = ClientTlsConfig::new();

    config = match &tls.ca_cert_path {
        Some(path) => config.ca_certificate(Certificate::from_pem(read(path)?)),
        None => config.with_native_roots(),
    };

    match (&tls.cert_path, &tls.key_path) {
        (Some(cert), Some(key)) => {
            config = config.identity(Identity::from_pem(read(cert)?, read(key)?));
        }
        (None, None) => {}
        _ => {
            return Err(ClientError::Tls("cert_path and key_path must be set together".to_string()));
        }
    }

    if let Some(host) = host_override {
        config = config.domain_name(host);
    }

    Ok(config)
}
