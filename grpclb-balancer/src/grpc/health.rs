//! Background health probing for one backend

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tracing::{debug, info};

/// Periodically asks the standard gRPC health service whether `service` is
/// serving and mirrors the answer into `connected`.
pub(crate) struct HealthProbe {
    pub(crate) address: String,
    pub(crate) service: String,
    pub(crate) channel: Channel,
    pub(crate) interval: Duration,
    pub(crate) timeout: Duration,
    pub(crate) connected: Arc<AtomicBool>,
    pub(crate) cancel_token: CancellationToken,
}

impl HealthProbe {
    pub(crate) async fn run(self) {
        let mut client = HealthClient::new(self.channel.clone());
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let healthy = tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => break,
                healthy = self.check(&mut client) => healthy,
            };

            let was_healthy = self.connected.swap(healthy, Ordering::AcqRel);
            if was_healthy != healthy {
                info!(addr = %self.address, healthy, "Backend health changed");
            }
        }

        debug!(addr = %self.address, "Health probe stopped");
    }

    async fn check(&self, client: &mut HealthClient<Channel>) -> bool {
        let request = HealthCheckRequest {
            service: self.service.clone(),
        };

        match tokio::time::timeout(self.timeout, client.check(request)).await {
            Ok(Ok(response)) => response.into_inner().status == ServingStatus::Serving as i32,
            Ok(Err(status)) => {
                debug!(addr = %self.address, code = ?status.code(), "Health check failed");
                false
            }
            Err(_) => {
                debug!(addr = %self.address, timeout = ?self.timeout, "Health check timed out");
                false
            }
        }
    }
}
