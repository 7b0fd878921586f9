mod discovery;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use grpclb_balancer::{Balancer, GrpcClientFactory, RegistryChanged};
use grpclb_core::{init_logging, Config};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

use crate::discovery::DiscoveryUri;

#[derive(Parser, Debug)]
#[command(name = "grpclb")]
#[command(about = "Client-side gRPC service discovery and load balancing", long_about = None)]
struct Args {
    /// Configuration file (YAML or TOML)
    #[arg(short, long, env = "GRPCLB_CONFIG")]
    config: Option<String>,

    /// Discovery URI, overrides `discovery.uri`
    #[arg(long, env = "GRPCLB_URI")]
    uri: Option<String>,

    /// Unary method to invoke on the picked backend, e.g. `SayHello`
    #[arg(long)]
    call: Option<String>,

    /// Interval between calls when `--call` is set
    #[arg(long, default_value = "1000")]
    every_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(uri) = args.uri {
        config.discovery.uri = uri;
    }

    init_logging(&config.logging)?;
    if let Some(path) = Config::skipped_file(args.config.as_deref()) {
        warn!(path = %path, "Config file not found, using defaults");
    }

    if let Err(problems) = config.validate() {
        for problem in &problems {
            error!(problem = %problem, "Invalid configuration");
        }
        anyhow::bail!("configuration has {} problem(s)", problems.len());
    }

    let uri: DiscoveryUri = config.discovery.uri.parse()?;
    let (resolver, target) = uri.clone().into_resolver(config.discovery.dns_poll_interval());
    let factory = GrpcClientFactory::from_config(&config)?;

    let balancer = Arc::new(Balancer::new(resolver, Arc::new(factory)));
    let events = balancer.subscribe();
    balancer.start(&target)?;
    info!(uri = %uri, "Discovery started");

    let watch_task = tokio::spawn(log_changes(events));
    let call_task = args.call.map(|method| {
        tokio::spawn(call_loop(
            balancer.clone(),
            method,
            Duration::from_millis(args.every_ms.max(1)),
        ))
    });

    shutdown_signal().await;
    info!("Shutting down");

    if let Some(task) = call_task {
        task.abort();
    }
    balancer.close().await;
    watch_task.abort();

    info!("Shutdown complete");
    Ok(())
}

async fn log_changes(mut events: broadcast::Receiver<RegistryChanged>) {
    loop {
        match events.recv().await {
            Ok(changed) => {
                let connected = changed.clients.iter().filter(|c| c.is_connected()).count();
                info!(
                    clients = ?changed.addresses(),
                    connected,
                    "Registry changed"
                );
                for failure in &changed.failures {
                    warn!(addr = %failure.address, reason = %failure.reason, "Client construction failed");
                }
            }
            Err(RecvError::Lagged(n)) => {
                warn!(skipped = n, "Registry change listener lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn call_loop(balancer: Arc<Balancer>, method: String, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;

        let client = match balancer.pick_next() {
            Ok(client) => client,
            Err(e) => {
                debug!(error = %e, "No backend to call");
                continue;
            }
        };

        match client.call(&method, Bytes::new()).await {
            Ok(reply) => info!(addr = %client.address(), bytes = reply.len(), method = %method, "Call succeeded"),
            Err(e) => warn!(addr = %client.address(), error = %e, method = %method, "Call failed"),
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
