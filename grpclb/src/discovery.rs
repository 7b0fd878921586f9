//! Discovery URI parsing
//!
//! - `static://10.0.0.1:50051,10.0.0.2:50051`
//! - `dns://_grpc._tcp.greeter.default.svc.cluster.local`

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use grpclb_naming::{DnsResolver, Resolver, StaticResolver};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryUri {
    /// Comma-separated `host:port` list
    Static(String),
    /// SRV record name
    Dns(String),
}

impl DiscoveryUri {
    /// Resolver for this scheme plus the target to hand to it
    pub fn into_resolver(self, dns_poll_interval: Duration) -> (Arc<dyn Resolver>, String) {
        match self {
            Self::Static(list) => (Arc::new(StaticResolver::new()), list),
            Self::Dns(name) => (
                Arc::new(DnsResolver::new().with_poll_interval(dns_poll_interval)),
                name,
            ),
        }
    }
}

impl FromStr for DiscoveryUri {
    type Err = anyhow::Error;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        let (scheme, target) = uri
            .trim()
            .split_once("://")
            .with_context(|| format!("discovery uri '{uri}' has no scheme"))?;

        if target.trim().is_empty() {
            bail!("discovery uri '{uri}' has an empty target");
        }

        match scheme.to_ascii_lowercase().as_str() {
            "static" => Ok(Self::Static(target.to_string())),
            "dns" => Ok(Self::Dns(target.to_string())),
            other => bail!("unsupported discovery scheme '{other}', expected static:// or dns://"),
        }
    }
}

impl fmt::Display for DiscoveryUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(list) => write!(f, "static://{list}"),
            Self::Dns(name) => write!(f, "dns://{name}"),
        }
    }
}
