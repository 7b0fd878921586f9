use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub discovery: DiscoveryConfig,
    pub service: ServiceConfig,
    pub transport: TransportConfig,
    pub tls: TlsConfig,
    pub health_check: HealthCheckConfig,
    pub breaker: BreakerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// `static://h1:p1,h2:p2` or `dns://_service._proto.name`
    pub uri: String,
    pub dns_poll_interval_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            dns_poll_interval_ms: 100,
        }
    }
}

impl DiscoveryConfig {
    #[must_use]
    pub const fn dns_poll_interval(&self) -> Duration {
        Duration::from_millis(self.dns_poll_interval_ms)
    }
}

/// Fully qualified service used to build call paths
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub package: String,
    pub service: String,
}

impl ServiceConfig {
    /// `/{package}.{service}`, or `/{service}` when no package is set
    #[must_use]
    pub fn path_prefix(&self) -> String {
        if self.package.is_empty() {
            format!("/{}", self.service)
        } else {
            format!("/{}.{}", self.package, self.service)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub tcp_keepalive_secs: u64,
    /// Authority used for TLS verification instead of the resolved host
    pub host_override: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            tcp_keepalive_secs: 60,
            host_override: None,
        }
    }
}

impl TransportConfig {
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// `None` when keepalive is disabled (0)
    #[must_use]
    pub const fn tcp_keepalive(&self) -> Option<Duration> {
        if self.tcp_keepalive_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.tcp_keepalive_secs))
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enable: bool,
    pub ca_cert_path: Option<String>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enable: bool,
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enable: false,
            interval_ms: 5_000,
            timeout_ms: 1_000,
        }
    }
}

impl HealthCheckConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub min_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            min_backoff_secs: 10,
            max_backoff_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Self::skipped_file(Some(path)).is_none() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // GRPCLB_DISCOVERY__URI, GRPCLB_TLS__ENABLE, ...
        builder = builder.add_source(
            Environment::with_prefix("GRPCLB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// The config file `load` ignores because it does not exist. Logging is not up
    /// yet while loading, so callers report this once the subscriber is installed.
    #[must_use]
    pub fn skipped_file(config_file: Option<&str>) -> Option<&str> {
        config_file.filter(|path| !Path::new(path).exists())
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check cross-field constraints, returning every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.discovery.uri.trim().is_empty() {
            errors.push("discovery.uri must not be empty".to_string());
        }
        if self.discovery.dns_poll_interval_ms == 0 {
            errors.push("discovery.dns_poll_interval_ms must be greater than 0".to_string());
        }
        if self.transport.connect_timeout_ms == 0 || self.transport.request_timeout_ms == 0 {
            errors.push("transport timeouts must be greater than 0".to_string());
        }

        if self.tls.cert_path.is_some() != self.tls.key_path.is_some() {
            errors.push("tls.cert_path and tls.key_path must be set together".to_string());
        }
        if !self.tls.enable && (self.tls.ca_cert_path.is_some() || self.tls.cert_path.is_some()) {
            errors.push("tls certificates are configured but tls.enable is false".to_string());
        }

        if self.health_check.enable {
            if self.health_check.interval_ms == 0 {
                errors.push("health_check.interval_ms must be greater than 0".to_string());
            }
            if self.health_check.timeout_ms == 0 {
                errors.push("health_check.timeout_ms must be greater than 0".to_string());
            }
        }

        // failsafe rejects sub-second backoff
        if self.breaker.failure_threshold == 0 {
            errors.push("breaker.failure_threshold must be greater than 0".to_string());
        }
        if self.breaker.min_backoff_secs == 0 {
            errors.push("breaker.min_backoff_secs must be at least 1".to_string());
        }
        if self.breaker.max_backoff_secs < self.breaker.min_backoff_secs {
            errors.push("breaker.max_backoff_secs must not be less than min_backoff_secs".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> Config {
        Config {
            discovery: DiscoveryConfig {
                uri: "static://127.0.0.1:50051".to_string(),
                ..DiscoveryConfig::default()
            },
            ..Config::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.discovery.dns_poll_interval(), Duration::from_millis(100));
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.transport.tcp_keepalive(), Some(Duration::from_secs(60)));
        assert!(!config.tls.enable);
        assert!(!config.health_check.enable);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[discovery]
uri = "dns://_grpc._tcp.hello.svc"
dns_poll_interval_ms = 250

[service]
package = "helloworld"
service = "Greeter"

[health_check]
enable = true
"#
        )
        .unwrap();

        let config = Config::load(file.path().to_str()).unwrap();
        assert_eq!(config.discovery.uri, "dns://_grpc._tcp.hello.svc");
        assert_eq!(config.discovery.dns_poll_interval_ms, 250);
        assert_eq!(config.service.path_prefix(), "/helloworld.Greeter");
        assert!(config.health_check.enable);
        // untouched sections keep their defaults
        assert_eq!(config.health_check.interval_ms, 5_000);
        assert_eq!(config.transport.connect_timeout_ms, 5_000);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load(Some("/nonexistent/grpclb.toml")).unwrap();
        assert_eq!(config.discovery.dns_poll_interval_ms, 100);
    }

    #[test]
    fn test_skipped_file_reports_only_missing_paths() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        let present = file.path().to_str().unwrap();

        assert_eq!(
            Config::skipped_file(Some("/nonexistent/grpclb.toml")),
            Some("/nonexistent/grpclb.toml")
        );
        assert_eq!(Config::skipped_file(Some(present)), None);
        assert_eq!(Config::skipped_file(None), None);
    }

    #[test]
    fn test_path_prefix_without_package() {
        let service = ServiceConfig {
            package: String::new(),
            service: "Greeter".to_string(),
        };
        assert_eq!(service.path_prefix(), "/Greeter");
    }

    #[test]
    fn test_validate_accepts_minimal_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_collects_every_problem() {
        let mut config = Config::default();
        config.tls.cert_path = Some("client.pem".to_string());
        config.breaker.min_backoff_secs = 0;

        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("discovery.uri")));
        assert!(errors.iter().any(|e| e.contains("tls.key_path")));
        assert!(errors.iter().any(|e| e.contains("tls.enable")));
        assert!(errors.iter().any(|e| e.contains("min_backoff_secs")));
    }

    #[test]
    fn test_validate_health_check_intervals_only_when_enabled() {
        let mut config = valid_config();
        config.health_check.interval_ms = 0;
        assert!(config.validate().is_ok());

        config.health_check.enable = true;
        assert!(config.validate().is_err());
    }
}
