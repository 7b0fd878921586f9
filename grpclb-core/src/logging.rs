use std::fs::OpenOptions;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.level`. Output goes to `config.file_path` when
/// set (appending), otherwise to stdout, as JSON or human-readable text.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = build_filter(&config.level)?;
    let registry = tracing_subscriber::registry().with(env_filter);
    let writer = match &config.file_path {
        Some(path) => Some(Arc::new(OpenOptions::new().create(true).append(true).open(path)?)),
        None => None,
    };

    match (LogFormat::parse(&config.format), writer) {
        (LogFormat::Json, Some(file)) => registry.with(json_layer().with_writer(file)).try_init()?,
        (LogFormat::Json, None) => registry.with(json_layer()).try_init()?,
        (LogFormat::Pretty, Some(file)) => registry
            .with(pretty_layer().with_ansi(false).with_writer(file))
            .try_init()?,
        (LogFormat::Pretty, None) => registry.with(pretty_layer()).try_init()?,
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    fn parse(format: &str) -> Self {
        if format.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

fn json_layer<S>() -> fmt::Layer<S, fmt::format::JsonFields, fmt::format::Format<fmt::format::Json>> {
    fmt::layer()
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_current_span(true)
        .with_target(true)
        .with_line_number(true)
}

fn pretty_layer<S>() -> fmt::Layer<S, fmt::format::Pretty, fmt::format::Format<fmt::format::Pretty>> {
    fmt::layer().pretty().with_target(true).with_file(false)
}

fn build_filter(level: &str) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    // Directives like "grpclb_balancer=debug,info" are accepted too
    match parse_log_level(level) {
        Ok(level) => Ok(EnvFilter::new(level.to_string())),
        Err(_) => EnvFilter::try_new(level).map_err(|e| anyhow::anyhow!("Invalid log level '{level}': {e}")),
    }
}

/// Parse log level string to tracing Level
fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}
