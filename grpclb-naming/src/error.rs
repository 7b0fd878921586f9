//! Error types for name resolution

use thiserror::Error;

/// Naming error types
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NamingError {
    #[error("Invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("Resolution failed for '{target}': {reason}")]
    Resolution { target: String, reason: String },

    #[error("Watcher closed")]
    WatcherClosed,

    #[error("No async runtime available: {0}")]
    Runtime(String),
}

impl NamingError {
    pub(crate) fn invalid_target(target: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            target: target.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for naming operations
pub type Result<T> = std::result::Result<T, NamingError>;
