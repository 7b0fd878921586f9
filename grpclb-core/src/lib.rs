//! Shared configuration, logging and resilience helpers for grpclb

pub mod config;
pub mod logging;
pub mod resilience;

pub use config::Config;
pub use logging::init_logging;
