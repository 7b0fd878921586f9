//! Per-backend circuit breaker
//!
//! Thin layer over `failsafe`: every client handle owns one [`Breaker`] that
//! opens after a run of consecutive failures and half-opens after an
//! exponentially growing backoff.

use std::time::Duration;

pub use failsafe::CircuitBreaker;

use crate::config::BreakerConfig;

/// Circuit breaker type shared by all client handles
pub type Breaker = failsafe::StateMachine<
    failsafe::failure_policy::ConsecutiveFailures<failsafe::backoff::Exponential>,
    (),
>;

/// Opens after `failure_threshold` consecutive failures and stays open
/// between `min_backoff` and `max_backoff`.
///
/// `failsafe` requires `min_backoff` of at least one second.
#[must_use]
pub fn create(failure_threshold: u32, min_backoff: Duration, max_backoff: Duration) -> Breaker {
    let backoff = failsafe::backoff::exponential(min_backoff, max_backoff);
    let policy = failsafe::failure_policy::consecutive_failures(failure_threshold, backoff);
    failsafe::Config::new().failure_policy(policy).build()
}

/// Build from configuration, clamping values `failsafe` would reject
#[must_use]
pub fn from_config(config: &BreakerConfig) -> Breaker {
    let min = Duration::from_secs(config.min_backoff_secs.max(1));
    let max = Duration::from_secs(config.max_backoff_secs).max(min);
    create(config.failure_threshold.max(1), min, max)
}
