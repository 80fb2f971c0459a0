//! Configuration management for the booking console.
//!
//! Loads configuration from environment variables with sensible defaults.

use booking_runtime::RetryPolicy;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Console username; prompted for when absent
    pub username: Option<String>,
    /// Room counts of the buildings registered at startup
    pub seed_buildings: Vec<usize>,
    /// Retries after the first failed bus operation
    pub retry_max: usize,
    /// Delay before the first retry
    pub retry_initial: Duration,
    /// Bound on waiting for each component to stop
    pub shutdown_timeout: Duration,
    /// Prometheus exporter address; metrics are off when absent
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            username: None,
            seed_buildings: vec![3, 5],
            retry_max: 5,
            retry_initial: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(10),
            metrics_addr: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unparseable values fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            username: env::var("BOOKING_USERNAME").ok().filter(|s| !s.trim().is_empty()),
            seed_buildings: env::var("BOOKING_SEED_BUILDINGS")
                .map(|s| parse_seed_buildings(&s))
                .unwrap_or(defaults.seed_buildings),
            retry_max: env::var("BOOKING_RETRY_MAX")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.retry_max),
            retry_initial: env::var("BOOKING_RETRY_INITIAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.retry_initial, Duration::from_millis),
            shutdown_timeout: env::var("BOOKING_SHUTDOWN_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.shutdown_timeout, Duration::from_secs),
            metrics_addr: env::var("BOOKING_METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    /// Retry policy for publishing and (re-)subscribing
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.retry_max)
            .initial_delay(self.retry_initial)
            .max_delay(Duration::from_secs(5))
            .build()
    }
}

/// Parse comma-separated room counts, skipping entries that are not integers.
#[must_use]
pub fn parse_seed_buildings(raw: &str) -> Vec<usize> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse() {
            Ok(rooms) => Some(rooms),
            Err(_) => {
                tracing::warn!(value = s, "Ignoring invalid seed building room count");
                None
            },
        })
        .collect()
}
