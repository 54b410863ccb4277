//! # Global runtime configuration.
//!
//! Provides [`Config`] centralized settings for proxies and module bootstrap.
//!
//! Config is used in two ways:
//! 1. **Bootstrapper creation**: `Bootstrapper::builder(config)`
//! 2. **Proxy defaults**: `ProxyBuilder::with_defaults(&config)`
//!
//! ## Sentinel values
//! - `max_workers = 0` → unbounded stage-two workers (no semaphore created)
//! - `bootstrap_timeout = 0s` → wait for dependencies forever (no watchdog armed)

use std::time::Duration;

use crate::policies::RetryPolicy;

/// Global configuration for the bootstrap runtime.
///
/// Defines:
/// - **Retry behavior**: how often and how long proxies look for a provider
/// - **Dependency wait**: grace period before a waiting module is interrupted
/// - **Workers**: concurrency of stage-two initialization
/// - **Event system**: bus capacity for event delivery
/// - **Shutdown**: how long to wait for modules to close
///
/// ## Field semantics
/// - `retry_attempts`: retries after the first lookup (`0` = single lookup, no waiting)
/// - `retry_wait`: pause between lookups
/// - `bootstrap_timeout`: watchdog delay (`0s` = no watchdog)
/// - `max_workers`: stage-two concurrency limit (`0` = unbounded)
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
/// - `grace`: maximum wait for modules to close on shutdown
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of additional lookups a proxy performs when no provider is bound.
    pub retry_attempts: u32,

    /// Pause between two lookups of the same retry cycle.
    pub retry_wait: Duration,

    /// How long a module waits for its mandatory dependencies.
    ///
    /// When the watchdog fires the module is interrupted and its failure hook
    /// receives a timeout naming the dependencies that never appeared.
    pub bootstrap_timeout: Duration,

    /// Maximum number of stage-two initializations running at once.
    pub max_workers: usize,

    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Slow subscribers that lag behind more than `bus_capacity` messages will
    /// receive `Lagged` and skip older items.
    pub bus_capacity: usize,

    /// Maximum time to wait for all modules to close on shutdown.
    pub grace: Duration,
}

impl Config {
    /// Returns the stage-two concurrency limit as an `Option`.
    ///
    /// - `None` → unbounded
    /// - `Some(n)` → at most `n` concurrent completions
    #[inline]
    pub fn worker_limit(&self) -> Option<usize> {
        if self.max_workers == 0 {
            None
        } else {
            Some(self.max_workers)
        }
    }

    /// Returns the watchdog delay as an `Option`.
    ///
    /// - `None` → modules wait for dependencies indefinitely
    /// - `Some(d)` → watchdog fires after `d`
    #[inline]
    pub fn watchdog_timeout(&self) -> Option<Duration> {
        if self.bootstrap_timeout == Duration::ZERO {
            None
        } else {
            Some(self.bootstrap_timeout)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Builds a fresh [`RetryPolicy`] from the retry fields.
    #[inline]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, self.retry_wait)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `retry_attempts = 3`, `retry_wait = 1s`
    /// - `bootstrap_timeout = 300s`
    /// - `max_workers = 0` (unbounded)
    /// - `bus_capacity = 1024`
    /// - `grace = 60s`
    fn default() -> Self {
        Self {
            retry_attempts: RetryPolicy::DEFAULT_ATTEMPTS,
            retry_wait: RetryPolicy::DEFAULT_WAIT,
            bootstrap_timeout: Duration::from_secs(300),
            max_workers: 0,
            bus_capacity: 1024,
            grace: Duration::from_secs(60),
        }
    }
}
