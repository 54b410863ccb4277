//! # Progress events emitted by proxies, dependency trackers and module bootstrap.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Proxy events**: binding changes of a dynamic service proxy
//! - **Dependency events**: waiting/satisfied/unsatisfied changes of a module's dependencies
//! - **Module events**: bootstrap state machine transitions and failures
//! - **Runtime events**: subscriber health and shutdown progress
//!
//! The [`Event`] struct carries additional metadata such as timestamps, module name,
//! query, service id and the unsatisfied dependency list.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tether::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::BootstrapTimedOut)
//!     .with_module("billing")
//!     .with_unsatisfied(vec!["ledger".to_string()])
//!     .with_timeout(Duration::from_millis(100));
//!
//! assert_eq!(ev.kind, EventKind::BootstrapTimedOut);
//! assert_eq!(ev.module.as_deref(), Some("billing"));
//! assert_eq!(ev.unsatisfied.as_deref(), Some(&["ledger".to_string()][..]));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::registry::ServiceId;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `module`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `module`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    SubscriberOverflow,

    // === Proxy events ===
    /// A proxy bound a backing service.
    ///
    /// Sets:
    /// - `query`: compiled query of the proxy
    /// - `service_id`: bound service
    ProxyBound,

    /// A proxy lost its backing service.
    ///
    /// Sets:
    /// - `query`: compiled query of the proxy
    /// - `service_id`: service that left
    ProxyUnbound,

    /// A call found no backing service after retrying.
    ///
    /// Sets:
    /// - `query`: compiled query of the proxy
    /// - `attempt`: configured retries
    ServiceUnavailable,

    // === Dependency events ===
    /// A mandatory dependency is absent; the module waits for it.
    ///
    /// Sets:
    /// - `module`, `dependency`, `query`
    DependencyWaiting,

    /// The module enters its grace period (one per module, after the per-dependency events).
    ///
    /// Sets:
    /// - `module`
    /// - `unsatisfied`: dependencies still missing
    /// - `timeout_ms`: configured wait (absent when waiting forever)
    DependenciesWaiting,

    /// A waited-for dependency appeared.
    ///
    /// Sets:
    /// - `module`, `dependency`, `query`, `service_id`
    /// - `unsatisfied`: remaining missing dependencies
    DependencySatisfied,

    /// A dependency disappeared again.
    ///
    /// Sets:
    /// - `module`, `dependency`, `query`, `service_id`
    /// - `unsatisfied`: missing dependencies after the change
    DependencyUnsatisfied,

    // === Module events ===
    /// Module passed its pre-initialization stage and resolves dependencies.
    ///
    /// Sets:
    /// - `module`
    ModuleResolving,

    /// All mandatory dependencies present; stage two is scheduled.
    ///
    /// Sets:
    /// - `module`
    DependenciesResolved,

    /// Module fully started.
    ///
    /// Sets:
    /// - `module`
    ModuleStarted,

    /// A started module was stopped.
    ///
    /// Sets:
    /// - `module`
    ModuleStopped,

    /// Module closed before it started (stop request, timeout or failure).
    ///
    /// Sets:
    /// - `module`
    ModuleInterrupted,

    /// Module bootstrap failed.
    ///
    /// Sets:
    /// - `module`
    /// - `reason`: failure message
    /// - `unsatisfied`: dependencies missing at the time of failure
    BootstrapFailed,

    /// Watchdog fired before the dependencies were satisfied.
    ///
    /// Sets:
    /// - `module`
    /// - `timeout_ms`: configured wait
    /// - `unsatisfied`: dependencies that never appeared
    BootstrapTimedOut,

    // === Shutdown events ===
    /// Shutdown of all modules requested.
    ShutdownRequested,

    /// All modules closed within the configured grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some modules did not close in time.
    ///
    /// Sets:
    /// - `unsatisfied`: names of the stuck modules
    GraceExceeded,
}

/// Progress event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Module (or subscriber) name, if applicable.
    pub module: Option<Arc<str>>,
    /// Dependency label, if applicable.
    pub dependency: Option<Arc<str>>,
    /// Compiled service query, if applicable.
    pub query: Option<Arc<str>>,
    /// Service involved in the change.
    pub service_id: Option<ServiceId>,
    /// Dependencies still missing (or stuck modules for `GraceExceeded`).
    pub unsatisfied: Option<Arc<[String]>>,
    /// Timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Attempt count.
    pub attempt: Option<u32>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            module: None,
            dependency: None,
            query: None,
            service_id: None,
            unsatisfied: None,
            timeout_ms: None,
            attempt: None,
            reason: None,
        }
    }

    /// Attaches a module name.
    #[inline]
    pub fn with_module(mut self, module: impl Into<Arc<str>>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Attaches a dependency label.
    #[inline]
    pub fn with_dependency(mut self, label: impl Into<Arc<str>>) -> Self {
        self.dependency = Some(label.into());
        self
    }

    /// Attaches a compiled query.
    #[inline]
    pub fn with_query(mut self, query: impl Into<Arc<str>>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Attaches a service id.
    #[inline]
    pub fn with_service(mut self, id: ServiceId) -> Self {
        self.service_id = Some(id);
        self
    }

    /// Attaches the list of missing dependencies.
    #[inline]
    pub fn with_unsatisfied(mut self, unsatisfied: Vec<String>) -> Self {
        self.unsatisfied = Some(unsatisfied.into());
        self
    }

    /// Attaches a timeout duration (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.timeout_ms = Some(ms);
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_module(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_module(subscriber)
            .with_reason(info)
    }

    /// True for events produced by the subscriber machinery itself.
    #[inline]
    pub fn is_internal(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_is_monotonic() {
        let a = Event::new(EventKind::ModuleStarted);
        let b = Event::new(EventKind::ModuleStopped);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_timeout_saturates() {
        let ev = Event::new(EventKind::DependenciesWaiting).with_timeout(Duration::MAX);
        assert_eq!(ev.timeout_ms, Some(u32::MAX));
    }

    #[test]
    fn test_subscriber_events_are_internal() {
        assert!(Event::subscriber_overflow("s", "full").is_internal());
        assert!(!Event::new(EventKind::ProxyBound).is_internal());
    }
}
