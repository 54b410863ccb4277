//! # LogWriter: event printer
//!
//! A minimal subscriber that renders every incoming [`Event`] as one `tracing`
//! line under the `tether::events` target.
//!
//! ## Example output
//! ```text
//! [proxy-bound] query="(objectClass=Clock)" service=#3
//! [dependency-waiting] module="billing" dependency="ledger"
//! [grace-period] module="billing" unsatisfied=["ledger"] timeout_ms=300000
//! [dependency-satisfied] module="billing" dependency="ledger" remaining=[]
//! [started] module="billing"
//! [timed-out] module="orders" timeout_ms=100 unsatisfied=["stock"]
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn service(e: &Event) -> String {
    e.service_id.map_or_else(|| "-".to_string(), |id| id.to_string())
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let module = e.module.as_deref().unwrap_or("-");
        let line = match e.kind {
            EventKind::ProxyBound => {
                format!("[proxy-bound] query={:?} service={}", e.query, service(e))
            }
            EventKind::ProxyUnbound => {
                format!("[proxy-unbound] query={:?} service={}", e.query, service(e))
            }
            EventKind::ServiceUnavailable => {
                format!("[service-unavailable] query={:?} retries={:?}", e.query, e.attempt)
            }
            EventKind::DependencyWaiting => {
                format!("[dependency-waiting] module={module:?} dependency={:?}", e.dependency)
            }
            EventKind::DependenciesWaiting => format!(
                "[grace-period] module={module:?} unsatisfied={:?} timeout_ms={:?}",
                e.unsatisfied, e.timeout_ms
            ),
            EventKind::DependencySatisfied => format!(
                "[dependency-satisfied] module={module:?} dependency={:?} remaining={:?}",
                e.dependency, e.unsatisfied
            ),
            EventKind::DependencyUnsatisfied => format!(
                "[dependency-unsatisfied] module={module:?} dependency={:?} service={}",
                e.dependency,
                service(e)
            ),
            EventKind::ModuleResolving => format!("[resolving] module={module:?}"),
            EventKind::DependenciesResolved => format!("[resolved] module={module:?}"),
            EventKind::ModuleStarted => format!("[started] module={module:?}"),
            EventKind::ModuleStopped => format!("[stopped] module={module:?}"),
            EventKind::ModuleInterrupted => format!("[interrupted] module={module:?}"),
            EventKind::BootstrapFailed => format!(
                "[failed] module={module:?} err={:?} unsatisfied={:?}",
                e.reason, e.unsatisfied
            ),
            EventKind::BootstrapTimedOut => format!(
                "[timed-out] module={module:?} timeout_ms={:?} unsatisfied={:?}",
                e.timeout_ms, e.unsatisfied
            ),
            EventKind::ShutdownRequested => "[shutdown-requested]".to_string(),
            EventKind::AllStoppedWithin => "[all-stopped-within-grace]".to_string(),
            EventKind::GraceExceeded => {
                format!("[grace-exceeded] stuck={:?}", e.unsatisfied)
            }
            EventKind::SubscriberOverflow => {
                format!("[subscriber-overflow] subscriber={module} reason={:?}", e.reason)
            }
            EventKind::SubscriberPanicked => format!(
                "[subscriber-panicked] subscriber={module} info={}",
                e.reason.as_deref().unwrap_or("unknown"),
            ),
        };
        tracing::info!(target: "tether::events", seq = e.seq, "{line}");
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
