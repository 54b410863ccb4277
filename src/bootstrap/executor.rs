//! # Module bootstrap executor.
//!
//! [`BootstrapExecutor`] drives one [`Module`] through [`BootstrapState`]:
//!
//! ```text
//! refresh():
//!   Initialized ─► ResolvingDependencies ─► pre_initialize() ─► discover
//!        ├─ all present ─► DependenciesResolved ─► stage two (inline)
//!        └─ missing ─────► register tracker, arm watchdog, return
//!
//! tracker satisfied (registry thread):
//!   ResolvingDependencies ─► DependenciesResolved, cancel watchdog ─► stage two (worker pool)
//!
//! stage two:   DependenciesResolved ─► Started ─► complete_initialize()
//! watchdog:    ResolvingDependencies ─► Interrupted ─► BootstrapTimedOut ─► on_failure()
//! close():     Started ─► Stopped (+ shutdown()),  anything else alive ─► Interrupted
//! fail(err):   quiet close ─► BootstrapFailed ─► on_failure()
//! ```
//!
//! ## Rules
//! - The state lock guards transitions, the tracker and the watchdog token only;
//!   module hooks always run outside it.
//! - A transition attempted from an unexpected state is a logged no-op.
//! - The watchdog cancel may race its expiry; the expiry re-checks the state.
//! - The shutdown counter is decremented once, by the first effective close.
//! - Each transition publishes exactly one event: a timeout or failure replaces
//!   `ModuleStopped`/`ModuleInterrupted` with its own event.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{BootstrapError, ModuleError, RegistryError};
use crate::events::{Bus, Event, EventKind};
use crate::registry::RegistryGateway;

use super::counter::{CounterGuard, ShutdownCounter};
use super::module::{Dependency, Module};
use super::state::BootstrapState;
use super::tracker::{DependencyTracker, TrackerOwner};
use super::watchdog;
use super::workers::WorkerPool;

/// Everything `close()` takes out of the state lock.
struct Closing {
    was: BootstrapState,
    tracker: Option<Arc<DependencyTracker>>,
    watchdog: Option<CancellationToken>,
    pending: Option<CounterGuard>,
}

struct Control {
    state: BootstrapState,
    tracker: Option<Arc<DependencyTracker>>,
    watchdog: Option<CancellationToken>,
    pending: Option<CounterGuard>,
    failure: Option<BootstrapError>,
}

struct Inner {
    name: Arc<str>,
    module: Arc<dyn Module>,
    registry: Arc<dyn RegistryGateway>,
    bus: Bus,
    timeout: Option<Duration>,
    workers: WorkerPool,
    control: Mutex<Control>,
    me: Weak<Inner>,
}

/// Two-stage bootstrap of one module, gated on its mandatory dependencies.
///
/// Cheap to clone; clones drive the same state machine.
#[derive(Clone)]
pub struct BootstrapExecutor {
    inner: Arc<Inner>,
}

impl BootstrapExecutor {
    /// Creates an executor in `Initialized` and counts it as outstanding in `counter`.
    pub(crate) fn new(
        module: Arc<dyn Module>,
        registry: Arc<dyn RegistryGateway>,
        bus: Bus,
        timeout: Option<Duration>,
        workers: WorkerPool,
        counter: &ShutdownCounter,
    ) -> Self {
        let name: Arc<str> = module.name().into();
        let pending = counter.increment();
        let inner = Arc::new_cyclic(|me| Inner {
            name,
            module,
            registry,
            bus,
            timeout,
            workers,
            control: Mutex::new(Control {
                state: BootstrapState::Initialized,
                tracker: None,
                watchdog: None,
                pending: Some(pending),
                failure: None,
            }),
            me: me.clone(),
        });
        Self { inner }
    }

    /// Module name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current state.
    pub fn state(&self) -> BootstrapState {
        self.inner.control.lock().state
    }

    /// Mandatory dependencies still missing (empty before discovery).
    pub fn unsatisfied(&self) -> Vec<Dependency> {
        self.inner
            .tracker()
            .map(|t| t.unsatisfied())
            .unwrap_or_default()
    }

    /// The error that ended the bootstrap, if any.
    pub fn failure(&self) -> Option<BootstrapError> {
        self.inner.control.lock().failure.clone()
    }

    /// Runs stage one; stage two follows inline or once the dependencies appear.
    ///
    /// Returns the state reached (`Started` or `ResolvingDependencies` normally).
    /// On error the module has already been closed and told via `on_failure`.
    /// Calling it again after the first time is a no-op returning the state.
    pub async fn refresh(&self) -> Result<BootstrapState, BootstrapError> {
        match self.inner.stage_one().await {
            Ok(state) => Ok(state),
            Err(err) => {
                self.inner.fail(err.clone()).await;
                Err(err)
            }
        }
    }

    /// Stops the module: deregisters the tracker, cancels the watchdog, and moves
    /// to `Stopped` (if started) or `Interrupted`. Idempotent.
    pub async fn close(&self) {
        self.inner.close().await;
    }
}

impl std::fmt::Debug for BootstrapExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapExecutor")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn tracker(&self) -> Option<Arc<DependencyTracker>> {
        self.control.lock().tracker.clone()
    }

    fn unsatisfied_labels(&self) -> Vec<String> {
        self.tracker()
            .map(|t| t.unsatisfied_labels())
            .unwrap_or_default()
    }

    fn publish(&self, kind: EventKind) {
        self.bus
            .publish(Event::new(kind).with_module(Arc::clone(&self.name)));
    }

    /// Moves `from → to` under the lock. Returns `false` (and logs) on a wrong state.
    fn transition(&self, from: BootstrapState, to: BootstrapState) -> bool {
        let mut c = self.control.lock();
        if c.state != from {
            tracing::debug!(
                module = %self.name,
                expected = %from,
                actual = %c.state,
                "wrong state; transition to {to} skipped"
            );
            return false;
        }
        c.state = to;
        true
    }

    fn module_error(&self, err: ModuleError) -> BootstrapError {
        BootstrapError::Module {
            module: self.name.to_string(),
            source: err,
            unsatisfied: self.unsatisfied_labels(),
        }
    }

    fn registry_error(&self, err: RegistryError) -> BootstrapError {
        BootstrapError::Registry {
            module: self.name.to_string(),
            source: err,
        }
    }

    async fn stage_one(&self) -> Result<BootstrapState, BootstrapError> {
        if !self.transition(
            BootstrapState::Initialized,
            BootstrapState::ResolvingDependencies,
        ) {
            return Ok(self.control.lock().state);
        }
        self.publish(EventKind::ModuleResolving);

        self.module
            .pre_initialize()
            .await
            .map_err(|e| self.module_error(e))?;

        let owner: Weak<dyn TrackerOwner> = self.me.clone();
        let tracker = Arc::new(DependencyTracker::new(
            Arc::clone(&self.name),
            self.module.dependencies(),
            Arc::clone(&self.registry),
            self.bus.clone(),
            self.timeout,
            owner,
        ));
        tracker
            .discover()
            .map_err(|e| self.registry_error(e))?;

        let token = {
            let mut c = self.control.lock();
            if c.state != BootstrapState::ResolvingDependencies {
                tracing::debug!(module = %self.name, state = %c.state, "closed during stage one");
                return Ok(c.state);
            }
            c.tracker = Some(Arc::clone(&tracker));
            if tracker.is_satisfied() {
                c.state = BootstrapState::DependenciesResolved;
                None
            } else {
                let token = CancellationToken::new();
                c.watchdog = Some(token.clone());
                Some(token)
            }
        };

        match token {
            None => {
                tracing::debug!(module = %self.name, "all dependencies present");
                self.publish(EventKind::DependenciesResolved);
                self.stage_two().await;
            }
            Some(token) => {
                if let Some(timeout) = self.timeout {
                    let me = self.me.clone();
                    watchdog::arm(self.workers.handle(), timeout, token, move || async move {
                        if let Some(inner) = me.upgrade() {
                            inner.on_timeout(timeout).await;
                        }
                    });
                }
                tracker
                    .register()
                    .map_err(|e| self.registry_error(e))?;
            }
        }
        Ok(self.control.lock().state)
    }

    async fn stage_two(&self) {
        if !self.transition(BootstrapState::DependenciesResolved, BootstrapState::Started) {
            return;
        }
        match self.module.complete_initialize().await {
            Ok(()) => {
                tracing::info!(module = %self.name, "module started");
                self.publish(EventKind::ModuleStarted);
            }
            Err(e) => {
                let err = self.module_error(e);
                self.fail(err).await;
            }
        }
    }

    /// Takes everything close needs out of the lock, if `expect` (or any live state) matches.
    fn shut(&self, expect: Option<BootstrapState>) -> Option<Closing> {
        let mut c = self.control.lock();
        if c.state.is_down() || expect.is_some_and(|s| s != c.state) {
            return None;
        }
        let was = c.state;
        c.state = if was == BootstrapState::Started {
            BootstrapState::Stopped
        } else {
            BootstrapState::Interrupted
        };
        Some(Closing {
            was,
            tracker: c.tracker.clone(),
            watchdog: c.watchdog.take(),
            pending: c.pending.take(),
        })
    }

    /// Releases what `shut` took; `announce` publishes `ModuleStopped`/`ModuleInterrupted`.
    async fn finish_close(&self, closing: Closing, announce: bool) {
        let Closing {
            was,
            tracker,
            watchdog,
            pending,
        } = closing;

        if let Some(t) = &tracker {
            t.deregister();
        }
        if let Some(token) = watchdog {
            token.cancel();
        }

        if was == BootstrapState::Started {
            if let Err(e) = self.module.shutdown().await {
                tracing::error!(module = %self.name, error = %e, "module shutdown failed");
            }
            tracing::info!(module = %self.name, "module stopped");
            if announce {
                self.publish(EventKind::ModuleStopped);
            }
        } else {
            tracing::info!(module = %self.name, from = %was, "module interrupted");
            if announce {
                self.publish(EventKind::ModuleInterrupted);
            }
        }
        drop(pending);
    }

    async fn close(&self) {
        match self.shut(None) {
            Some(closing) => self.finish_close(closing, true).await,
            None => tracing::debug!(module = %self.name, "already closed"),
        }
    }

    async fn on_timeout(&self, timeout: Duration) {
        let Some(closing) = self.shut(Some(BootstrapState::ResolvingDependencies)) else {
            tracing::debug!(module = %self.name, "watchdog fired after the wait ended");
            return;
        };
        let unsatisfied = closing
            .tracker
            .as_ref()
            .map(|t| t.unsatisfied_labels())
            .unwrap_or_default();
        self.finish_close(closing, false).await;

        tracing::warn!(
            module = %self.name,
            timeout_ms = timeout.as_millis() as u64,
            unsatisfied = ?unsatisfied,
            "timed out waiting for dependencies"
        );
        self.bus.publish(
            Event::new(EventKind::BootstrapTimedOut)
                .with_module(Arc::clone(&self.name))
                .with_timeout(timeout)
                .with_unsatisfied(unsatisfied.clone()),
        );
        self.report(BootstrapError::Timeout {
            module: self.name.to_string(),
            timeout,
            unsatisfied,
        })
        .await;
    }

    async fn fail(&self, err: BootstrapError) {
        if let Some(closing) = self.shut(None) {
            self.finish_close(closing, false).await;
        }
        tracing::error!(
            module = %self.name,
            error = %err,
            unsatisfied = ?err.unsatisfied(),
            "bootstrap failed"
        );
        self.bus.publish(
            Event::new(EventKind::BootstrapFailed)
                .with_module(Arc::clone(&self.name))
                .with_reason(err.as_message())
                .with_unsatisfied(err.unsatisfied().to_vec()),
        );
        self.report(err).await;
    }

    /// Records the failure and hands it to the module.
    async fn report(&self, err: BootstrapError) {
        self.control.lock().failure = Some(err.clone());
        self.module.on_failure(&err).await;
    }
}

impl TrackerOwner for Inner {
    fn is_resolving(&self) -> bool {
        self.control.lock().state == BootstrapState::ResolvingDependencies
    }

    fn on_satisfied(&self) {
        let token = {
            let mut c = self.control.lock();
            if c.state != BootstrapState::ResolvingDependencies {
                tracing::debug!(module = %self.name, state = %c.state, "satisfied too late; ignored");
                return;
            }
            c.state = BootstrapState::DependenciesResolved;
            c.watchdog.take()
        };
        if let Some(token) = token {
            token.cancel();
        }
        tracing::info!(module = %self.name, "dependencies resolved");
        self.publish(EventKind::DependenciesResolved);

        let Some(me) = self.me.upgrade() else {
            return;
        };
        self.workers.spawn(async move { me.stage_two().await });
    }
}
