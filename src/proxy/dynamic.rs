//! # Dynamic service proxy.
//!
//! [`DynamicServiceProxy`] is a stable, typed handle over whatever registry
//! service currently matches its [`ServiceQuery`].
//!
//! ## Binding lifecycle
//! ```text
//! build():  subscribe ──► lookup/bind best ──► (mandatory & none) ──► retry per policy
//!                                                          └─ exhausted ──► DependencyUnavailable
//!
//! registry thread:
//!   REGISTERED/MODIFIED (match, unbound) ──► bind it, nudge waiting calls
//!   MODIFIED of bound, no longer matches ─┐
//!   UNREGISTERING of bound ───────────────┴► clear ─► unbind ─► unbound() ─► rebind best other
//!
//! call():   bound ──► f(&svc)
//!           unbound ──► retry per policy ──┬─ bound ──► f(&svc)
//!                                          └─ exhausted ─┬─ mandatory ─► ServiceUnavailable
//!                                                        └─ optional ──► wait for a binding
//! ```
//!
//! ## Rules
//! - The binding lock only guards the pointer swap; lookups, waits and
//!   listener callbacks run outside it.
//! - Registry errors are surfaced immediately, never retried.
//! - Candidates rank by highest ranking, then lowest provider, then lowest service id.
//! - A newly registered service does not displace a live binding.
//! - A service seen unregistering is never bound again, even while lookups still return it.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{ProxyError, RegistryError};
use crate::events::{Bus, Event, EventKind};
use crate::policies::{RetryCallback, RetryOutcome, RetryPolicy};
use crate::query::ServiceQuery;
use crate::registry::{
    Descriptor, ListenerId, RegistryEvent, RegistryEventKind, RegistryGateway, RegistryListener,
    ServiceId,
};

use super::listener::BindingListener;

/// Whether a consumer needs a provider at all times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cardinality {
    /// Construction waits for a provider; calls fail once retries are used up.
    #[default]
    Mandatory,
    /// Construction never waits; calls block until a provider appears.
    Optional,
}

struct Binding<S: ?Sized> {
    descriptor: Descriptor,
    instance: Arc<S>,
}

struct Shared<S: ?Sized> {
    query: ServiceQuery,
    cardinality: Cardinality,
    registry: Arc<dyn RegistryGateway>,
    policy: RetryPolicy,
    listeners: Vec<Arc<dyn BindingListener>>,
    bus: Option<Bus>,

    binding: Mutex<Option<Binding<S>>>,
    retired: Mutex<Vec<ServiceId>>,
    subscription: Mutex<Option<ListenerId>>,
    rebound: Notify,
    closed: CancellationToken,
}

impl<S> Shared<S>
where
    S: ?Sized + Send + Sync + 'static,
{
    fn current(&self) -> Option<Arc<S>> {
        self.binding.lock().as_ref().map(|b| Arc::clone(&b.instance))
    }

    fn bound_id(&self) -> Option<ServiceId> {
        self.binding.lock().as_ref().map(|b| b.descriptor.id())
    }

    fn publish(&self, kind: EventKind, id: Option<ServiceId>) {
        if let Some(bus) = &self.bus {
            let mut ev = Event::new(kind).with_query(self.query.as_str());
            if let Some(id) = id {
                ev = ev.with_service(id);
            }
            bus.publish(ev);
        }
    }

    /// Marks `id` as retiring and forgets the ids the registry no longer returns.
    fn retire(&self, id: ServiceId) {
        let live = self.registry.lookup(&self.query);
        let mut retired = self.retired.lock();
        if let Ok(live) = live {
            retired.retain(|r| live.iter().any(|d| d.id() == *r));
        }
        if !retired.contains(&id) {
            retired.push(id);
        }
    }

    /// Binds the best matching candidate that is not retiring, if still unbound.
    ///
    /// Returns the bound instance (ours or one installed concurrently).
    fn try_bind(&self) -> Result<Option<Arc<S>>, RegistryError> {
        let mut candidates = self.registry.lookup(&self.query)?;
        {
            // ids are never reused; forget the ones the registry no longer returns
            let mut retired = self.retired.lock();
            retired.retain(|id| candidates.iter().any(|d| d.id() == *id));
            candidates.retain(|d| !retired.contains(&d.id()));
        }
        candidates.sort_by(|a, b| a.preference(b));

        for descriptor in candidates {
            if let Some(current) = self.current() {
                return Ok(Some(current));
            }
            if self.install(&descriptor)? {
                return Ok(self.current());
            }
        }
        Ok(self.current())
    }

    /// Binds exactly `descriptor` if the proxy is unbound and open. Returns `true` if installed.
    fn install(&self, descriptor: &Descriptor) -> Result<bool, RegistryError> {
        let Some(instance) = self.registry.bind(descriptor)? else {
            return Ok(false);
        };
        let Some(instance) = instance.downcast::<S>() else {
            tracing::warn!(
                query = %self.query,
                service_id = %descriptor.id(),
                "service does not implement the proxied capability"
            );
            self.registry.unbind(descriptor);
            return Ok(false);
        };

        let installed = {
            let mut slot = self.binding.lock();
            let retiring = self.retired.lock().contains(&descriptor.id());
            if slot.is_none() && !retiring && !self.closed.is_cancelled() {
                *slot = Some(Binding {
                    descriptor: descriptor.clone(),
                    instance,
                });
                true
            } else {
                false
            }
        };
        if !installed {
            self.registry.unbind(descriptor);
            return Ok(false);
        }

        tracing::debug!(query = %self.query, service_id = %descriptor.id(), "proxy bound");
        self.publish(EventKind::ProxyBound, Some(descriptor.id()));
        for l in &self.listeners {
            l.bound(descriptor);
        }
        self.policy.nudge();
        self.rebound.notify_waiters();
        Ok(true)
    }

    /// Drops the binding if it is `leaving`, then rebinds to the best remaining candidate.
    fn lose(&self, leaving: &Descriptor) {
        let old = {
            let mut slot = self.binding.lock();
            if slot
                .as_ref()
                .is_some_and(|b| b.descriptor.id() == leaving.id())
            {
                slot.take()
            } else {
                None
            }
        };
        let Some(old) = old else {
            return;
        };

        self.release(&old.descriptor);
        match self.try_bind() {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::debug!(query = %self.query, "no replacement provider yet");
            }
            Err(e) => {
                tracing::warn!(query = %self.query, error = %e, "rebind failed");
            }
        }
    }

    fn release(&self, descriptor: &Descriptor) {
        self.registry.unbind(descriptor);
        tracing::debug!(query = %self.query, service_id = %descriptor.id(), "proxy unbound");
        self.publish(EventKind::ProxyUnbound, Some(descriptor.id()));
        for l in &self.listeners {
            l.unbound(descriptor);
        }
    }

    fn on_registry_event(&self, event: &RegistryEvent) {
        if self.closed.is_cancelled() {
            return;
        }
        let descriptor = &event.descriptor;
        let is_bound = self.bound_id() == Some(descriptor.id());

        match event.kind {
            RegistryEventKind::Registered | RegistryEventKind::Modified => {
                let matches = self.query.matches(descriptor.properties());
                if is_bound {
                    if matches {
                        let mut slot = self.binding.lock();
                        if let Some(b) = slot.as_mut() {
                            if b.descriptor.id() == descriptor.id() {
                                b.descriptor = descriptor.clone();
                            }
                        }
                    } else {
                        self.lose(descriptor);
                    }
                } else if matches && self.bound_id().is_none() {
                    if let Err(e) = self.install(descriptor) {
                        tracing::warn!(query = %self.query, error = %e, "bind on registration failed");
                    }
                }
            }
            RegistryEventKind::Unregistering => {
                self.retire(descriptor.id());
                if self.bound_id() == Some(descriptor.id()) {
                    self.lose(descriptor);
                }
            }
        }
    }

    fn bind_with_retry(
        &self,
    ) -> impl std::future::Future<Output = Result<RetryOutcome<Option<Arc<S>>>, RegistryError>>
    + Send
    + '_ {
        async move {
            let mut attempt = BindAttempt { shared: self };
            self.policy.execute(&mut attempt, &self.closed).await
        }
    }

    fn close(&self) {
        self.closed.cancel();
        if let Some(id) = self.subscription.lock().take() {
            self.registry.unsubscribe(id);
        }
        let old = self.binding.lock().take();
        if let Some(old) = old {
            self.release(&old.descriptor);
        }
    }
}

/// One bind attempt for the retry loop.
struct BindAttempt<'a, S: ?Sized> {
    shared: &'a Shared<S>,
}

#[async_trait]
impl<'a, S> RetryCallback for BindAttempt<'a, S>
where
    S: ?Sized + Send + Sync + 'static,
{
    type Output = Option<Arc<S>>;
    type Error = RegistryError;

    async fn attempt(&mut self) -> Result<Option<Arc<S>>, RegistryError> {
        match self.shared.current() {
            Some(svc) => Ok(Some(svc)),
            None => self.shared.try_bind(),
        }
    }

    fn is_complete(&self, output: &Option<Arc<S>>) -> bool {
        output.is_some()
    }
}

/// Registry listener holding the proxy weakly.
struct ProxyListener<S: ?Sized> {
    shared: Weak<Shared<S>>,
}

impl<S> RegistryListener for ProxyListener<S>
where
    S: ?Sized + Send + Sync + 'static,
{
    fn on_event(&self, event: &RegistryEvent) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_registry_event(event);
        }
    }
}

/// Stable handle to a registry service of capability `S`.
///
/// `S` is usually a trait object (`dyn Clock`); the registry must hold an
/// `Arc<S>` for a service to be bindable. Dropping the proxy closes it.
pub struct DynamicServiceProxy<S: ?Sized + Send + Sync + 'static> {
    shared: Arc<Shared<S>>,
}

impl<S> DynamicServiceProxy<S>
where
    S: ?Sized + Send + Sync + 'static,
{
    /// Starts building a proxy for `S` (query defaults to [`ServiceQuery::of::<S>()`]).
    pub fn builder(registry: Arc<dyn RegistryGateway>) -> ProxyBuilder<S> {
        ProxyBuilder::new(registry)
    }

    /// Runs `f` against the currently bound service.
    ///
    /// When unbound, retries binding per the retry policy first. Mandatory
    /// proxies then fail with [`ProxyError::ServiceUnavailable`]; optional ones
    /// wait until a provider appears or the proxy is closed.
    pub async fn call<R>(&self, f: impl FnOnce(&S) -> R) -> Result<R, ProxyError> {
        let svc = self.service().await?;
        Ok(f(&svc))
    }

    /// Returns the currently bound service, binding (and waiting) like [`call`](Self::call).
    pub async fn service(&self) -> Result<Arc<S>, ProxyError> {
        let shared = &self.shared;
        loop {
            if shared.closed.is_cancelled() {
                return Err(ProxyError::Cancelled);
            }
            if let Some(svc) = shared.current() {
                return Ok(svc);
            }

            match shared.bind_with_retry().await? {
                RetryOutcome::Completed(Some(svc)) => return Ok(svc),
                RetryOutcome::Cancelled => return Err(ProxyError::Cancelled),
                RetryOutcome::Completed(None) | RetryOutcome::Exhausted => {}
            }

            if shared.cardinality == Cardinality::Mandatory {
                tracing::warn!(query = %shared.query, "no provider after retrying");
                if let Some(bus) = &shared.bus {
                    bus.publish(
                        Event::new(EventKind::ServiceUnavailable)
                            .with_query(shared.query.as_str())
                            .with_attempt(shared.policy.max_attempts()),
                    );
                }
                return Err(ProxyError::ServiceUnavailable {
                    query: shared.query.to_string(),
                });
            }

            let rebound = shared.rebound.notified();
            tokio::pin!(rebound);
            rebound.as_mut().enable();
            if shared.current().is_some() {
                continue;
            }
            tokio::select! {
                _ = &mut rebound => {}
                _ = shared.closed.cancelled() => return Err(ProxyError::Cancelled),
            }
        }
    }

    /// Descriptor of the bound service, if any.
    pub fn descriptor(&self) -> Option<Descriptor> {
        self.shared
            .binding
            .lock()
            .as_ref()
            .map(|b| b.descriptor.clone())
    }

    /// True if a service is bound right now.
    pub fn is_bound(&self) -> bool {
        self.shared.bound_id().is_some()
    }

    /// Query this proxy selects services with.
    pub fn query(&self) -> &ServiceQuery {
        &self.shared.query
    }

    /// Cardinality of this proxy.
    pub fn cardinality(&self) -> Cardinality {
        self.shared.cardinality
    }

    /// Retry policy used for binding; may be reset at runtime.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.shared.policy
    }

    /// Unsubscribes from the registry, releases the bound service and cancels waiting calls.
    ///
    /// Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    /// True once [`close`](Self::close) ran.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }
}

impl<S> Drop for DynamicServiceProxy<S>
where
    S: ?Sized + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl<S> fmt::Debug for DynamicServiceProxy<S>
where
    S: ?Sized + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicServiceProxy")
            .field("query", &self.shared.query)
            .field("cardinality", &self.shared.cardinality)
            .field("bound", &self.shared.bound_id())
            .finish()
    }
}

/// Builder for [`DynamicServiceProxy`].
pub struct ProxyBuilder<S: ?Sized> {
    registry: Arc<dyn RegistryGateway>,
    query: ServiceQuery,
    cardinality: Cardinality,
    retry_attempts: u32,
    retry_wait: Duration,
    listeners: Vec<Arc<dyn BindingListener>>,
    bus: Option<Bus>,
    _capability: PhantomData<fn() -> Arc<S>>,
}

impl<S> ProxyBuilder<S>
where
    S: ?Sized + Send + Sync + 'static,
{
    /// New builder with a type-derived query, mandatory cardinality and default retries.
    pub fn new(registry: Arc<dyn RegistryGateway>) -> Self {
        Self {
            registry,
            query: ServiceQuery::of::<S>(),
            cardinality: Cardinality::Mandatory,
            retry_attempts: RetryPolicy::DEFAULT_ATTEMPTS,
            retry_wait: RetryPolicy::DEFAULT_WAIT,
            listeners: Vec::new(),
            bus: None,
            _capability: PhantomData,
        }
    }

    /// Selects services with `query` instead of the type-derived one.
    pub fn with_query(mut self, query: ServiceQuery) -> Self {
        self.query = query;
        self
    }

    /// Sets the cardinality.
    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    /// Sets retry count and pause.
    pub fn with_retry(mut self, attempts: u32, wait: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_wait = wait;
        self
    }

    /// Takes retry settings from the runtime configuration.
    pub fn with_defaults(self, cfg: &Config) -> Self {
        self.with_retry(cfg.retry_attempts, cfg.retry_wait)
    }

    /// Adds a binding listener.
    pub fn with_listener(mut self, listener: Arc<dyn BindingListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Publishes `ProxyBound`/`ProxyUnbound`/`ServiceUnavailable` to `bus`.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Subscribes, performs the initial bind and (mandatory) waits per the retry policy.
    ///
    /// # Errors
    /// - [`ProxyError::DependencyUnavailable`] mandatory proxy found no provider in time
    /// - [`ProxyError::Registry`] the registry failed
    pub async fn build(self) -> Result<DynamicServiceProxy<S>, ProxyError> {
        let shared = Arc::new(Shared {
            query: self.query,
            cardinality: self.cardinality,
            registry: self.registry,
            policy: RetryPolicy::new(self.retry_attempts, self.retry_wait),
            listeners: self.listeners,
            bus: self.bus,
            binding: Mutex::new(None),
            retired: Mutex::new(Vec::new()),
            subscription: Mutex::new(None),
            rebound: Notify::new(),
            closed: CancellationToken::new(),
        });

        // subscribe first so nothing registered during the lookup is missed
        let listener: Arc<dyn RegistryListener> = Arc::new(ProxyListener {
            shared: Arc::downgrade(&shared),
        });
        let id = shared.registry.subscribe(&shared.query, listener)?;
        *shared.subscription.lock() = Some(id);
        let proxy = DynamicServiceProxy { shared };

        proxy.shared.try_bind()?;
        if proxy.shared.cardinality == Cardinality::Mandatory && !proxy.is_bound() {
            match proxy.shared.bind_with_retry().await? {
                RetryOutcome::Completed(Some(_)) => {}
                RetryOutcome::Cancelled => return Err(ProxyError::Cancelled),
                RetryOutcome::Completed(None) | RetryOutcome::Exhausted => {
                    let attempts = proxy.shared.policy.max_attempts().saturating_add(1);
                    tracing::warn!(query = %proxy.shared.query, attempts, "mandatory service unavailable");
                    return Err(ProxyError::DependencyUnavailable {
                        query: proxy.shared.query.to_string(),
                        attempts,
                    });
                }
            }
        }

        tracing::debug!(query = %proxy.shared.query, bound = proxy.is_bound(), "proxy ready");
        Ok(proxy)
    }
}
