//! # In-process service registry.
//!
//! [`MemoryRegistry`] is a complete [`RegistryGateway`] kept in memory. It is
//! what tests drive, and what embedders use when all providers live in one
//! process.
//!
//! ## Delivery rules
//! - Events are delivered synchronously on the thread that caused the change,
//!   after the registry lock was released (listeners may call back in).
//! - `Unregistering` is delivered while the service is still visible to
//!   `lookup`; it is removed afterwards.
//! - `Modified` reaches a listener whose query matched before **or** after the
//!   change, so a listener sees a service leave its selection.
//!
//! ## Fault injection
//! [`MemoryRegistry::set_available`]`(false)` makes every fallible call return
//! [`RegistryError::Unavailable`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::RegistryError;
use crate::query::ServiceQuery;

use super::descriptor::{
    Descriptor, OBJECT_CLASS, Properties, PropertyValue, SERVICE_RANKING, ServiceId,
    ServiceInstance,
};
use super::gateway::{
    ListenerId, RegistryEvent, RegistryEventKind, RegistryGateway, RegistryListener,
};

struct Entry {
    descriptor: Descriptor,
    instance: ServiceInstance,
    usage: usize,
}

struct Subscription {
    id: ListenerId,
    query: ServiceQuery,
    listener: Arc<dyn RegistryListener>,
}

#[derive(Default)]
struct State {
    services: BTreeMap<ServiceId, Entry>,
    listeners: Vec<Subscription>,
}

struct Inner {
    state: Mutex<State>,
    next_service: AtomicU64,
    next_listener: AtomicU64,
    available: AtomicBool,
}

/// In-memory registry.
///
/// Cheap to clone; clones share the same services and listeners.
#[derive(Clone)]
pub struct MemoryRegistry {
    inner: Arc<Inner>,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistry {
    /// Creates an empty, available registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                next_service: AtomicU64::new(1),
                next_listener: AtomicU64::new(1),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Publishes a service.
    ///
    /// - `objectClass` defaults to `type_name::<S>()` when not given.
    /// - The ranking is read from an integer `service.ranking` property (default 0).
    pub fn register<S>(
        &self,
        service: Arc<S>,
        provider: &str,
        mut properties: Properties,
    ) -> Result<Registration, RegistryError>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        self.check()?;
        if !properties.contains(OBJECT_CLASS) {
            properties.insert(OBJECT_CLASS, vec![std::any::type_name::<S>()]);
        }
        let ranking = ranking_of(&properties);
        let id = ServiceId(self.inner.next_service.fetch_add(1, Ordering::Relaxed));
        let descriptor = Descriptor::new(id, ranking, provider, properties);

        let targets = {
            let mut state = self.inner.state.lock();
            state.services.insert(
                id,
                Entry {
                    descriptor: descriptor.clone(),
                    instance: ServiceInstance::new(service),
                    usage: 0,
                },
            );
            targets(&state, |q| q.matches(descriptor.properties()))
        };

        tracing::debug!(service_id = %id, provider, ranking, "service registered");
        deliver(&targets, &RegistryEvent::new(RegistryEventKind::Registered, descriptor));

        Ok(Registration {
            registry: Arc::downgrade(&self.inner),
            id,
        })
    }

    /// Makes the registry (un)available for fault injection.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Number of outstanding `bind`s for a service (0 if unknown).
    pub fn usage_count(&self, id: ServiceId) -> usize {
        self.inner
            .state
            .lock()
            .services
            .get(&id)
            .map_or(0, |e| e.usage)
    }

    /// Number of active listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.state.lock().listeners.len()
    }

    /// Number of published services.
    pub fn service_count(&self) -> usize {
        self.inner.state.lock().services.len()
    }

    fn check(&self) -> Result<(), RegistryError> {
        check(&self.inner)
    }
}

impl RegistryGateway for MemoryRegistry {
    fn lookup(&self, query: &ServiceQuery) -> Result<Vec<Descriptor>, RegistryError> {
        self.check()?;
        let state = self.inner.state.lock();
        let mut found: Vec<Descriptor> = state
            .services
            .values()
            .filter(|e| query.matches(e.descriptor.properties()))
            .map(|e| e.descriptor.clone())
            .collect();
        found.sort_by(|a, b| a.preference(b));
        Ok(found)
    }

    fn bind(&self, descriptor: &Descriptor) -> Result<Option<ServiceInstance>, RegistryError> {
        self.check()?;
        let mut state = self.inner.state.lock();
        Ok(state.services.get_mut(&descriptor.id()).map(|e| {
            e.usage += 1;
            e.instance.clone()
        }))
    }

    fn unbind(&self, descriptor: &Descriptor) {
        let mut state = self.inner.state.lock();
        if let Some(e) = state.services.get_mut(&descriptor.id()) {
            e.usage = e.usage.saturating_sub(1);
        }
    }

    fn subscribe(
        &self,
        query: &ServiceQuery,
        listener: Arc<dyn RegistryListener>,
    ) -> Result<ListenerId, RegistryError> {
        self.check()?;
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.inner.state.lock().listeners.push(Subscription {
            id,
            query: query.clone(),
            listener,
        });
        tracing::debug!(listener = %id, query = %query, "listener subscribed");
        Ok(id)
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.inner.state.lock().listeners.retain(|s| s.id != id);
    }
}

/// Handle to a published service.
///
/// Dropping the handle leaves the service published; call
/// [`unregister`](Self::unregister) to withdraw it.
#[derive(Debug)]
pub struct Registration {
    registry: Weak<Inner>,
    id: ServiceId,
}

impl Registration {
    /// Id assigned by the registry.
    pub fn id(&self) -> ServiceId {
        self.id
    }

    /// Current descriptor, or `None` once unregistered.
    pub fn descriptor(&self) -> Option<Descriptor> {
        let inner = self.registry.upgrade()?;
        let state = inner.state.lock();
        state.services.get(&self.id).map(|e| e.descriptor.clone())
    }

    /// Replaces the service properties and delivers `Modified`.
    ///
    /// `objectClass` is kept when the new set omits it.
    pub fn modify(&self, mut properties: Properties) -> Result<(), RegistryError> {
        let inner = self.registry.upgrade().ok_or(RegistryError::Unavailable)?;
        check(&inner)?;

        let (descriptor, targets) = {
            let mut state = inner.state.lock();
            let Some(entry) = state.services.get_mut(&self.id) else {
                return Err(RegistryError::Fault {
                    error: format!("service {} is not registered", self.id),
                });
            };
            if !properties.contains(OBJECT_CLASS) {
                if let Some(types) = entry.descriptor.properties().get(OBJECT_CLASS) {
                    properties.insert(OBJECT_CLASS, types.clone());
                }
            }
            let old = entry.descriptor.clone();
            let new = Descriptor::new(
                self.id,
                ranking_of(&properties),
                old.provider(),
                properties,
            );
            entry.descriptor = new.clone();
            let targets = targets(&state, |q| {
                q.matches(old.properties()) || q.matches(new.properties())
            });
            (new, targets)
        };

        tracing::debug!(service_id = %self.id, "service modified");
        deliver(&targets, &RegistryEvent::new(RegistryEventKind::Modified, descriptor));
        Ok(())
    }

    /// Withdraws the service: delivers `Unregistering`, then removes it.
    pub fn unregister(self) {
        let Some(inner) = self.registry.upgrade() else {
            return;
        };
        let (descriptor, targets) = {
            let state = inner.state.lock();
            let Some(entry) = state.services.get(&self.id) else {
                return;
            };
            let d = entry.descriptor.clone();
            let targets = targets(&state, |q| q.matches(d.properties()));
            (d, targets)
        };

        deliver(
            &targets,
            &RegistryEvent::new(RegistryEventKind::Unregistering, descriptor),
        );
        inner.state.lock().services.remove(&self.id);
        tracing::debug!(service_id = %self.id, "service unregistered");
    }
}

fn check(inner: &Inner) -> Result<(), RegistryError> {
    if inner.available.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(RegistryError::Unavailable)
    }
}

fn ranking_of(properties: &Properties) -> i32 {
    match properties.get(SERVICE_RANKING) {
        Some(PropertyValue::Int(r)) => i32::try_from(*r).unwrap_or(0),
        _ => 0,
    }
}

fn targets(
    state: &State,
    mut selects: impl FnMut(&ServiceQuery) -> bool,
) -> Vec<Arc<dyn RegistryListener>> {
    state
        .listeners
        .iter()
        .filter(|s| selects(&s.query))
        .map(|s| Arc::clone(&s.listener))
        .collect()
}

fn deliver(targets: &[Arc<dyn RegistryListener>], event: &RegistryEvent) {
    for listener in targets {
        listener.on_event(event);
    }
}
