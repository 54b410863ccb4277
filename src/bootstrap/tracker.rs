//! # Dependency tracker.
//!
//! Turns a module's mandatory [`Dependency`] set into a single "ready" signal.
//!
//! ```text
//! discover()  lookup each dependency ─► unsatisfied set
//! register()  DependencyWaiting × n, DependenciesWaiting
//!             subscribe (|q1 q2 .. qn)  ─► re-check
//! on_event    REGISTERED/MODIFIED ─► remove matches  ─► DependencySatisfied
//!             UNREGISTERING       ─► add matches     ─► DependencyUnsatisfied
//!             set empty ─► owner resolving? ─► deregister ─► owner.on_satisfied()  (once)
//! ```
//!
//! The listener covers every tracked dependency, not only the missing ones,
//! because the unsatisfied set can grow again.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::RegistryError;
use crate::events::{Bus, Event, EventKind};
use crate::query::ServiceQuery;
use crate::registry::{
    ListenerId, Properties, RegistryEvent, RegistryEventKind, RegistryGateway, RegistryListener,
    ServiceId,
};

use super::module::Dependency;

/// The state machine a tracker reports to.
pub(crate) trait TrackerOwner: Send + Sync + 'static {
    /// True while the owner still waits for dependencies.
    fn is_resolving(&self) -> bool;
    /// Every dependency is present. Called at most once.
    fn on_satisfied(&self);
}

/// Live view of which mandatory dependencies of a module are missing.
pub struct DependencyTracker {
    module: Arc<str>,
    registry: Arc<dyn RegistryGateway>,
    bus: Bus,
    timeout: Option<Duration>,
    dependencies: Vec<Dependency>,
    unsatisfied: Mutex<BTreeSet<usize>>,
    subscription: Mutex<Option<ListenerId>>,
    completed: AtomicBool,
    owner: Weak<dyn TrackerOwner>,
}

impl DependencyTracker {
    /// Tracks the mandatory entries of `dependencies`; optional ones are dropped.
    pub(crate) fn new(
        module: Arc<str>,
        dependencies: Vec<Dependency>,
        registry: Arc<dyn RegistryGateway>,
        bus: Bus,
        timeout: Option<Duration>,
        owner: Weak<dyn TrackerOwner>,
    ) -> Self {
        let dependencies: Vec<Dependency> =
            dependencies.into_iter().filter(Dependency::is_mandatory).collect();
        Self {
            module,
            registry,
            bus,
            timeout,
            unsatisfied: Mutex::new((0..dependencies.len()).collect()),
            dependencies,
            subscription: Mutex::new(None),
            completed: AtomicBool::new(false),
            owner,
        }
    }

    /// Tracked (mandatory) dependencies.
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Dependencies currently missing.
    pub fn unsatisfied(&self) -> Vec<Dependency> {
        let set = self.unsatisfied.lock();
        set.iter().map(|&i| self.dependencies[i].clone()).collect()
    }

    /// Labels of the dependencies currently missing.
    pub fn unsatisfied_labels(&self) -> Vec<String> {
        let set = self.unsatisfied.lock();
        self.labels(&set)
    }

    /// True when nothing is missing.
    pub fn is_satisfied(&self) -> bool {
        self.unsatisfied.lock().is_empty()
    }

    /// Classifies every dependency with an immediate lookup.
    pub(crate) fn discover(&self) -> Result<(), RegistryError> {
        let mut missing = BTreeSet::new();
        for (i, dep) in self.dependencies.iter().enumerate() {
            if self.registry.lookup(dep.query())?.is_empty() {
                missing.insert(i);
            }
        }
        tracing::debug!(
            module = %self.module,
            total = self.dependencies.len(),
            missing = missing.len(),
            "dependencies discovered"
        );
        *self.unsatisfied.lock() = missing;
        Ok(())
    }

    /// Announces the wait and subscribes to changes of any tracked dependency.
    ///
    /// Dependencies registered between `discover` and the subscription are
    /// picked up by a re-check, which may complete the tracker right away.
    pub(crate) fn register(self: &Arc<Self>) -> Result<(), RegistryError> {
        let missing = self.unsatisfied();
        for dep in &missing {
            self.bus.publish(
                Event::new(EventKind::DependencyWaiting)
                    .with_module(Arc::clone(&self.module))
                    .with_dependency(dep.label())
                    .with_query(dep.query().as_str()),
            );
        }
        let mut waiting = Event::new(EventKind::DependenciesWaiting)
            .with_module(Arc::clone(&self.module))
            .with_unsatisfied(missing.iter().map(|d| d.label().to_string()).collect());
        if let Some(t) = self.timeout {
            waiting = waiting.with_timeout(t);
        }
        self.bus.publish(waiting);

        let Some(combined) = ServiceQuery::any_of(self.dependencies.iter().map(Dependency::query))
        else {
            return Ok(());
        };
        let listener: Arc<dyn RegistryListener> = Arc::new(TrackerListener {
            tracker: Arc::downgrade(self),
        });
        let id = self.registry.subscribe(&combined, listener)?;
        *self.subscription.lock() = Some(id);
        tracing::info!(
            module = %self.module,
            unsatisfied = ?self.unsatisfied_labels(),
            "waiting for dependencies"
        );

        for dep in missing {
            let present = self.registry.lookup(dep.query())?;
            if let Some(d) = present.first() {
                self.apply(RegistryEventKind::Registered, d.properties(), d.id());
            }
        }
        Ok(())
    }

    /// Unsubscribes. Idempotent.
    pub(crate) fn deregister(&self) {
        if let Some(id) = self.subscription.lock().take() {
            self.registry.unsubscribe(id);
        }
    }

    fn on_event(&self, event: &RegistryEvent) {
        self.apply(
            event.kind,
            event.descriptor.properties(),
            event.descriptor.id(),
        );
    }

    fn apply(&self, kind: RegistryEventKind, props: &Properties, id: ServiceId) {
        if self.completed.load(Ordering::SeqCst) {
            return;
        }
        let matching: Vec<usize> = self
            .dependencies
            .iter()
            .enumerate()
            .filter(|(_, d)| d.query().matches(props))
            .map(|(i, _)| i)
            .collect();
        if matching.is_empty() {
            return;
        }

        let (changed, remaining) = {
            let mut set = self.unsatisfied.lock();
            let changed: Vec<usize> = match kind {
                RegistryEventKind::Registered | RegistryEventKind::Modified => {
                    matching.into_iter().filter(|i| set.remove(i)).collect()
                }
                RegistryEventKind::Unregistering => {
                    matching.into_iter().filter(|i| set.insert(*i)).collect()
                }
            };
            (changed, self.labels(&set))
        };

        let event_kind = match kind {
            RegistryEventKind::Unregistering => EventKind::DependencyUnsatisfied,
            _ => EventKind::DependencySatisfied,
        };
        for i in &changed {
            let dep = &self.dependencies[*i];
            tracing::debug!(
                module = %self.module,
                dependency = dep.label(),
                service_id = %id,
                kind = kind.as_label(),
                "dependency changed"
            );
            self.bus.publish(
                Event::new(event_kind)
                    .with_module(Arc::clone(&self.module))
                    .with_dependency(dep.label())
                    .with_query(dep.query().as_str())
                    .with_service(id)
                    .with_unsatisfied(remaining.clone()),
            );
        }

        if remaining.is_empty() {
            self.complete();
        }
    }

    fn complete(&self) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        if !owner.is_resolving() {
            tracing::debug!(module = %self.module, "dependencies satisfied after the wait ended");
            return;
        }
        if self.completed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.deregister();
        owner.on_satisfied();
    }

    fn labels(&self, set: &BTreeSet<usize>) -> Vec<String> {
        set.iter()
            .map(|&i| self.dependencies[i].label().to_string())
            .collect()
    }
}

struct TrackerListener {
    tracker: Weak<DependencyTracker>,
}

impl RegistryListener for TrackerListener {
    fn on_event(&self, event: &RegistryEvent) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MemoryRegistry, OBJECT_CLASS};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Owner {
        done: AtomicBool,
        fired: AtomicUsize,
    }

    impl TrackerOwner for Owner {
        fn is_resolving(&self) -> bool {
            !self.done.load(Ordering::SeqCst)
        }
        fn on_satisfied(&self) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn dep(label: &str) -> Dependency {
        Dependency::mandatory(label, ServiceQuery::new([label], None).unwrap())
    }

    fn publish(reg: &MemoryRegistry, t: &str) -> crate::registry::Registration {
        reg.register(Arc::new(()), "p", Properties::new().with(OBJECT_CLASS, t))
            .unwrap()
    }

    fn tracker(reg: &MemoryRegistry, owner: &Arc<Owner>, deps: Vec<Dependency>) -> Arc<DependencyTracker> {
        let owner: Arc<dyn TrackerOwner> = owner.clone();
        Arc::new(DependencyTracker::new(
            "m".into(),
            deps,
            Arc::new(reg.clone()),
            Bus::new(64),
            None,
            Arc::downgrade(&owner),
        ))
    }

    #[test]
    fn test_optional_dependencies_are_not_tracked() {
        let reg = MemoryRegistry::new();
        let owner = Arc::new(Owner::default());
        let opt = Dependency::optional("x", ServiceQuery::new(["X"], None).unwrap());
        let t = tracker(&reg, &owner, vec![dep("A"), opt]);
        assert_eq!(t.dependencies().len(), 1);
        t.discover().unwrap();
        assert_eq!(t.unsatisfied_labels(), vec!["A"]);
    }

    #[test]
    fn test_fires_once_when_last_dependency_appears() {
        let reg = MemoryRegistry::new();
        let owner = Arc::new(Owner::default());
        let t = tracker(&reg, &owner, vec![dep("A"), dep("B")]);
        t.discover().unwrap();
        t.register().unwrap();

        publish(&reg, "A");
        publish(&reg, "A");
        assert_eq!(t.unsatisfied_labels(), vec!["B"]);
        assert_eq!(owner.fired.load(Ordering::SeqCst), 0);

        publish(&reg, "B");
        publish(&reg, "B");
        assert!(t.is_satisfied());
        assert_eq!(owner.fired.load(Ordering::SeqCst), 1);
        assert_eq!(reg.listener_count(), 0);
    }

    #[test]
    fn test_unregistering_adds_dependency_back() {
        let reg = MemoryRegistry::new();
        let owner = Arc::new(Owner::default());
        let t = tracker(&reg, &owner, vec![dep("A"), dep("B")]);
        t.discover().unwrap();
        t.register().unwrap();

        let a = publish(&reg, "A");
        a.unregister();
        assert_eq!(t.unsatisfied_labels(), vec!["A", "B"]);
    }

    #[test]
    fn test_no_completion_when_owner_moved_on() {
        let reg = MemoryRegistry::new();
        let owner = Arc::new(Owner::default());
        let t = tracker(&reg, &owner, vec![dep("A")]);
        t.discover().unwrap();
        t.register().unwrap();

        owner.done.store(true, Ordering::SeqCst);
        publish(&reg, "A");
        assert!(t.is_satisfied());
        assert_eq!(owner.fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_discovery_error_propagates() {
        let reg = MemoryRegistry::new();
        reg.set_available(false);
        let owner = Arc::new(Owner::default());
        let t = tracker(&reg, &owner, vec![dep("A")]);
        assert!(matches!(t.discover(), Err(RegistryError::Unavailable)));
    }

    #[test]
    fn test_concurrent_registrations_fire_once() {
        let reg = MemoryRegistry::new();
        let owner = Arc::new(Owner::default());
        let deps: Vec<Dependency> = (0..8).map(|i| dep(&format!("D{i}"))).collect();
        let t = tracker(&reg, &owner, deps);
        t.discover().unwrap();
        t.register().unwrap();

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    publish(&reg, &format!("D{i}"));
                })
            })
            .collect();
        for th in threads {
            th.join().unwrap();
        }
        assert!(t.is_satisfied());
        assert_eq!(owner.fired.load(Ordering::SeqCst), 1);
    }
}
