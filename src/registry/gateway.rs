//! # Registry gateway contract.
//!
//! [`RegistryGateway`] is the only way proxies and dependency trackers talk to
//! the live service registry:
//!
//! ```text
//! lookup(query)          → [Descriptor]        (any order; callers rank)
//! bind(descriptor)       → Option<Instance>    (None = vanished meanwhile)
//! unbind(descriptor)
//! subscribe(query, l)    → ListenerId          (events for matching services)
//! unsubscribe(id)
//! ```
//!
//! ## Listener rules
//! - Events are delivered synchronously, possibly on a thread this crate does
//!   not control, possibly while the subscriber is still starting up.
//! - Listeners must be fast: mutate local state, hand heavy work off.
//! - A listener may be invoked once more after `unsubscribe` returned (an
//!   in-flight delivery); handlers tolerate that.

use std::fmt;
use std::sync::Arc;

use crate::error::RegistryError;
use crate::query::ServiceQuery;

use super::descriptor::{Descriptor, ServiceInstance};

/// Kind of registry change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryEventKind {
    /// A service was published.
    Registered,
    /// A published service changed its properties.
    Modified,
    /// A service is about to disappear; it is still visible to `lookup`.
    Unregistering,
}

impl RegistryEventKind {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            RegistryEventKind::Registered => "registered",
            RegistryEventKind::Modified => "modified",
            RegistryEventKind::Unregistering => "unregistering",
        }
    }
}

/// Change notification for one service.
#[derive(Debug, Clone)]
pub struct RegistryEvent {
    /// What happened.
    pub kind: RegistryEventKind,
    /// Descriptor after the change (for `Modified`, the new properties).
    pub descriptor: Descriptor,
}

impl RegistryEvent {
    /// Creates an event.
    pub fn new(kind: RegistryEventKind, descriptor: Descriptor) -> Self {
        Self { kind, descriptor }
    }
}

/// Handle returned by [`RegistryGateway::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Synchronous receiver of registry events.
pub trait RegistryListener: Send + Sync + 'static {
    /// Handles one event. Must not block.
    fn on_event(&self, event: &RegistryEvent);
}

impl<F> RegistryListener for F
where
    F: Fn(&RegistryEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: &RegistryEvent) {
        self(event)
    }
}

/// Live service registry as seen by proxies and bootstrap.
///
/// Implementations must be safe to call from any thread, including from inside
/// a listener callback.
pub trait RegistryGateway: Send + Sync + 'static {
    /// Returns every descriptor currently matching `query`.
    fn lookup(&self, query: &ServiceQuery) -> Result<Vec<Descriptor>, RegistryError>;

    /// Obtains the instance behind a descriptor.
    ///
    /// Returns `Ok(None)` when the service disappeared after it was looked up.
    fn bind(&self, descriptor: &Descriptor) -> Result<Option<ServiceInstance>, RegistryError>;

    /// Releases an instance obtained with [`bind`](Self::bind).
    fn unbind(&self, descriptor: &Descriptor);

    /// Starts delivering events about services matching `query` (before and after a change).
    fn subscribe(
        &self,
        query: &ServiceQuery,
        listener: Arc<dyn RegistryListener>,
    ) -> Result<ListenerId, RegistryError>;

    /// Stops delivering events to a listener. Unknown ids are ignored.
    fn unsubscribe(&self, id: ListenerId);
}
