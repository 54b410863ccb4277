//! # Event bus for broadcasting progress events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that provides
//! non-blocking event publishing from multiple sources (proxies, trackers, executors).
//!
//! ## Architecture
//! ```text
//! Publishers (many):                    Subscriber (one):
//!   Proxy     ──┐
//!   Tracker   ──┼──────► Bus ───────► fan-out listener ────► SubscriberSet
//!   Executor  ──┤  (broadcast chan)     (in Bootstrapper)
//!   Bootstrapper┘
//! ```
//!
//! Publishing is safe from registry listener threads: `publish()` never blocks
//! and never needs a runtime.
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` calls `broadcast::Sender::send`.
//! - **Bounded capacity**: a single ring buffer stores recent events for all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events are lost if there are no active subscribers at send time.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for progress events.
///
/// Cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Event>(capacity);
        Self { tx }
    }

    /// Publishes an event to all active subscribers.
    ///
    /// If there are no receivers, the event is dropped.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that will observe subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn test_publish_reaches_every_receiver() {
        let bus = Bus::new(0);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(Event::new(EventKind::ModuleStarted).with_module("m"));

        assert_eq!(a.recv().await.unwrap().kind, EventKind::ModuleStarted);
        assert_eq!(b.recv().await.unwrap().module.as_deref(), Some("m"));
    }

    #[test]
    fn test_publish_without_receivers_is_silent() {
        Bus::new(4).publish(Event::new(EventKind::ProxyBound));
    }
}
