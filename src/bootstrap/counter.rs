//! Outstanding-shutdown bookkeeping.
//!
//! Every executor holds one [`CounterGuard`] from creation until its first
//! effective close; dropping the guard decrements the shared count, so the
//! decrement happens even if closing panics or the executor is just dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Shared count of modules that have not finished closing.
#[derive(Clone, Debug)]
pub struct ShutdownCounter {
    tx: Arc<watch::Sender<usize>>,
}

impl Default for ShutdownCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCounter {
    /// Creates a counter at zero.
    pub fn new() -> Self {
        Self {
            tx: Arc::new(watch::Sender::new(0)),
        }
    }

    /// Increments and returns the guard that decrements on drop.
    pub fn increment(&self) -> CounterGuard {
        self.tx.send_modify(|n| *n += 1);
        CounterGuard {
            counter: self.clone(),
        }
    }

    /// Current value.
    pub fn value(&self) -> usize {
        *self.tx.borrow()
    }

    /// Waits until the count is zero. Returns `false` if `grace` elapsed first.
    pub async fn wait_for_zero(&self, grace: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        matches!(
            tokio::time::timeout(grace, rx.wait_for(|n| *n == 0)).await,
            Ok(Ok(_))
        )
    }

    fn decrement(&self) {
        self.tx.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Decrements its [`ShutdownCounter`] exactly once, on drop.
#[derive(Debug)]
pub struct CounterGuard {
    counter: ShutdownCounter,
}

impl Drop for CounterGuard {
    fn drop(&mut self) {
        self.counter.decrement();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_guard_decrements_once_and_wait_observes_zero() {
        let counter = ShutdownCounter::new();
        let a = counter.increment();
        let b = counter.increment();
        assert_eq!(counter.value(), 2);

        drop(a);
        assert!(!counter.wait_for_zero(Duration::from_millis(50)).await);

        let waiter = {
            let c = counter.clone();
            tokio::spawn(async move { c.wait_for_zero(Duration::from_secs(5)).await })
        };
        drop(b);
        assert!(waiter.await.unwrap());
        assert_eq!(counter.value(), 0);
    }
}
