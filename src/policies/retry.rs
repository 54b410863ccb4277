//! # Bounded retry with runtime-reconfigurable waits.
//!
//! [`RetryPolicy`] repeatedly runs a [`RetryCallback`] until it reports completion,
//! pausing between attempts. It is parameterized by:
//! - [`RetryPolicy::max_attempts`] the number of *additional* attempts after the first;
//! - [`RetryPolicy::wait`] the pause between two attempts.
//!
//! ## Pause semantics
//! ```text
//! attempt ──► complete? ──yes──► Completed(out)
//!                │no
//!                ├─ budget used up ──────────► Exhausted
//!                ▼
//!              pause ─┬─ deadline reached ──► next attempt
//!                     ├─ reset(n, w) ───────► recompute deadline = start + w, keep waiting
//!                     ├─ nudge() ───────────► next attempt (early)
//!                     └─ cancelled ─────────► Cancelled
//! ```
//!
//! ## Rules
//! - With `max_attempts = N`, `attempt()` runs at most `N + 1` times and the
//!   policy pauses at most `N` times.
//! - A `reset` during a pause applies to that pause: the deadline is measured from
//!   the pause start with the new wait. Completed attempts are never re-run.
//! - A pause only ends early on `reset`, `nudge` or cancellation; the woken loop
//!   always re-checks completion with a fresh attempt.
//! - Errors returned by `attempt()` end the cycle immediately (not retried).
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use tether::RetryPolicy;
//!
//! let policy = RetryPolicy::new(3, Duration::from_millis(250));
//! assert_eq!(policy.max_attempts(), 3);
//!
//! policy.reset(5, Duration::from_millis(10));
//! assert_eq!(policy.wait(), Duration::from_millis(10));
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, watch};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// One unit of retryable work.
///
/// `attempt` performs the work; `is_complete` decides whether its output ends the cycle.
#[async_trait]
pub trait RetryCallback: Send {
    /// Value produced by one attempt.
    type Output: Send;
    /// Error that aborts the whole cycle.
    type Error: Send;

    /// Runs one attempt.
    async fn attempt(&mut self) -> Result<Self::Output, Self::Error>;

    /// Returns `true` if `output` ends the cycle successfully.
    fn is_complete(&self, output: &Self::Output) -> bool;
}

/// Result of [`RetryPolicy::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// An attempt produced a complete output.
    Completed(T),
    /// The retry budget was used up without a complete output.
    Exhausted,
    /// The cancellation token fired while waiting.
    Cancelled,
}

impl<T> RetryOutcome<T> {
    /// Returns the completed output, if any.
    pub fn completed(self) -> Option<T> {
        match self {
            RetryOutcome::Completed(v) => Some(v),
            _ => None,
        }
    }

    /// True if the cycle was interrupted.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryOutcome::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RetryParams {
    max_attempts: u32,
    wait: Duration,
}

/// Retry count plus inter-attempt wait, reconfigurable while in use.
///
/// The parameters live in a `watch` channel: its version acts as the generation
/// counter that tells a sleeping cycle the parameters changed.
pub struct RetryPolicy {
    params: watch::Sender<RetryParams>,
    nudge: Notify,
}

impl RetryPolicy {
    /// Default number of additional attempts.
    pub const DEFAULT_ATTEMPTS: u32 = 3;
    /// Default pause between attempts.
    pub const DEFAULT_WAIT: Duration = Duration::from_millis(1000);

    /// Creates a policy with `max_attempts` retries separated by `wait`.
    pub fn new(max_attempts: u32, wait: Duration) -> Self {
        Self {
            params: watch::Sender::new(RetryParams { max_attempts, wait }),
            nudge: Notify::new(),
        }
    }

    /// Number of additional attempts after the first.
    pub fn max_attempts(&self) -> u32 {
        self.params.borrow().max_attempts
    }

    /// Pause between attempts.
    pub fn wait(&self) -> Duration {
        self.params.borrow().wait
    }

    /// Replaces the parameters and wakes every in-progress pause so it picks them up.
    pub fn reset(&self, max_attempts: u32, wait: Duration) {
        tracing::debug!(max_attempts, wait_ms = wait.as_millis() as u64, "retry policy reset");
        self.params.send_replace(RetryParams { max_attempts, wait });
    }

    /// Ends every in-progress pause early; the woken cycles attempt again.
    pub fn nudge(&self) {
        self.nudge.notify_waiters();
    }

    /// Runs `callback` until it completes, the budget is used up, or `cancel` fires.
    ///
    /// Errors returned by [`RetryCallback::attempt`] are propagated as-is.
    pub async fn execute<C>(
        &self,
        callback: &mut C,
        cancel: &CancellationToken,
    ) -> Result<RetryOutcome<C::Output>, C::Error>
    where
        C: RetryCallback + ?Sized,
    {
        if cancel.is_cancelled() {
            return Ok(RetryOutcome::Cancelled);
        }

        let mut pauses: u32 = 0;
        loop {
            let output = callback.attempt().await?;
            if callback.is_complete(&output) {
                return Ok(RetryOutcome::Completed(output));
            }
            if pauses >= self.max_attempts() {
                return Ok(RetryOutcome::Exhausted);
            }
            if !self.pause(cancel).await {
                return Ok(RetryOutcome::Cancelled);
            }
            pauses += 1;

            // reset() may have lowered the budget while we were waiting
            if pauses > self.max_attempts() {
                return Ok(RetryOutcome::Exhausted);
            }
        }
    }

    /// Waits one pause. Returns `false` if cancelled.
    async fn pause(&self, cancel: &CancellationToken) -> bool {
        let mut params = self.params.subscribe();
        let started = Instant::now();

        let nudged = self.nudge.notified();
        tokio::pin!(nudged);
        nudged.as_mut().enable();

        loop {
            let wait = params.borrow_and_update().wait;
            let deadline = started.checked_add(wait).unwrap_or_else(far_future);

            tokio::select! {
                _ = time::sleep_until(deadline) => return true,
                changed = params.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
                _ = &mut nudged => return true,
                _ = cancel.cancelled() => return false,
            }
        }
    }
}

impl Default for RetryPolicy {
    /// Returns a policy with 3 retries, 1s apart.
    fn default() -> Self {
        Self::new(Self::DEFAULT_ATTEMPTS, Self::DEFAULT_WAIT)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = *self.params.borrow();
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &p.max_attempts)
            .field("wait", &p.wait)
            .finish()
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365 * 30)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Counting {
        calls: u32,
        complete_at: Option<u32>,
    }

    impl Counting {
        fn never() -> Self {
            Self {
                calls: 0,
                complete_at: None,
            }
        }

        fn at(n: u32) -> Self {
            Self {
                calls: 0,
                complete_at: Some(n),
            }
        }
    }

    #[async_trait]
    impl RetryCallback for Counting {
        type Output = u32;
        type Error = String;

        async fn attempt(&mut self) -> Result<u32, String> {
            self.calls += 1;
            Ok(self.calls)
        }

        fn is_complete(&self, output: &u32) -> bool {
            Some(*output) == self.complete_at
        }
    }

    struct Failing;

    #[async_trait]
    impl RetryCallback for Failing {
        type Output = ();
        type Error = String;

        async fn attempt(&mut self) -> Result<(), String> {
            Err("boom".into())
        }

        fn is_complete(&self, _: &()) -> bool {
            false
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_completes_without_pause() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let mut cb = Counting::at(1);
        let start = Instant::now();

        let out = policy.execute(&mut cb, &CancellationToken::new()).await;
        assert_eq!(out, Ok(RetryOutcome::Completed(1)));
        assert_eq!(cb.calls, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_n_plus_one_attempts() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        let mut cb = Counting::never();
        let start = Instant::now();

        let out = policy.execute(&mut cb, &CancellationToken::new()).await;
        assert_eq!(out, Ok(RetryOutcome::Exhausted));
        assert_eq!(cb.calls, 5);
        assert!(start.elapsed() >= Duration::from_millis(400));
        assert!(start.elapsed() < Duration::from_millis(450));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_is_single_lookup() {
        let policy = RetryPolicy::new(0, Duration::from_secs(5));
        let mut cb = Counting::never();

        let out = policy.execute(&mut cb, &CancellationToken::new()).await;
        assert_eq!(out, Ok(RetryOutcome::Exhausted));
        assert_eq!(cb.calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_on_later_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let mut cb = Counting::at(3);

        let out = policy.execute(&mut cb, &CancellationToken::new()).await;
        assert_eq!(out, Ok(RetryOutcome::Completed(3)));
        assert_eq!(cb.calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_shortens_running_pause() {
        let policy = Arc::new(RetryPolicy::new(1, Duration::from_secs(20)));
        let resetter = Arc::clone(&policy);
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(100)).await;
            resetter.reset(0, Duration::ZERO);
        });

        let mut cb = Counting::never();
        let start = Instant::now();
        let out = policy.execute(&mut cb, &CancellationToken::new()).await;

        assert_eq!(out, Ok(RetryOutcome::Exhausted));
        assert_eq!(cb.calls, 1, "completed attempts must not be re-run");
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_lengthens_running_pause() {
        let policy = Arc::new(RetryPolicy::new(1, Duration::from_millis(100)));
        let resetter = Arc::clone(&policy);
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(50)).await;
            resetter.reset(1, Duration::from_millis(500));
        });

        let mut cb = Counting::never();
        let start = Instant::now();
        let out = policy.execute(&mut cb, &CancellationToken::new()).await;

        assert_eq!(out, Ok(RetryOutcome::Exhausted));
        assert_eq!(cb.calls, 2);
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert!(start.elapsed() < Duration::from_millis(550));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nudge_wakes_pause_and_rechecks() {
        let policy = Arc::new(RetryPolicy::new(3, Duration::from_secs(20)));
        let nudger = Arc::clone(&policy);
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(50)).await;
            nudger.nudge();
        });

        let mut cb = Counting::at(2);
        let start = Instant::now();
        let out = policy.execute(&mut cb, &CancellationToken::new()).await;

        assert_eq!(out, Ok(RetryOutcome::Completed(2)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_pause_is_distinguished() {
        let policy = RetryPolicy::new(3, Duration::from_secs(20));
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let mut cb = Counting::never();
        let out = policy.execute(&mut cb, &token).await;
        assert_eq!(out, Ok(RetryOutcome::Cancelled));
        assert!(out.unwrap().completed().is_none());
        assert_eq!(cb.calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_error_is_not_retried() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let out = policy.execute(&mut Failing, &CancellationToken::new()).await;
        assert_eq!(out, Err("boom".to_string()));
    }
}
