//! Retry policy for service lookups.
//!
//! ## Contents
//! - [`RetryPolicy`] how many times and how long to wait for a matching provider
//! - [`RetryCallback`] one unit of retryable work (lookup + bind)
//! - [`RetryOutcome`] completed / exhausted / cancelled
//!
//! ## Quick wiring
//! ```text
//! DynamicServiceProxy { retry: RetryPolicy }
//!      └─► initial bind and every unbound call run retry.execute(BindAttempt)
//!      └─► registry REGISTERED events nudge() the policy so waiting calls look again
//! ```
//!
//! ## Defaults
//! - `RetryPolicy::default()` → 3 retries, 1s apart.

mod retry;

pub use retry::{RetryCallback, RetryOutcome, RetryPolicy};
