//! # Dependency-gated module bootstrap.
//!
//! - [`BootstrapExecutor`] runs a [`Module`] through [`BootstrapState`].
//! - [`DependencyTracker`] watches the registry for the module's mandatory [`Dependency`]s.
//! - [`ShutdownCounter`] counts executors that have not finished closing.
//!
//! Internal:
//! - `watchdog`: single-shot timer bounding the dependency wait;
//! - `workers`: bounded pool running stage two off registry threads.

mod counter;
mod executor;
mod module;
mod state;
mod tracker;
mod watchdog;
mod workers;

pub use counter::{CounterGuard, ShutdownCounter};
pub use executor::BootstrapExecutor;
pub use module::{Dependency, Module};
pub use state::BootstrapState;
pub use tracker::DependencyTracker;

pub(crate) use workers::WorkerPool;
