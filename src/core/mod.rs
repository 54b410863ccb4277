//! Runtime core: module table and shared resources.
//!
//! The only public API from this module is [`Bootstrapper`] (and its builder),
//! which starts modules, fans events out to subscribers and shuts everything
//! down within a grace period.
//!
//! Internal modules:
//! - [`bootstrapper`]: owns bus, subscribers, worker pool and shutdown counter;
//! - [`builder`]: wires the runtime together;
//! - [`registry`]: name-keyed table of live executors.

mod bootstrapper;
mod builder;
mod registry;

pub use bootstrapper::Bootstrapper;
pub use builder::BootstrapperBuilder;
