//! Consumer-side resilience over a live registry.
//!
//! - [`DynamicServiceProxy`] a typed handle that survives provider churn
//! - [`ProxyBuilder`], [`Cardinality`] construction options
//! - [`BindingListener`] bind/unbind callbacks

mod dynamic;
mod listener;

pub use dynamic::{Cardinality, DynamicServiceProxy, ProxyBuilder};
pub use listener::BindingListener;
