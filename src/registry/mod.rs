//! Service registry model: descriptors, events, the gateway trait and an
//! in-memory implementation.
//!
//! ## Contents
//! - [`Descriptor`], [`Properties`], [`ServiceInstance`] what the registry publishes
//! - [`RegistryGateway`], [`RegistryListener`], [`RegistryEvent`] the contract consumed by proxies and bootstrap
//! - [`MemoryRegistry`], [`Registration`] in-process registry

mod descriptor;
mod gateway;
mod memory;

pub use descriptor::{
    Descriptor, OBJECT_CLASS, Properties, PropertyValue, SERVICE_ID, SERVICE_RANKING, ServiceId,
    ServiceInstance,
};
pub use gateway::{
    ListenerId, RegistryEvent, RegistryEventKind, RegistryGateway, RegistryListener,
};
pub use memory::{MemoryRegistry, Registration};
