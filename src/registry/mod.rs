//! Service registry and device-instance resolution.
//!
//! ## Contents
//! - [`Service`] one tracked bus name with its owner, instance and metadata
//! - [`ServiceRegistry`] owner-keyed table driven by rename signals
//! - [`resolve_service_name`] / [`resolve_device_instance`] heuristic lookups

mod resolver;
mod service;
mod table;

pub use resolver::{
    resolve_destination, resolve_device_instance, resolve_service_name, split_service_key,
};
pub use service::{Service, device_type, family_of, service_key};
pub use table::{OwnerChange, ServiceRegistry};
