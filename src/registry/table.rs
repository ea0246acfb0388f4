//! # Service registry: owner → [`Service`].
//!
//! The registry is keyed by the transient owner id because that is what
//! inbound signals carry as their sender. Rename signals drive its lifecycle:
//!
//! ```text
//! NameOwnerChanged(name, old, new)
//!   ├─ old == "" && new != ""  → Added(service)
//!   ├─ old != "" && new == ""  → Removed(service)
//!   ├─ old != "" && new != ""  → Migrated(service)  (entry moves to new owner)
//!   └─ otherwise / foreign ns  → Ignored
//! ```

use std::collections::BTreeMap;

use super::service::Service;

/// Outcome of applying one rename signal.
#[derive(Clone, Debug, PartialEq)]
pub enum OwnerChange {
    /// A new service was registered (clone of the new entry).
    Added(Service),
    /// A service disappeared (the removed entry).
    Removed(Service),
    /// A known name moved to a new owner (clone of the moved entry).
    Migrated(Service),
    /// Not relevant to this registry.
    Ignored,
}

/// Registry of services currently present on the bus, ordered by owner id.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    namespace: String,
    services: BTreeMap<String, Service>,
}

impl ServiceRegistry {
    /// Creates an empty registry tracking names under `namespace` (e.g. `com.victronenergy`).
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            services: BTreeMap::new(),
        }
    }

    /// True if `name` lives under the tracked namespace.
    pub fn in_namespace(&self, name: &str) -> bool {
        name.strip_prefix(self.namespace.as_str())
            .is_some_and(|rest| rest.starts_with('.') && rest.len() > 1)
    }

    /// Registers `name` under `owner`, replacing any previous entry for that owner.
    pub fn insert(&mut self, owner: &str, name: &str) -> &Service {
        self.services
            .entry(owner.to_string())
            .and_modify(|svc| {
                if svc.name != name {
                    *svc = Service::new(name, owner);
                }
            })
            .or_insert_with(|| Service::new(name, owner))
    }

    pub fn remove(&mut self, owner: &str) -> Option<Service> {
        self.services.remove(owner)
    }

    pub fn get(&self, owner: &str) -> Option<&Service> {
        self.services.get(owner)
    }

    pub fn get_mut(&mut self, owner: &str) -> Option<&mut Service> {
        self.services.get_mut(owner)
    }

    /// Finds a service by its full bus name.
    pub fn find_by_name(&self, name: &str) -> Option<&Service> {
        self.services.values().find(|s| s.name == name)
    }

    pub fn find_by_name_mut(&mut self, name: &str) -> Option<&mut Service> {
        self.services.values_mut().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.services.clear();
    }

    /// Applies a rename signal.
    pub fn apply_owner_change(&mut self, name: &str, old_owner: &str, new_owner: &str) -> OwnerChange {
        if !self.in_namespace(name) {
            return OwnerChange::Ignored;
        }
        match (old_owner.is_empty(), new_owner.is_empty()) {
            (true, false) => OwnerChange::Added(self.insert(new_owner, name).clone()),
            (false, true) => match self.remove(old_owner) {
                Some(svc) => OwnerChange::Removed(svc),
                None => OwnerChange::Ignored,
            },
            (false, false) => {
                let mut svc = self
                    .remove(old_owner)
                    .filter(|s| s.name == name)
                    .unwrap_or_else(|| Service::new(name, new_owner));
                svc.owner = new_owner.to_string();
                self.services.insert(new_owner.to_string(), svc.clone());
                OwnerChange::Migrated(svc)
            }
            (true, true) => OwnerChange::Ignored,
        }
    }
}
