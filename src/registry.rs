use std::{collections::HashMap, hash::Hash, sync::Arc};

use parking_lot::RwLock;
use tracing::trace;

use crate::{
    lock::{LockStatus, ResourceLock},
    resource::{NamespaceName, Resource, TableName},
};

/// Hands out the [`ResourceLock`] of every namespace and table. A lock is created on first
/// reference and shared by every queue and guard that refers to the same resource.
#[derive(Debug, Default)]
pub struct LockRegistry {
    namespaces: RwLock<HashMap<NamespaceName, Arc<ResourceLock>>>,
    tables: RwLock<HashMap<TableName, Arc<ResourceLock>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn namespace_lock(&self, namespace: &NamespaceName) -> Arc<ResourceLock> {
        get_or_create(&self.namespaces, namespace, || {
            Resource::Namespace(namespace.clone())
        })
    }

    pub fn table_lock(&self, table: &TableName) -> Arc<ResourceLock> {
        get_or_create(&self.tables, table, || Resource::Table(table.clone()))
    }

    /// Drops every lock that is unlocked and no longer referenced outside this registry.
    /// Returns the number of dropped locks.
    pub fn evict_unused(&self) -> usize {
        evict(&self.tables) + evict(&self.namespaces)
    }

    pub fn len(&self) -> usize {
        self.namespaces.read().len() + self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn get_or_create<K: Clone + Eq + Hash>(
    locks: &RwLock<HashMap<K, Arc<ResourceLock>>>,
    key: &K,
    resource: impl FnOnce() -> Resource,
) -> Arc<ResourceLock> {
    // entry exists, just clone the handle (cheap, frequent)
    if let Some(lock) = locks.read().get(key) {
        return lock.clone();
    }
    // entry not inserted yet, insert with cloning the key (expensive, rare)
    locks
        .write()
        .entry(key.clone())
        .or_insert_with(|| {
            let resource = resource();
            trace!(%resource, "Creating resource lock");
            Arc::new(ResourceLock::new(resource))
        })
        .clone()
}

fn evict<K>(locks: &RwLock<HashMap<K, Arc<ResourceLock>>>) -> usize {
    let mut locks = locks.write();
    let before = locks.len();
    // NB: a count of one means only the registry knows this lock, and no one can obtain a new
    // handle while we hold the write guard
    locks.retain(|_, lock| Arc::strong_count(lock) > 1 || lock.is_locked());
    before - locks.len()
}
