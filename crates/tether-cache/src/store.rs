//! Single-kind bounded store.

use indexmap::IndexMap;
use tracing::debug;

use crate::entity::Entity;

/// Insertion-ordered map from id to snapshot with an optional capacity.
///
/// Re-upserting an existing id merges in place and keeps its original
/// position, so eviction order is first-seen order.
#[derive(Debug)]
pub struct EntityStore<T> {
    entries: IndexMap<String, T>,
    capacity: Option<usize>,
}

impl<T: Entity> EntityStore<T> {
    /// Create a store. `None` means unbounded; a capacity of zero is treated
    /// as one.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: IndexMap::new(),
            capacity: capacity.map(|c| c.max(1)),
        }
    }

    /// Create the entity if absent, otherwise merge `patch` into it.
    /// Returns the resulting snapshot.
    pub fn upsert(&mut self, id: &str, patch: T) -> T {
        if let Some(existing) = self.entries.get_mut(id) {
            existing.merge(patch);
            return existing.clone();
        }

        let _ = self.entries.insert(id.to_string(), patch.clone());
        self.evict_over_capacity();
        patch
    }

    /// Remove and return the entity with `id`.
    pub fn remove(&mut self, id: &str) -> Option<T> {
        self.entries.shift_remove(id)
    }

    /// Look up an entity.
    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries.get(id)
    }

    /// Whether `id` is present.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn evict_over_capacity(&mut self) {
        let Some(capacity) = self.capacity else {
            return;
        };
        while self.entries.len() > capacity {
            if let Some((id, _)) = self.entries.shift_remove_index(0) {
                debug!(kind = %T::KIND, id = %id, capacity, "evicted oldest entry");
            }
        }
    }
}
