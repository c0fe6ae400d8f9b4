//! # tether-cache
//!
//! Local snapshots of the entities the gateway tells us about.
//!
//! - [`Entity`]: capability shared by every entity kind (id, kind, merge)
//! - [`EntityStore`]: one bounded, insertion-ordered map for a single kind
//! - [`EntityCache`]: one store per kind behind a reader/writer lock
//! - [`CacheView`]: read-only handle given to consumers
//!
//! Updates are shallow merges: fields present in the update overwrite, absent
//! fields keep their previous value. When a store is over capacity the
//! oldest-inserted entry is evicted (insertion order, not LRU).

#![deny(unsafe_code)]

pub mod cache;
pub mod entity;
pub mod store;

pub use cache::{CacheCapacity, CacheView, DEFAULT_CAPACITY, DEFAULT_MESSAGE_CAPACITY, EntityCache};
pub use entity::{Channel, Entity, EntityKind, Guild, Message, Role, User};
pub use store::EntityStore;
