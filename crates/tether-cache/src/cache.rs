//! Per-kind stores behind reader/writer locks.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::entity::{Channel, Entity, Guild, Message, Role, User};
use crate::store::EntityStore;

/// Default capacity for every kind except messages.
pub const DEFAULT_CAPACITY: usize = 10_000;
/// Default message capacity.
pub const DEFAULT_MESSAGE_CAPACITY: usize = 1_000;

/// Capacity per entity kind. `None` means unbounded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheCapacity {
    /// Guild capacity.
    pub guilds: Option<usize>,
    /// Channel capacity.
    pub channels: Option<usize>,
    /// Role capacity.
    pub roles: Option<usize>,
    /// User capacity.
    pub users: Option<usize>,
    /// Message capacity.
    pub messages: Option<usize>,
}

impl Default for CacheCapacity {
    fn default() -> Self {
        Self {
            guilds: Some(DEFAULT_CAPACITY),
            channels: Some(DEFAULT_CAPACITY),
            roles: Some(DEFAULT_CAPACITY),
            users: Some(DEFAULT_CAPACITY),
            messages: Some(DEFAULT_MESSAGE_CAPACITY),
        }
    }
}

impl CacheCapacity {
    /// The same capacity for every kind.
    pub fn uniform(capacity: Option<usize>) -> Self {
        Self {
            guilds: capacity,
            channels: capacity,
            roles: capacity,
            users: capacity,
            messages: capacity,
        }
    }
}

/// Entity cache with one store per kind.
///
/// Writes take the kind's write lock, reads take its read lock. The gateway
/// dispatch path is the only writer; consumers hold a [`CacheView`].
#[derive(Debug)]
pub struct EntityCache {
    pub(crate) guilds: RwLock<EntityStore<Guild>>,
    pub(crate) channels: RwLock<EntityStore<Channel>>,
    pub(crate) roles: RwLock<EntityStore<Role>>,
    pub(crate) users: RwLock<EntityStore<User>>,
    pub(crate) messages: RwLock<EntityStore<Message>>,
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new(CacheCapacity::default())
    }
}

impl EntityCache {
    /// Create an empty cache.
    pub fn new(capacity: CacheCapacity) -> Self {
        Self {
            guilds: RwLock::new(EntityStore::new(capacity.guilds)),
            channels: RwLock::new(EntityStore::new(capacity.channels)),
            roles: RwLock::new(EntityStore::new(capacity.roles)),
            users: RwLock::new(EntityStore::new(capacity.users)),
            messages: RwLock::new(EntityStore::new(capacity.messages)),
        }
    }

    /// Create or merge an entity; returns the stored result.
    pub fn upsert<T: Entity>(&self, id: &str, patch: T) -> T {
        T::slot(self).write().upsert(id, patch)
    }

    /// Remove an entity, returning its last snapshot.
    pub fn remove<T: Entity>(&self, id: &str) -> Option<T> {
        T::slot(self).write().remove(id)
    }

    /// Clone of the stored snapshot.
    pub fn get<T: Entity>(&self, id: &str) -> Option<T> {
        T::slot(self).read().get(id).cloned()
    }

    /// Whether an entity is cached.
    pub fn contains<T: Entity>(&self, id: &str) -> bool {
        T::slot(self).read().contains(id)
    }

    /// Number of cached entities of kind `T`.
    pub fn len<T: Entity>(&self) -> usize {
        T::slot(self).read().len()
    }

    /// Drop everything. Used when a session is replaced by a fresh identify.
    pub fn clear(&self) {
        self.guilds.write().clear();
        self.channels.write().clear();
        self.roles.write().clear();
        self.users.write().clear();
        self.messages.write().clear();
    }

    /// Read-only handle for consumers.
    pub fn view(self: &Arc<Self>) -> CacheView {
        CacheView {
            inner: Arc::clone(self),
        }
    }
}

/// Read-only access to an [`EntityCache`].
#[derive(Clone, Debug)]
pub struct CacheView {
    inner: Arc<EntityCache>,
}

impl CacheView {
    /// Clone of the stored snapshot.
    pub fn get<T: Entity>(&self, id: &str) -> Option<T> {
        self.inner.get::<T>(id)
    }

    /// Whether an entity is cached.
    pub fn contains<T: Entity>(&self, id: &str) -> bool {
        self.inner.contains::<T>(id)
    }

    /// Number of cached entities of kind `T`.
    pub fn len<T: Entity>(&self) -> usize {
        self.inner.len::<T>()
    }
}
