use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use kumas_types::models::UserId;

pub type ConnectionId = Uuid;

/// Outcome of [`ConnectionRegistry::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The connection was added; carries the user's updated connection set.
    Added(BTreeSet<ConnectionId>),
    /// The (user, connection) pair was already present. Nothing changed.
    AlreadyRegistered,
}

/// Maps users to their live connections and connections back to their owner.
///
/// Both indexes sit behind one lock, so every operation is atomic with
/// respect to both maps: a reader never sees a connection id in one index
/// without its entry in the other. Users with no live connection are removed
/// from the forward map rather than kept with an empty set.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Indexes>,
}

#[derive(Default)]
struct Indexes {
    /// user_id -> live connection ids
    by_user: HashMap<UserId, BTreeSet<ConnectionId>>,
    /// connection_id -> owning user
    owner: HashMap<ConnectionId, UserId>,
}

impl Indexes {
    fn remove(&mut self, conn_id: ConnectionId) -> Option<UserId> {
        let user_id = self.owner.remove(&conn_id)?;
        if let Some(set) = self.by_user.get_mut(&user_id) {
            set.remove(&conn_id);
            if set.is_empty() {
                self.by_user.remove(&user_id);
            }
        }
        Some(user_id)
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `conn_id` under `user_id`. Idempotent for the same pair.
    /// A connection id owned by another user is moved to `user_id`.
    pub fn register(&self, user_id: UserId, conn_id: ConnectionId) -> Registration {
        let mut idx = self.write();

        match idx.owner.get(&conn_id).copied() {
            Some(owner) if owner == user_id => return Registration::AlreadyRegistered,
            Some(_) => {
                idx.remove(conn_id);
            }
            None => {}
        }

        idx.owner.insert(conn_id, user_id);
        let set = idx.by_user.entry(user_id).or_default();
        set.insert(conn_id);
        Registration::Added(set.clone())
    }

    /// Remove a connection from both indexes. Unknown ids are a no-op.
    /// Returns the user that owned the connection.
    pub fn unregister(&self, conn_id: ConnectionId) -> Option<UserId> {
        self.write().remove(conn_id)
    }

    /// Snapshot of a user's live connections; empty if the user is offline.
    pub fn connections_for(&self, user_id: UserId) -> BTreeSet<ConnectionId> {
        self.read().by_user.get(&user_id).cloned().unwrap_or_default()
    }

    #[cfg(test)]
    fn owner_of(&self, conn_id: ConnectionId) -> Option<UserId> {
        self.read().owner.get(&conn_id).copied()
    }

    pub fn online_user_count(&self) -> usize {
        self.read().by_user.len()
    }

    pub fn connection_count(&self) -> usize {
        self.read().owner.len()
    }

    // Mutations never leave the indexes half-updated, so a poisoned lock
    // still guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, Indexes> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indexes> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
