//! # Fabric MR Store
//!
//! Exact-match containers keyed by `u64`, used by the memory registration
//! registry to hold live registrations.
//!
//! ## Backends
//! - [`AvlStore`]: height-balanced binary search tree with an injectable
//!   [`KeyComparator`]. This is the default backend.
//! - [`BTreeStore`]: thin wrapper over `std::collections::BTreeMap`,
//!   natural key order only.
//!
//! Both are reached through the [`RegistrationStore`] trait so the registry
//! never depends on a concrete container.

pub mod avl;
pub mod btree;
pub mod comparator;

pub use avl::AvlStore;
pub use btree::BTreeStore;
pub use comparator::{KeyComparator, NaturalOrder, ReverseOrder};

use std::fmt;

/// Position of a live value inside a store.
///
/// A cursor is only meaningful for the store that produced it. Once the
/// value it designates is erased, the cursor goes stale and every lookup
/// through it returns `None`, even if the same key is inserted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cursor {
    pub(crate) slot: u64,
    pub(crate) generation: u64,
}

/// Store errors
#[derive(thiserror::Error)]
pub enum StoreError<V> {
    /// The key is already present; the rejected value is handed back.
    #[error("key {key:#x} already present in store")]
    DuplicateKey { key: u64, value: V },
}

impl<V> StoreError<V> {
    pub fn key(&self) -> u64 {
        match self {
            Self::DuplicateKey { key, .. } => *key,
        }
    }

    /// Recover the value that was not inserted.
    pub fn into_value(self) -> V {
        match self {
            Self::DuplicateKey { value, .. } => value,
        }
    }
}

impl<V> fmt::Debug for StoreError<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateKey { key, .. } => f
                .debug_struct("DuplicateKey")
                .field("key", key)
                .finish_non_exhaustive(),
        }
    }
}

/// Abstract registration store
pub trait RegistrationStore<V> {
    /// Locate the value stored under `key`.
    fn find(&self, key: u64) -> Option<Cursor>;

    /// Insert a value. Fails without mutating the store if `key` is present.
    fn insert(&mut self, key: u64, value: V) -> Result<Cursor, StoreError<V>>;

    /// Remove the value at `cursor` and return ownership of it.
    fn erase(&mut self, cursor: Cursor) -> Option<(u64, V)>;

    /// Key and value at `cursor`.
    fn key_value(&self, cursor: Cursor) -> Option<(u64, &V)>;

    /// Mutable access to the value at `cursor`. The key cannot change.
    fn value_mut(&mut self, cursor: Cursor) -> Option<&mut V>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walk every entry in comparator order.
    fn iter(&self) -> Box<dyn Iterator<Item = (u64, &V)> + '_>;

    /// Release the container itself.
    ///
    /// Does not hand remaining values back to anyone; owners are expected to
    /// empty the store first. Any value still present is dropped in place.
    fn destroy(self)
    where
        Self: Sized;

    fn get(&self, key: u64) -> Option<&V> {
        let cursor = self.find(key)?;
        self.key_value(cursor).map(|(_, value)| value)
    }

    fn get_mut(&mut self, key: u64) -> Option<&mut V> {
        let cursor = self.find(key)?;
        self.value_mut(cursor)
    }

    fn contains_key(&self, key: u64) -> bool {
        self.find(key).is_some()
    }

    fn remove(&mut self, key: u64) -> Option<V> {
        let cursor = self.find(key)?;
        self.erase(cursor).map(|(_, value)| value)
    }
}
