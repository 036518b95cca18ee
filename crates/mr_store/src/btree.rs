use crate::{Cursor, RegistrationStore, StoreError};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// `BTreeMap`-backed store, natural key order only.
#[derive(Debug)]
pub struct BTreeStore<V> {
    entries: BTreeMap<u64, (u64, V)>,
    next_stamp: u64,
}

impl<V> BTreeStore<V> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_stamp: 0,
        }
    }
}

impl<V> Default for BTreeStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> RegistrationStore<V> for BTreeStore<V> {
    fn find(&self, key: u64) -> Option<Cursor> {
        self.entries.get(&key).map(|(stamp, _)| Cursor {
            slot: key,
            generation: *stamp,
        })
    }

    fn insert(&mut self, key: u64, value: V) -> Result<Cursor, StoreError<V>> {
        match self.entries.entry(key) {
            Entry::Occupied(_) => Err(StoreError::DuplicateKey { key, value }),
            Entry::Vacant(slot) => {
                let stamp = self.next_stamp;
                self.next_stamp = self.next_stamp.wrapping_add(1);
                slot.insert((stamp, value));
                Ok(Cursor {
                    slot: key,
                    generation: stamp,
                })
            }
        }
    }

    fn erase(&mut self, cursor: Cursor) -> Option<(u64, V)> {
        match self.entries.entry(cursor.slot) {
            Entry::Occupied(entry) if entry.get().0 == cursor.generation => {
                let (key, (_, value)) = entry.remove_entry();
                Some((key, value))
            }
            _ => None,
        }
    }

    fn key_value(&self, cursor: Cursor) -> Option<(u64, &V)> {
        self.entries
            .get(&cursor.slot)
            .filter(|(stamp, _)| *stamp == cursor.generation)
            .map(|(_, value)| (cursor.slot, value))
    }

    fn value_mut(&mut self, cursor: Cursor) -> Option<&mut V> {
        self.entries
            .get_mut(&cursor.slot)
            .filter(|(stamp, _)| *stamp == cursor.generation)
            .map(|(_, value)| value)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (u64, &V)> + '_> {
        Box::new(self.entries.iter().map(|(key, (_, value))| (*key, value)))
    }

    fn destroy(self) {
        tracing::trace!(remaining = self.entries.len(), "destroying btree store");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_rejected() {
        let mut store = BTreeStore::new();
        store.insert(1, 'a').unwrap();
        assert_eq!(store.insert(1, 'b').unwrap_err().into_value(), 'b');
        assert_eq!(store.get(1), Some(&'a'));
    }

    #[test]
    fn test_stale_cursor_after_reinsert() {
        let mut store = BTreeStore::new();
        let old = store.insert(9, 1).unwrap();
        assert_eq!(store.erase(old), Some((9, 1)));
        store.insert(9, 2).unwrap();
        assert!(store.erase(old).is_none());
        assert_eq!(store.remove(9), Some(2));
    }
}
