//! Ordered id keyed stores.

use std::collections::{BTreeMap, BTreeSet};

/// Balanced-tree map from a numeric id to a value.
#[derive(Debug, Clone)]
pub struct UStore<V> {
    entries: BTreeMap<u64, V>,
}

impl<V> Default for UStore<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V> UStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `id`, returning the value it replaced.
    pub fn insert(&mut self, id: u64, value: V) -> Option<V> {
        self.entries.insert(id, value)
    }

    pub fn lookup(&self, id: u64) -> Option<&V> {
        self.entries.get(&id)
    }

    pub fn lookup_mut(&mut self, id: u64) -> Option<&mut V> {
        self.entries.get_mut(&id)
    }

    pub fn remove(&mut self, id: u64) -> Option<V> {
        self.entries.remove(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    /// Visit entries in id order until `f` returns false.
    pub fn foreach<F>(&self, mut f: F)
    where
        F: FnMut(u64, &V) -> bool,
    {
        for (id, value) in &self.entries {
            if !f(*id, value) {
                break;
            }
        }
    }

    pub fn ids(&self) -> Vec<u64> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return every entry.
    pub fn take_all(&mut self) -> Vec<(u64, V)> {
        std::mem::take(&mut self.entries).into_iter().collect()
    }
}

/// Balanced-tree set of numeric ids.
#[derive(Debug, Clone, Default)]
pub struct UPool {
    ids: BTreeSet<u64>,
}

impl UPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id`; false if it was already present.
    pub fn add(&mut self, id: u64) -> bool {
        self.ids.insert(id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    pub fn remove(&mut self, id: u64) -> bool {
        self.ids.remove(&id)
    }

    pub fn list(&self) -> Vec<u64> {
        self.ids.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ustore_insert_lookup_remove() {
        let mut store = UStore::new();
        assert!(store.insert(3, "c").is_none());
        store.insert(1, "a");
        assert_eq!(store.insert(3, "C"), Some("c"));

        assert_eq!(store.lookup(3), Some(&"C"));
        assert_eq!(store.ids(), vec![1, 3]);
        assert_eq!(store.remove(1), Some("a"));
        assert!(!store.contains(1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_ustore_foreach_stops_early() {
        let mut store = UStore::new();
        for id in 1..=5 {
            store.insert(id, id * 10);
        }
        let mut seen = Vec::new();
        store.foreach(|id, _| {
            seen.push(id);
            id < 3
        });
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn test_upool_membership() {
        let mut pool = UPool::new();
        assert!(pool.add(7));
        assert!(!pool.add(7));
        assert!(pool.add(2));
        assert_eq!(pool.list(), vec![2, 7]);
        assert!(pool.remove(7));
        assert!(!pool.contains(7));
    }
}
