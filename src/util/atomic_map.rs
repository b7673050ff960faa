use std::hash::Hash;
use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;

/// A copy-on-write map: readers get an immutable snapshot that they can iterate at leisure while
///  writers replace the map wholesale. This is for read-mostly data that is iterated by one task
///  and modified by another - a removal never invalidates somebody else's iteration.
///
/// Updates are serialized, so the closure passed to [AtomicMap::update] sees the effects of all
///  previous updates.
pub struct AtomicMap<K, V> {
    map: RwLock<Arc<FxHashMap<K, V>>>,
}

impl<K: Hash + Eq + Clone, V: Clone> Default for AtomicMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Clone, V: Clone> AtomicMap<K, V> {
    pub fn new() -> AtomicMap<K, V> {
        AtomicMap {
            map: RwLock::new(Arc::new(FxHashMap::default())),
        }
    }

    pub fn load(&self) -> Arc<FxHashMap<K, V>> {
        self.map.read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.load()
            .get(key)
            .cloned()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut FxHashMap<K, V>) -> R) -> R {
        let mut lock = self.map.write()
            .unwrap_or_else(|e| e.into_inner());

        let mut map = lock.as_ref().clone();
        let result = f(&mut map);
        *lock = Arc::new(map);
        result
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.update(|m| m.insert(key, value))
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.update(|m| m.remove(key))
    }

    /// removes all entries, returning the values that were present
    pub fn clear(&self) -> Vec<V> {
        self.update(|m| m.drain().map(|(_, v)| v).collect())
    }
}
