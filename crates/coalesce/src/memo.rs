use std::collections::HashMap;
use std::hash::Hash;
use crate::loaded::Loaded;

/// Per-loader memo of settled keys.
///
/// Holds found values and not-found markers. Per-key errors never land here.
/// There is no eviction: a memo lives exactly as long as its loader.
#[derive(Debug)]
pub(crate) struct Memo<K, V> {
    entries: HashMap<K, Loaded<V>>,
}

impl<K, V> Memo<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    pub fn get(&self, key: &K) -> Option<Loaded<V>> {
        self.entries.get(key).cloned()
    }

    pub fn insert(&mut self, key: K, value: Loaded<V>) {
        self.entries.insert(key, value);
    }

    /// Inserts only if nothing is cached for `key` yet.
    pub fn insert_absent(&mut self, key: K, value: Loaded<V>) -> bool {
        match self.entries.entry(key) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(value);
                true
            }
        }
    }

    pub fn remove(&mut self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
