use crate::request::Params;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

/// Bounded LRU map
///
/// Insertion moves an existing key to most-recently-used; exceeding capacity
/// evicts the least-recently-used entry. Recency is kept in an intrusive
/// doubly-linked list threaded through slot indices, so get and insert are
/// O(1) beyond hashing.
pub struct LruCache<K, V> {
    map: HashMap<K, usize>,
    entries: Vec<Option<Entry<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    capacity: usize,
}

struct Entry<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        LruCache {
            map: HashMap::with_capacity(capacity),
            entries: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up a key, refreshing its recency on hit
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.detach(idx);
        self.attach_front(idx);
        self.entries[idx].as_ref().map(|e| &e.value)
    }

    /// Insert a value, evicting the least-recently-used entry on overflow
    pub fn insert(&mut self, key: K, value: V) {
        if let Some(&idx) = self.map.get(&key) {
            if let Some(entry) = self.entries[idx].as_mut() {
                entry.value = value;
            }
            self.detach(idx);
            self.attach_front(idx);
            return;
        }

        if self.map.len() >= self.capacity {
            self.evict_tail();
        }

        let entry = Entry {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.entries[idx] = Some(entry);
                idx
            }
            None => {
                self.entries.push(Some(entry));
                self.entries.len() - 1
            }
        };
        self.map.insert(key, idx);
        self.attach_front(idx);
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.entries.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    fn evict_tail(&mut self) {
        if let Some(tail) = self.tail {
            self.detach(tail);
            if let Some(entry) = self.entries[tail].take() {
                self.map.remove(&entry.key);
            }
            self.free.push(tail);
        }
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = match self.entries[idx].as_ref() {
            Some(e) => (e.prev, e.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(e) = self.entries[p].as_mut() {
                    e.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(e) = self.entries[n].as_mut() {
                    e.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(e) = self.entries[idx].as_mut() {
            e.prev = None;
            e.next = None;
        }
    }

    fn attach_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(e) = self.entries[idx].as_mut() {
            e.prev = None;
            e.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(e) = self.entries[h].as_mut() {
                e.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }
}

/// Free-list of parameter maps handed to requests during lookup
///
/// Maps come back on response termination. A map that was published and is
/// still shared (a cached route entry holds it) is frozen and skipped.
pub struct ParamsPool {
    free: Mutex<Vec<HashMap<String, String>>>,
    max_pooled: usize,
}

impl ParamsPool {
    pub fn new(max_pooled: usize) -> Self {
        ParamsPool {
            free: Mutex::new(Vec::new()),
            max_pooled,
        }
    }

    /// Take an empty map, reusing a reclaimed one when available
    pub fn take(&self) -> HashMap<String, String> {
        match self.free.lock() {
            Ok(mut free) => free.pop().unwrap_or_default(),
            Err(_) => HashMap::new(),
        }
    }

    /// Return a published map to the pool. Skips maps that are still shared.
    pub fn reclaim(&self, params: Params) {
        if let Some(mut map) = params.try_unfreeze() {
            map.clear();
            if let Ok(mut free) = self.free.lock() {
                if free.len() < self.max_pooled {
                    free.push(map);
                }
            }
        }
    }
}

impl Default for ParamsPool {
    fn default() -> Self {
        ParamsPool::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_exactly_the_least_recently_used() {
        let mut cache = LruCache::new(3);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);

        // touch "a" so "b" becomes the LRU entry
        assert_eq!(cache.get(&"a"), Some(&1));

        cache.insert("d", 4);
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&"b"));
        assert!(cache.contains(&"a"));
        assert!(cache.contains(&"c"));
        assert!(cache.contains(&"d"));
    }

    #[test]
    fn reinsert_refreshes_recency_and_value() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 10);
        cache.insert("c", 3);

        assert_eq!(cache.get(&"a"), Some(&10));
        assert!(!cache.contains(&"b"));
    }

    #[test]
    fn sequential_fill_evicts_in_insertion_order() {
        let mut cache = LruCache::new(2);
        for (i, key) in ["a", "b", "c", "d"].iter().enumerate() {
            cache.insert(*key, i);
        }
        assert!(!cache.contains(&"a"));
        assert!(!cache.contains(&"b"));
        assert!(cache.contains(&"c"));
        assert!(cache.contains(&"d"));
    }

    #[test]
    fn clear_empties_the_cache() {
        let mut cache = LruCache::new(4);
        cache.insert(1, "x");
        cache.insert(2, "y");
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get(&1), None);
        // reusable after clear
        cache.insert(3, "z");
        assert_eq!(cache.get(&3), Some(&"z"));
    }

    #[test]
    fn capacity_one_always_holds_latest() {
        let mut cache = LruCache::new(1);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert!(!cache.contains(&"a"));
        assert_eq!(cache.get(&"b"), Some(&2));
    }

    #[test]
    fn pool_reclaims_sole_owner_and_skips_shared() {
        let pool = ParamsPool::new(8);
        let mut map = pool.take();
        map.insert("id".to_string(), "1".to_string());
        let params = Params::publish(map);

        // a clone is still alive: frozen, must be skipped
        let held = params.clone();
        pool.reclaim(params);
        assert!(pool.free.lock().unwrap().is_empty());

        // sole owner: reclaimed and cleared
        pool.reclaim(held);
        let free = pool.free.lock().unwrap();
        assert_eq!(free.len(), 1);
        assert!(free[0].is_empty());
    }
}
