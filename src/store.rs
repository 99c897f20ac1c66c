//! Thread-safe associative stores with the same open→closed lifecycle as
//! the queue.
//!
//! Two variants are provided: [`SyncMap`] binds each key to a single value
//! (last insert wins) and [`SyncMultiMap`] groups every inserted value under
//! its key. Both serve as pipeline-terminal signal containers: they are
//! unbounded, apply no backpressure, and downstream barrier stages block on
//! [`wait`](SyncMap::wait) until the producing stage closes them.

use std::collections::BTreeMap;
use std::mem;

use parking_lot::{Condvar, Mutex};

use crate::container::{Container, Drain};

// -----------------------------------------------------------------------------
// Unique-key store

struct MapInner<K, V> {
    map: BTreeMap<K, V>,
    closed: bool,
}

/// A thread-safe unique-key store. Every operation takes the store's single
/// lock; `for_each` runs its callback under that lock, so the callback must
/// not re-enter the store.
pub struct SyncMap<K, V> {
    inner: Mutex<MapInner<K, V>>,
    state_changed: Condvar,
}

impl<K: Ord, V> SyncMap<K, V> {
    /// Creates an open, empty store.
    pub fn new() -> SyncMap<K, V> {
        SyncMap {
            inner: Mutex::new(MapInner {
                map: BTreeMap::new(),
                closed: false,
            }),
            state_changed: Condvar::new(),
        }
    }

    /// Binds `key` to `value`. Re-inserting a key replaces its value.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        inner.map.insert(key, value);
    }

    /// Removes `key`, reporting whether it was present.
    pub fn remove(&self, key: &K) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            inner.map.remove(key).is_some()
        };
        if removed {
            self.state_changed.notify_all();
        }
        removed
    }

    /// Returns a clone of the value bound to `key`, if any.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.inner.lock().map.get(key).cloned()
    }

    /// Reports whether `key` is present.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().map.contains_key(key)
    }

    /// Removes every binding.
    pub fn clear(&self) {
        {
            let mut inner = self.inner.lock();
            inner.map.clear();
        }
        self.state_changed.notify_all();
    }

    /// The number of bindings, reported under the store's lock.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Returns `true` when the store holds no bindings.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }

    /// Snapshot iteration under the store's lock, in key order. `f` must not
    /// re-enter the store.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        let inner = self.inner.lock();
        for (key, value) in &inner.map {
            f(key, value);
        }
    }

    /// Transitions the store to closed and wakes every waiter. Idempotent.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
        }
        self.state_changed.notify_all();
    }

    /// Blocks until the store is closed.
    pub fn wait(&self) {
        let mut inner = self.inner.lock();
        while !inner.closed {
            self.state_changed.wait(&mut inner);
        }
    }

    /// Blocks until the store is closed and emptied.
    pub fn wait_for_empty(&self) {
        let mut inner = self.inner.lock();
        while !inner.closed || !inner.map.is_empty() {
            self.state_changed.wait(&mut inner);
        }
    }

    /// Returns `true` while the store is open, or closed but not yet
    /// drained.
    pub fn can_receive(&self) -> bool {
        let inner = self.inner.lock();
        !inner.closed || !inner.map.is_empty()
    }

    /// Returns `true` once the store has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl<K: Ord, V> Default for SyncMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Container for SyncMap<K, V>
where
    K: Ord + Send + 'static,
    V: Send + 'static,
{
    fn close(&self) {
        SyncMap::close(self);
    }

    fn wait(&self) {
        SyncMap::wait(self);
    }

    fn wait_for_empty(&self) {
        SyncMap::wait_for_empty(self);
    }

    fn can_receive(&self) -> bool {
        SyncMap::can_receive(self)
    }

    fn len(&self) -> usize {
        SyncMap::len(self)
    }
}

impl<K, V> Drain for SyncMap<K, V>
where
    K: Ord + Send + 'static,
    V: Send + 'static,
{
    type Item = (K, V);

    fn drain_each(&self, f: &mut dyn FnMut((K, V))) {
        let map = {
            let mut inner = self.inner.lock();
            mem::take(&mut inner.map)
        };
        self.state_changed.notify_all();
        for entry in map {
            f(entry);
        }
    }
}

// -----------------------------------------------------------------------------
// Multi-key store

struct MultiMapInner<K, V> {
    groups: BTreeMap<K, Vec<V>>,
    /// Total value count across all groups; kept so `len` stays O(1).
    values: usize,
    closed: bool,
}

/// A thread-safe multi-key store: repeated inserts under one key accumulate
/// into a batch. [`aggregate`](SyncMultiMap::aggregate) hands each key's full
/// batch to a callback exactly once, which is the mechanism behind the
/// partition stage.
pub struct SyncMultiMap<K, V> {
    inner: Mutex<MultiMapInner<K, V>>,
    state_changed: Condvar,
}

impl<K: Ord, V> SyncMultiMap<K, V> {
    /// Creates an open, empty store.
    pub fn new() -> SyncMultiMap<K, V> {
        SyncMultiMap {
            inner: Mutex::new(MultiMapInner {
                groups: BTreeMap::new(),
                values: 0,
                closed: false,
            }),
            state_changed: Condvar::new(),
        }
    }

    /// Appends `value` to the batch held under `key`.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        inner.groups.entry(key).or_default().push(value);
        inner.values += 1;
    }

    /// Removes `key` and its whole batch, reporting whether it was present.
    pub fn remove(&self, key: &K) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            match inner.groups.remove(key) {
                Some(batch) => {
                    inner.values -= batch.len();
                    true
                }
                None => false,
            }
        };
        if removed {
            self.state_changed.notify_all();
        }
        removed
    }

    /// Returns a clone of the batch held under `key`, if any.
    pub fn get(&self, key: &K) -> Option<Vec<V>>
    where
        V: Clone,
    {
        self.inner.lock().groups.get(key).cloned()
    }

    /// Reports whether `key` holds at least one value.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().groups.contains_key(key)
    }

    /// Removes every group.
    pub fn clear(&self) {
        {
            let mut inner = self.inner.lock();
            inner.groups.clear();
            inner.values = 0;
        }
        self.state_changed.notify_all();
    }

    /// The total number of stored values across all keys, reported under the
    /// store's lock.
    pub fn len(&self) -> usize {
        self.inner.lock().values
    }

    /// Returns `true` when no values are stored.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().values == 0
    }

    /// The number of distinct keys.
    pub fn key_count(&self) -> usize {
        self.inner.lock().groups.len()
    }

    /// Snapshot iteration under the store's lock: `f` sees each value with
    /// its key, in key order. `f` must not re-enter the store.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        let inner = self.inner.lock();
        for (key, batch) in &inner.groups {
            for value in batch {
                f(key, value);
            }
        }
    }

    /// Takes the entire grouped contents out of the store and invokes `f`
    /// once per key with the key's full value batch, in key order.
    ///
    /// The groups are detached under the lock but `f` runs outside it, so
    /// the callback may re-enter the store or dispatch work onto a pool.
    pub fn aggregate<F>(&self, mut f: F)
    where
        F: FnMut(K, Vec<V>),
    {
        let groups = {
            let mut inner = self.inner.lock();
            inner.values = 0;
            mem::take(&mut inner.groups)
        };
        self.state_changed.notify_all();
        for (key, batch) in groups {
            f(key, batch);
        }
    }

    /// Transitions the store to closed and wakes every waiter. Idempotent.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
        }
        self.state_changed.notify_all();
    }

    /// Blocks until the store is closed.
    pub fn wait(&self) {
        let mut inner = self.inner.lock();
        while !inner.closed {
            self.state_changed.wait(&mut inner);
        }
    }

    /// Blocks until the store is closed and emptied.
    pub fn wait_for_empty(&self) {
        let mut inner = self.inner.lock();
        while !inner.closed || inner.values > 0 {
            self.state_changed.wait(&mut inner);
        }
    }

    /// Returns `true` while the store is open, or closed but not yet
    /// drained.
    pub fn can_receive(&self) -> bool {
        let inner = self.inner.lock();
        !inner.closed || inner.values > 0
    }

    /// Returns `true` once the store has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl<K: Ord, V> Default for SyncMultiMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Container for SyncMultiMap<K, V>
where
    K: Ord + Send + 'static,
    V: Send + 'static,
{
    fn close(&self) {
        SyncMultiMap::close(self);
    }

    fn wait(&self) {
        SyncMultiMap::wait(self);
    }

    fn wait_for_empty(&self) {
        SyncMultiMap::wait_for_empty(self);
    }

    fn can_receive(&self) -> bool {
        SyncMultiMap::can_receive(self)
    }

    fn len(&self) -> usize {
        SyncMultiMap::len(self)
    }
}

impl<K, V> Drain for SyncMultiMap<K, V>
where
    K: Ord + Clone + Send + 'static,
    V: Send + 'static,
{
    type Item = (K, V);

    fn drain_each(&self, f: &mut dyn FnMut((K, V))) {
        self.aggregate(|key, batch| {
            for value in batch {
                f((key.clone(), value));
            }
        });
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_insert_get_remove() {
        let map = SyncMap::new();
        map.insert(1, 1);
        assert_eq!(map.get(&1), Some(1));
        assert!(map.remove(&1));
        assert!(!map.remove(&1));
        assert!(!map.contains(&1));
        assert_eq!(map.get(&1), None);
        map.clear();
    }

    #[test]
    fn map_insert_replaces() {
        let map = SyncMap::new();
        map.insert("k", 1);
        map.insert("k", 2);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&"k"), Some(2));
    }

    #[test]
    fn multi_map_groups_values() {
        let map = SyncMultiMap::new();
        map.insert("a", 1);
        map.insert("a", 2);
        map.insert("b", 3);
        assert_eq!(map.len(), 3);
        assert_eq!(map.key_count(), 2);
        assert_eq!(map.get(&"a"), Some(vec![1, 2]));
        assert!(map.remove(&"a"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn aggregate_hands_each_key_once() {
        let map = SyncMultiMap::new();
        for i in 0..10 {
            map.insert(i % 5, i);
        }
        let mut calls = 0;
        let mut total = 0;
        map.aggregate(|_, batch| {
            calls += 1;
            total += batch.len();
        });
        assert_eq!(calls, 5);
        assert_eq!(total, 10);
        assert!(map.is_empty());
    }

    #[test]
    fn close_is_idempotent_and_observable() {
        let map: SyncMap<i32, i32> = SyncMap::new();
        assert!(map.can_receive());
        map.close();
        map.close();
        assert!(map.is_closed());
        assert!(!map.can_receive());
        map.wait();
    }
}
