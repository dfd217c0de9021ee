//! SyncHashMap: read snapshot plus mutex-guarded dirty map.
//!
//! Readers and writers of keys already present in the snapshot stay on the
//! lock-free path. The mutex is taken only for keys the snapshot does not
//! know about, and every such miss pays toward promoting the dirty map into
//! a fresh snapshot.

use crate::entry::{Entry, Ref, Slot};
use crate::read_only::{EntryMap, ReadOnly};
use arc_swap::ArcSwap;
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::collections::hash_map::RandomState;
use std::sync::Arc;
use tracing::{debug, trace};

/// State guarded by the map mutex.
struct Dirty<K, V, S> {
    /// Superset of the snapshot's non-tombstoned entries plus keys written
    /// since the last promotion. `None` right after a promotion.
    map: Option<EntryMap<K, V, S>>,
    /// Loads that had to consult `map` since the last promotion.
    misses: usize,
    hasher: S,
    capacity: usize,
}

impl<K, V, S> Dirty<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn get<Q>(&self, key: &Q) -> Option<&Arc<Entry<V>>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.map.as_ref()?.get(key)
    }

    fn len(&self) -> usize {
        self.map.as_ref().map_or(0, HashMap::len)
    }
}

impl<K, V, S> Dirty<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Clone,
{
    fn insert(&mut self, key: K, entry: Arc<Entry<V>>) {
        debug_assert!(self.map.is_some(), "dirty map must exist before insert");
        let (hasher, capacity) = (&self.hasher, self.capacity);
        self.map
            .get_or_insert_with(|| HashMap::with_capacity_and_hasher(capacity, hasher.clone()))
            .insert(key, entry);
    }

    fn remove<Q>(&mut self, key: &Q) -> Option<Arc<Entry<V>>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.map.as_mut()?.remove(key)
    }
}

/// A concurrent hash map for read-mostly workloads and writers of disjoint
/// keys.
///
/// All operations take `&self`; share the map by reference or through an
/// `Arc`. Values come back as [`Ref`] handles.
///
/// There is no whole-map consistency: each key is linearizable on its own,
/// and `range` sees a fixed key set with values that may change while it
/// runs.
pub struct SyncHashMap<K, V, S = RandomState> {
    read: ArcSwap<ReadOnly<K, V, S>>,
    dirty: Mutex<Dirty<K, V, S>>,
}

impl<K, V> SyncHashMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }

    /// Create a map whose first dirty map is sized for `capacity` keys.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, Default::default())
    }
}

impl<K, V> Default for SyncHashMap<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> SyncHashMap<K, V, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_capacity_and_hasher(0, hasher)
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            read: ArcSwap::from_pointee(ReadOnly::empty(hasher.clone())),
            dirty: Mutex::new(Dirty {
                map: None,
                misses: 0,
                hasher,
                capacity,
            }),
        }
    }

    /// Returns the value stored for `key`, if any.
    pub fn load<Q>(&self, key: &Q) -> Option<Ref<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        {
            let read = self.read.load();
            if let Some(e) = read.get(key) {
                return e.load();
            }
            if !read.amended() {
                return None;
            }
        }

        let entry = {
            let mut dirty = self.dirty.lock();
            let read = self.read.load_full();
            match read.get(key) {
                Some(e) => Some(Arc::clone(e)),
                None if read.amended() => {
                    let e = dirty.get(key).cloned();
                    self.miss_locked(&mut dirty);
                    e
                }
                None => None,
            }
        };
        entry?.load()
    }

    /// Sets the value for `key`.
    pub fn store(&self, key: K, value: V) {
        let slot = Slot::present(value);
        if let Some(e) = self.read.load().get(&key) {
            if e.try_store(&slot) {
                return;
            }
        }

        let mut dirty = self.dirty.lock();
        let read = self.read.load_full();
        if let Some(e) = read.get(&key) {
            if e.unexpunge_locked() {
                dirty.insert(key, Arc::clone(e));
            }
            e.store_locked(slot);
        } else if let Some(e) = dirty.get(&key) {
            e.store_locked(slot);
        } else {
            self.insert_new_locked(&mut dirty, &read, key, slot);
        }
    }

    /// Sets the value for `key` and returns the value it replaced.
    pub fn swap(&self, key: K, value: V) -> Option<Ref<V>> {
        let slot = Slot::present(value);
        if let Some(e) = self.read.load().get(&key) {
            if let Some(previous) = e.try_swap(&slot) {
                return previous;
            }
        }

        let mut dirty = self.dirty.lock();
        let read = self.read.load_full();
        if let Some(e) = read.get(&key) {
            if e.unexpunge_locked() {
                dirty.insert(key, Arc::clone(e));
            }
            e.swap_locked(slot)
        } else if let Some(e) = dirty.get(&key) {
            e.swap_locked(slot)
        } else {
            self.insert_new_locked(&mut dirty, &read, key, slot);
            None
        }
    }

    /// Returns the existing value for `key` with `true`, or stores `value`
    /// and returns it with `false`.
    pub fn load_or_store(&self, key: K, value: V) -> (Ref<V>, bool) {
        let slot = Slot::present(value);
        if let Some(e) = self.read.load().get(&key) {
            if let Some(res) = e.try_load_or_store(&slot) {
                return res;
            }
        }

        let mut dirty = self.dirty.lock();
        let read = self.read.load_full();
        if let Some(e) = read.get(&key) {
            if e.unexpunge_locked() {
                dirty.insert(key, Arc::clone(e));
            }
            e.load_or_store_locked(&slot)
        } else if let Some(e) = dirty.get(&key).cloned() {
            let res = e.load_or_store_locked(&slot);
            self.miss_locked(&mut dirty);
            res
        } else {
            let stored = Ref::new(Arc::clone(&slot));
            self.insert_new_locked(&mut dirty, &read, key, slot);
            (stored, false)
        }
    }

    /// Removes `key` and returns the value it held.
    pub fn load_and_delete<Q>(&self, key: &Q) -> Option<Ref<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let entry = {
            let read = self.read.load();
            match read.get(key) {
                Some(e) => Some(Arc::clone(e)),
                None if !read.amended() => return None,
                None => None,
            }
        };

        let entry = match entry {
            Some(e) => e,
            None => {
                let mut dirty = self.dirty.lock();
                let read = self.read.load_full();
                match read.get(key) {
                    Some(e) => Arc::clone(e),
                    // Never published in a snapshot: drop it from the dirty
                    // map outright rather than leaving an absent entry behind.
                    None if read.amended() => dirty.remove(key)?,
                    None => return None,
                }
            }
        };
        entry.mark_deleted()
    }

    /// Removes `key`.
    pub fn delete<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.load_and_delete(key);
    }

    /// Calls `f` for each key and value until it returns `false`.
    ///
    /// The set of keys visited is fixed when the call starts; no key is
    /// visited twice. Values reflect whatever state each key is in when it is
    /// reached. `f` may call back into the map.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut read = self.read.load_full();
        if read.amended() {
            let mut dirty = self.dirty.lock();
            read = self.read.load_full();
            if read.amended() {
                read = self.promote_locked(&mut dirty, "range");
            }
        }

        for (k, e) in read.iter() {
            let Some(v) = e.load() else {
                continue;
            };
            if !f(k, &*v) {
                break;
            }
        }
    }

    /// Drops every key.
    pub fn clear(&self) {
        {
            let read = self.read.load();
            if read.len() == 0 && !read.amended() {
                return;
            }
        }

        let mut dirty = self.dirty.lock();
        let read = self.read.load_full();
        if read.len() > 0 || read.amended() {
            self.read.store(Arc::new(ReadOnly::empty(dirty.hasher.clone())));
        }
        dirty.map = None;
        dirty.misses = 0;
        debug!(target: "sync_hashmap", "sync_hashmap_clear");
    }

    /// Wholly new key: make sure the dirty map exists, then insert.
    fn insert_new_locked(
        &self,
        dirty: &mut Dirty<K, V, S>,
        read: &ReadOnly<K, V, S>,
        key: K,
        slot: Arc<Slot<V>>,
    ) {
        if !read.amended() {
            self.build_dirty_locked(dirty, read);
            self.read.store(Arc::new(read.amend()));
        }
        dirty.insert(key, Arc::new(Entry::new(slot)));
    }

    /// Copy every live snapshot entry into a new dirty map, tombstoning the
    /// absent ones so they can be told apart from keys that are merely
    /// missing from the dirty map.
    fn build_dirty_locked(&self, dirty: &mut Dirty<K, V, S>, read: &ReadOnly<K, V, S>) {
        if dirty.map.is_some() {
            return;
        }
        let mut map =
            HashMap::with_capacity_and_hasher(read.len().max(dirty.capacity), dirty.hasher.clone());
        let mut expunged = 0usize;
        for (k, e) in read.iter() {
            if e.try_expunge_locked() {
                expunged += 1;
            } else {
                map.insert(k.clone(), Arc::clone(e));
            }
        }
        trace!(
            target: "sync_hashmap",
            copied = map.len(),
            expunged,
            "sync_hashmap_dirty_rebuild"
        );
        dirty.map = Some(map);
    }

    fn miss_locked(&self, dirty: &mut Dirty<K, V, S>) {
        dirty.misses += 1;
        if dirty.misses < dirty.len() {
            return;
        }
        self.promote_locked(dirty, "misses");
    }

    /// Publish the dirty map as the new snapshot.
    fn promote_locked(
        &self,
        dirty: &mut Dirty<K, V, S>,
        reason: &'static str,
    ) -> Arc<ReadOnly<K, V, S>> {
        let map = dirty
            .map
            .take()
            .unwrap_or_else(|| HashMap::with_hasher(dirty.hasher.clone()));
        trace!(
            target: "sync_hashmap",
            entries = map.len(),
            misses = dirty.misses,
            reason,
            "sync_hashmap_promote"
        );
        let read = Arc::new(ReadOnly::promoted(map));
        self.read.store(Arc::clone(&read));
        dirty.misses = 0;
        read
    }
}

impl<K, V, S> SyncHashMap<K, V, S>
where
    K: Eq + Hash + Clone,
    V: PartialEq,
    S: BuildHasher + Clone,
{
    /// Replaces the value for `key` with `new` if it currently equals `old`.
    /// Never inserts a key.
    pub fn compare_and_swap<Q>(&self, key: &Q, old: &V, new: V) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let slot = Slot::present(new);
        {
            let read = self.read.load();
            if let Some(e) = read.get(key) {
                return e.try_compare_and_swap(old, &slot);
            }
            if !read.amended() {
                return false;
            }
        }

        let mut dirty = self.dirty.lock();
        let read = self.read.load_full();
        if let Some(e) = read.get(key) {
            e.try_compare_and_swap(old, &slot)
        } else if let Some(e) = dirty.get(key).cloned() {
            let swapped = e.try_compare_and_swap(old, &slot);
            self.miss_locked(&mut dirty);
            swapped
        } else {
            false
        }
    }

    /// Deletes `key` if its value currently equals `old`.
    pub fn compare_and_delete<Q>(&self, key: &Q, old: &V) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let entry = {
            let read = self.read.load();
            match read.get(key) {
                Some(e) => Some(Arc::clone(e)),
                None if !read.amended() => return false,
                None => None,
            }
        };

        let entry = match entry {
            Some(e) => e,
            None => {
                let mut dirty = self.dirty.lock();
                let read = self.read.load_full();
                match read.get(key) {
                    Some(e) => Arc::clone(e),
                    None if read.amended() => {
                        let e = dirty.get(key).cloned();
                        self.miss_locked(&mut dirty);
                        match e {
                            Some(e) => e,
                            None => return false,
                        }
                    }
                    None => return false,
                }
            }
        };
        entry.try_compare_and_delete(old)
    }
}

impl<K, V, S> FromIterator<(K, V)> for SyncHashMap<K, V, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let map = Self::with_capacity_and_hasher(iter.size_hint().0, S::default());
        for (k, v) in iter {
            map.store(k, v);
        }
        map
    }
}

impl<K, V, S> Extend<(K, V)> for SyncHashMap<K, V, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.store(k, v);
        }
    }
}

impl<K, V, S> fmt::Debug for SyncHashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let read = self.read.load();
        f.debug_struct("SyncHashMap")
            .field("read_len", &read.len())
            .field("amended", &read.amended())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
impl<K, V, S> SyncHashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn read_contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.read.load().get(key).is_some()
    }

    fn read_amended(&self) -> bool {
        self.read.load().amended()
    }

    fn dirty_len(&self) -> Option<usize> {
        self.dirty.lock().map.as_ref().map(HashMap::len)
    }

    fn dirty_contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.dirty.lock().get(key).is_some()
    }

    fn misses(&self) -> usize {
        self.dirty.lock().misses
    }

    fn read_is_tombstoned<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.read
            .load()
            .get(key)
            .map(|e| e.is_tombstoned())
            .unwrap_or(false)
    }
}
