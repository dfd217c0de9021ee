//! ReadOnly: the immutable snapshot readers consult without locking.

use crate::entry::Entry;
use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};
use hashbrown::HashMap;
use std::sync::Arc;

pub(crate) type EntryMap<K, V, S> = HashMap<K, Arc<Entry<V>>, S>;

/// A published `(mapping, amended)` pair. Never mutated after construction;
/// the map replaces it wholesale.
pub(crate) struct ReadOnly<K, V, S> {
    /// Shared so that re-publishing with `amended = true` does not copy it.
    map: Arc<EntryMap<K, V, S>>,
    /// The dirty map holds at least one key that `map` does not.
    amended: bool,
}

impl<K, V, S> ReadOnly<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub(crate) fn empty(hasher: S) -> Self {
        Self {
            map: Arc::new(HashMap::with_hasher(hasher)),
            amended: false,
        }
    }

    /// Snapshot made from a promoted dirty map.
    pub(crate) fn promoted(map: EntryMap<K, V, S>) -> Self {
        Self {
            map: Arc::new(map),
            amended: false,
        }
    }

    /// Same mapping, marked as amended by a new dirty map.
    pub(crate) fn amend(&self) -> Self {
        Self {
            map: Arc::clone(&self.map),
            amended: true,
        }
    }

    #[inline]
    pub(crate) fn get<Q>(&self, key: &Q) -> Option<&Arc<Entry<V>>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.map.get(key)
    }

    #[inline]
    pub(crate) fn amended(&self) -> bool {
        self.amended
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    pub(crate) fn iter(&self) -> hashbrown::hash_map::Iter<'_, K, Arc<Entry<V>>> {
        self.map.iter()
    }
}
