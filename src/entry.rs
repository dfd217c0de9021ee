//! Entry: the per-key value slot shared between the read snapshot and the
//! dirty map.
//!
//! Every slot is an `ArcSwap<Slot<V>>`. State transitions are a single
//! pointer swap of the whole `Slot`, so `compare_and_swap` against the `Arc`
//! a thread observed is enough to detect races; no pointer tagging needed.
//!
//! State machine:
//!
//! ```text
//!   Present(v) --delete--> Absent --expunge (locked)--> Tombstoned
//!       ^  |                  |                             |
//!       |  +--store---------->+<------unexpunge (locked)----+
//!       +------store----------+
//! ```
//!
//! `Tombstoned` entries are never referenced by the dirty map. The
//! `*_locked` methods require the map's mutex to be held; the rest are
//! lock-free.

use arc_swap::{ArcSwap, Guard};
use core::fmt;
use core::ops::Deref;
use std::sync::Arc;

pub(crate) enum Slot<V> {
    Absent,
    Tombstoned,
    Present(V),
}

impl<V> Slot<V> {
    pub(crate) fn present(value: V) -> Arc<Self> {
        Arc::new(Slot::Present(value))
    }

    fn is_present(&self) -> bool {
        matches!(self, Slot::Present(_))
    }

    fn is_tombstoned(&self) -> bool {
        matches!(self, Slot::Tombstoned)
    }

    fn value(&self) -> Option<&V> {
        match self {
            Slot::Present(v) => Some(v),
            Slot::Absent | Slot::Tombstoned => None,
        }
    }
}

/// A read-only handle to a value observed in a `SyncHashMap`.
///
/// Cloning is a reference-count bump. The handle keeps the observed value
/// alive even if the key is overwritten or deleted afterwards.
pub struct Ref<V> {
    slot: Arc<Slot<V>>,
}

impl<V> Ref<V> {
    /// Wrap a slot that was observed as `Present`.
    pub(crate) fn new(slot: Arc<Slot<V>>) -> Self {
        debug_assert!(slot.is_present());
        Self { slot }
    }

    fn from_present(slot: Arc<Slot<V>>) -> Option<Self> {
        if slot.is_present() {
            Some(Self { slot })
        } else {
            None
        }
    }

    /// Whether two handles point at the same stored value (same store call).
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.slot, &other.slot)
    }
}

impl<V> Deref for Ref<V> {
    type Target = V;

    fn deref(&self) -> &V {
        match &*self.slot {
            Slot::Present(v) => v,
            Slot::Absent | Slot::Tombstoned => unreachable!("Ref always wraps a present slot"),
        }
    }
}

impl<V> Clone for Ref<V> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for Ref<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ref").field(&**self).finish()
    }
}

impl<V: fmt::Display> fmt::Display for Ref<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (**self).fmt(f)
    }
}

impl<V: PartialEq> PartialEq<V> for Ref<V> {
    fn eq(&self, other: &V) -> bool {
        **self == *other
    }
}

pub(crate) struct Entry<V> {
    slot: ArcSwap<Slot<V>>,
}

impl<V> Entry<V> {
    pub(crate) fn new(slot: Arc<Slot<V>>) -> Self {
        Self {
            slot: ArcSwap::new(slot),
        }
    }

    /// Attempt to replace `current` with `new`. On failure returns the value
    /// that was actually installed.
    #[inline]
    fn cas(&self, current: &Arc<Slot<V>>, new: &Arc<Slot<V>>) -> Result<(), Arc<Slot<V>>> {
        let prev = self.slot.compare_and_swap(current, Arc::clone(new));
        if Arc::ptr_eq(&*prev, current) {
            Ok(())
        } else {
            Err(Guard::into_inner(prev))
        }
    }

    pub(crate) fn load(&self) -> Option<Ref<V>> {
        let cur = self.slot.load();
        if cur.is_present() {
            Some(Ref::new(Guard::into_inner(cur)))
        } else {
            None
        }
    }

    /// Store `new` unless the entry is tombstoned. Returns false, leaving the
    /// entry untouched, when it is.
    pub(crate) fn try_store(&self, new: &Arc<Slot<V>>) -> bool {
        self.try_swap(new).is_some()
    }

    /// Like `try_store` but reports the value that was replaced.
    /// `None` means the entry is tombstoned; `Some(None)` means it was absent.
    pub(crate) fn try_swap(&self, new: &Arc<Slot<V>>) -> Option<Option<Ref<V>>> {
        let mut cur = self.slot.load_full();
        loop {
            if cur.is_tombstoned() {
                return None;
            }
            match self.cas(&cur, new) {
                Ok(()) => return Some(Ref::from_present(cur)),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Caller holds the map mutex and has already unexpunged the entry.
    pub(crate) fn store_locked(&self, new: Arc<Slot<V>>) {
        self.slot.store(new);
    }

    /// Caller holds the map mutex and has already unexpunged the entry.
    pub(crate) fn swap_locked(&self, new: Arc<Slot<V>>) -> Option<Ref<V>> {
        Ref::from_present(self.slot.swap(new))
    }

    /// Move a tombstoned entry back to `Absent`. Must be called with the map
    /// mutex held, and the entry re-inserted into the dirty map before it is
    /// released.
    pub(crate) fn unexpunge_locked(&self) -> bool {
        let cur = self.slot.load_full();
        cur.is_tombstoned() && self.cas(&cur, &Arc::new(Slot::Absent)).is_ok()
    }

    /// Returns the existing value with `true`, or installs `candidate` and
    /// returns it with `false`. `None` if the entry is tombstoned.
    pub(crate) fn try_load_or_store(&self, candidate: &Arc<Slot<V>>) -> Option<(Ref<V>, bool)> {
        let mut cur = self.slot.load_full();
        loop {
            if cur.is_tombstoned() {
                return None;
            }
            if cur.is_present() {
                return Some((Ref::new(cur), true));
            }
            match self.cas(&cur, candidate) {
                Ok(()) => return Some((Ref::new(Arc::clone(candidate)), false)),
                Err(actual) => cur = actual,
            }
        }
    }

    /// `try_load_or_store` for an entry that cannot be tombstoned because the
    /// caller holds the map mutex after unexpunging it.
    pub(crate) fn load_or_store_locked(&self, candidate: &Arc<Slot<V>>) -> (Ref<V>, bool) {
        match self.try_load_or_store(candidate) {
            Some(res) => res,
            None => {
                debug_assert!(false, "tombstoned entry reached under the map mutex");
                self.store_locked(Arc::clone(candidate));
                (Ref::new(Arc::clone(candidate)), false)
            }
        }
    }

    /// Delete the value. Returns what was removed, if anything. Idempotent for
    /// absent and tombstoned entries.
    pub(crate) fn mark_deleted(&self) -> Option<Ref<V>> {
        let mut cur = self.slot.load_full();
        if !cur.is_present() {
            return None;
        }
        let absent = Arc::new(Slot::Absent);
        loop {
            if !cur.is_present() {
                return None;
            }
            match self.cas(&cur, &absent) {
                Ok(()) => return Some(Ref::new(cur)),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Turn an `Absent` entry into `Tombstoned` while building a dirty map.
    /// Returns whether the entry ends up tombstoned and must be left out.
    pub(crate) fn try_expunge_locked(&self) -> bool {
        let mut cur = self.slot.load_full();
        if !matches!(*cur, Slot::Absent) {
            return cur.is_tombstoned();
        }
        let tombstone = Arc::new(Slot::Tombstoned);
        while matches!(*cur, Slot::Absent) {
            match self.cas(&cur, &tombstone) {
                Ok(()) => return true,
                Err(actual) => cur = actual,
            }
        }
        cur.is_tombstoned()
    }
}

impl<V: PartialEq> Entry<V> {
    /// Replace the value with `new` only while it equals `old`.
    pub(crate) fn try_compare_and_swap(&self, old: &V, new: &Arc<Slot<V>>) -> bool {
        let mut cur = self.slot.load_full();
        loop {
            if cur.value() != Some(old) {
                return false;
            }
            match self.cas(&cur, new) {
                Ok(()) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Delete the value only while it equals `old`.
    pub(crate) fn try_compare_and_delete(&self, old: &V) -> bool {
        let mut cur = self.slot.load_full();
        if cur.value() != Some(old) {
            return false;
        }
        let absent = Arc::new(Slot::Absent);
        loop {
            if cur.value() != Some(old) {
                return false;
            }
            match self.cas(&cur, &absent) {
                Ok(()) => return true,
                Err(actual) => cur = actual,
            }
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for Entry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &**self.slot.load() {
            Slot::Absent => f.write_str("Absent"),
            Slot::Tombstoned => f.write_str("Tombstoned"),
            Slot::Present(v) => f.debug_tuple("Present").field(v).finish(),
        }
    }
}

#[cfg(test)]
impl<V> Entry<V> {
    pub(crate) fn is_tombstoned(&self) -> bool {
        self.slot.load().is_tombstoned()
    }
}
