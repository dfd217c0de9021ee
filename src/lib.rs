//! sync-hashmap: a concurrent hash map for read-mostly workloads and for
//! writers that touch disjoint keys.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: keep the common path (reads, and writes to keys that are already
//!   known) free of exclusive locking, and pay for structural changes in
//!   amortized batches.
//! - Layers:
//!   - Entry<V>: a per-key slot holding `Absent`, `Tombstoned` or
//!     `Present(v)` behind an `ArcSwap`. Shared by `Arc` between the two
//!     maps below so an update through either is seen through both.
//!   - ReadOnly<K, V, S>: an immutable snapshot `(mapping, amended)`,
//!     published through one `ArcSwap` and read without locking.
//!   - SyncHashMap<K, V, S>: public API. Holds the snapshot, a
//!     mutex-guarded dirty map (a superset of the snapshot's live entries
//!     plus new keys) and a miss counter.
//!
//! Paths
//! - Lock-free: a key found in the snapshot is loaded, stored, swapped or
//!   deleted with a CAS on its entry.
//! - Locked: a key missing from an amended snapshot is looked up in the
//!   dirty map under the mutex, after re-checking the snapshot.
//! - Promotion: each locked lookup counts as a miss. Once the misses reach
//!   the dirty map's size, the dirty map becomes the new snapshot. `range`
//!   always promotes first so it iterates a single map.
//!
//! Tombstones
//! - When a dirty map is built from the snapshot, entries that are `Absent`
//!   become `Tombstoned` and are left out. A tombstoned entry is never
//!   stored to without the mutex: the writer first moves it back to
//!   `Absent` and re-inserts it into the dirty map. This keeps the dirty map
//!   a superset of every value-holding entry, so promotion never loses a
//!   write and never resurrects a deleted key.
//!
//! Constraints
//! - `Send`/`Sync` when `K`, `V` and `S` are; all methods take `&self`.
//! - Not `Clone`: one instance is shared by reference or `Arc`.
//! - No whole-map consistency. Ordering holds per key only.
//! - The mutex is never held while user callbacks in `range` run, so a
//!   visitor may call back into the same map.
//!
//! Logging
//! - TRACE `sync_hashmap`: `sync_hashmap_dirty_rebuild`, `sync_hashmap_promote`
//! - DEBUG `sync_hashmap`: `sync_hashmap_clear`

mod entry;
mod read_only;
mod sync_hash_map;

// Public surface
pub use entry::Ref;
pub use sync_hash_map::SyncHashMap;
