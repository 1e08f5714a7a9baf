//! weak-concurrent-map: a thread-safe map whose keys are held weakly, so
//! entries disappear once nothing else keeps their key alive.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: attach metadata to objects for exactly as long as those objects
//!   are otherwise reachable, from many threads, without a global lock and
//!   without the attachment keeping its object alive.
//! - Layers:
//!   - Tracked<T>: the strong owner of a key. Its control block keeps a
//!     list of watchers and, when the last owner drops, pushes each
//!     watcher's notice onto the registering map's reclamation queue.
//!   - WeakKey / LookupKey: the stored wrapper (weak, stamped, with a cached
//!     identity hash) and the stack-local probe used to search for it.
//!   - Shard<T, V>: one segment of the table; a hashbrown `HashTable`
//!     index over a generational slotmap arena.
//!   - WeakConcurrentMap<T, V, S>: public API over an array of
//!     `RwLock<Shard>` plus the reclamation queue and strategy.
//!
//! Identity and hashing
//! - Keys compare by identity (control-block address), never by contents.
//!   The identity hash is computed with the map's hasher when a key is
//!   wrapped and cached in the wrapper; indexing only ever uses that
//!   cached hash, so a dead referent is never consulted.
//! - A stored wrapper holds a `Weak`, which keeps the control block's
//!   allocation reserved. A live key therefore cannot share an address
//!   with a dead wrapper still in the table, and a dead wrapper matches no
//!   lookup.
//!
//! Reclamation
//! - Every wrapper carries a stamp unique within its map. Reclamation
//!   removes by (hash, stamp), i.e. the exact stored instance, so it can
//!   never remove a different entry that happens to share a bucket.
//!   Delivering the same notice twice, or after an explicit `remove`, is a
//!   no-op.
//! - Strategies (`Reclamation`): a dedicated cleaner thread blocking on the
//!   queue; inline draining at the start of every public operation; or
//!   manual draining through `expunge_stale_entries` / `run`.
//!
//! Concurrency
//! - Operations on one key serialize on that key's shard lock. No user code
//!   runs under a shard lock except `V::clone`; values leaving the table
//!   are dropped after the lock is released. A debug-only guard panics if
//!   a thread re-enters a map while holding one of its shard locks.
//!
//! Notes and non-goals
//! - No ordering, no capacity bound, no eviction: only key liveness
//!   removes entries (besides explicit `remove`/`clear`).
//! - `approximate_size` may overcount dead entries awaiting reclamation; it
//!   never undercounts live ones.
//! - Keys and values cannot be absent by construction, so operations have
//!   no invalid-argument failure.

mod detached;
mod error;
mod iter;
mod keys;
mod map;
mod reclaim;
mod reentrancy;
mod set;
mod shard;
mod shard_proptest;
mod tracked;

// Public surface
pub use detached::{current_thread_key, DetachedLocal};
pub use error::{Error, Result};
pub use iter::{Entry, Iter};
pub use map::{Builder, WeakConcurrentMap};
pub use reclaim::{Cleaner, Reclamation};
pub use set::WeakConcurrentSet;
pub use tracked::Tracked;
