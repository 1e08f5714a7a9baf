//! Tracked: the strong owner of a weakly keyed value.
//!
//! A `Tracked<T>` is a cloneable handle around a shared control block. Maps
//! never hold a `Tracked` for their keys; they hold `Weak` references to the
//! control block and register a watcher on it. When the last `Tracked` clone
//! is dropped, the control block's destructor delivers every watcher's
//! notice to the owning map's reclamation queue. That drop-time push is what
//! stands in for a collector's reference queue.
//!
//! Identity
//! - A key's identity is the address of its control block. It is stable for
//!   as long as the block or any `Weak` to it exists, so a live key can never
//!   share an identity with a dead key that some map has not expunged yet.
//! - `Tracked` implements `Eq`/`Hash` by identity, never by `T`'s contents.

use crate::reclaim::{Notice, ReclamationQueue};
use core::fmt;
use core::hash::{BuildHasher, Hash, Hasher};
use core::ops::Deref;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Registration of one map's weak key against a control block.
pub(crate) struct Watcher {
    queue: Weak<ReclamationQueue>,
    notice: Notice,
}

pub(crate) struct Anchor<T> {
    value: T,
    watchers: Mutex<Vec<Watcher>>,
}

impl<T> Anchor<T> {
    /// Drop the registration for `stamp` made by the map owning `queue`.
    pub(crate) fn unregister(&self, queue: &Arc<ReclamationQueue>, stamp: u64) {
        let target = Arc::as_ptr(queue);
        self.watchers
            .lock()
            .retain(|w| !(w.notice.stamp == stamp && Weak::as_ptr(&w.queue) == target));
    }
}

impl<T> Drop for Anchor<T> {
    fn drop(&mut self) {
        // The strong count is already zero: upgrades fail from here on, so
        // every notice is delivered strictly after the key became unreachable.
        let watchers = core::mem::take(self.watchers.get_mut());
        for w in watchers {
            if let Some(queue) = w.queue.upgrade() {
                queue.push(w.notice);
            }
        }
    }
}

/// Strong, cloneable owner of a key. Entries keyed by it live exactly as
/// long as at least one clone does (or until removed explicitly).
pub struct Tracked<T> {
    anchor: Arc<Anchor<T>>,
}

impl<T> Tracked<T> {
    pub fn new(value: T) -> Self {
        Self {
            anchor: Arc::new(Anchor {
                value,
                watchers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Borrow the wrapped value.
    pub fn get(&self) -> &T {
        &self.anchor.value
    }

    /// Address-based identity of this key, shared by all clones.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.anchor) as *const () as usize
    }

    /// True if both handles refer to the same key.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.anchor, &b.anchor)
    }

    /// Number of live `Tracked` clones for this key.
    pub fn strong_count(this: &Self) -> usize {
        Arc::strong_count(&this.anchor)
    }

    pub(crate) fn from_anchor(anchor: Arc<Anchor<T>>) -> Self {
        Self { anchor }
    }

    pub(crate) fn anchor(&self) -> &Arc<Anchor<T>> {
        &self.anchor
    }

    pub(crate) fn downgrade(&self) -> Weak<Anchor<T>> {
        Arc::downgrade(&self.anchor)
    }

    /// Ask for `notice` to be pushed onto `queue` once this key dies.
    pub(crate) fn register(&self, queue: &Arc<ReclamationQueue>, notice: Notice) {
        let mut watchers = self.anchor.watchers.lock();
        // Registrations of maps that no longer exist are dead weight.
        watchers.retain(|w| w.queue.strong_count() > 0);
        watchers.push(Watcher {
            queue: Arc::downgrade(queue),
            notice,
        });
    }

    #[cfg(test)]
    pub(crate) fn watcher_count(&self) -> usize {
        self.anchor.watchers.lock().len()
    }
}

/// Hash an identity with a map's hasher. Computed once per weak key and
/// cached there; lookups recompute it from a live key.
pub(crate) fn identity_hash<S: BuildHasher>(hasher: &S, identity: usize) -> u64 {
    hasher.hash_one(identity)
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self {
            anchor: Arc::clone(&self.anchor),
        }
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.anchor.value
    }
}

impl<T> PartialEq for Tracked<T> {
    fn eq(&self, other: &Self) -> bool {
        Tracked::ptr_eq(self, other)
    }
}

impl<T> Eq for Tracked<T> {}

impl<T> Hash for Tracked<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl<T: fmt::Debug> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tracked").field(&self.anchor.value).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::RandomState;

    #[test]
    fn clones_share_identity_and_equality() {
        let a = Tracked::new(String::from("x"));
        let b = a.clone();
        let c = Tracked::new(String::from("x"));
        assert_eq!(a.identity(), b.identity());
        assert_eq!(a, b);
        // Same contents, different identity.
        assert_ne!(a, c);
        assert_eq!(Tracked::strong_count(&a), 2);
        assert_eq!(&*a, "x");
    }

    #[test]
    fn identity_hash_is_stable_per_hasher() {
        let s = RandomState::new();
        let k = Tracked::new(1u32);
        let h1 = identity_hash(&s, k.identity());
        let h2 = identity_hash(&s, k.clone().identity());
        assert_eq!(h1, h2);
    }

    #[test]
    fn last_drop_delivers_each_notice_once() {
        let q = Arc::new(ReclamationQueue::new());
        let k = Tracked::new(7u8);
        k.register(&q, Notice { hash: 1, stamp: 10 });
        k.register(&q, Notice { hash: 2, stamp: 11 });
        let k2 = k.clone();
        drop(k);
        assert!(q.try_drain().is_empty(), "no notice while a clone lives");
        drop(k2);
        let delivered = q.try_drain();
        assert_eq!(delivered.len(), 2);
        assert!(q.try_drain().is_empty());
    }

    #[test]
    fn unregister_and_dead_queue_pruning() {
        let q = Arc::new(ReclamationQueue::new());
        let k = Tracked::new(());
        k.register(&q, Notice { hash: 0, stamp: 1 });
        k.anchor().unregister(&q, 1);
        assert_eq!(k.watcher_count(), 0);

        let gone = Arc::new(ReclamationQueue::new());
        k.register(&gone, Notice { hash: 0, stamp: 2 });
        drop(gone);
        k.register(&q, Notice { hash: 0, stamp: 3 });
        assert_eq!(k.watcher_count(), 1, "watcher of a dropped queue is pruned");
        drop(k);
        assert_eq!(q.try_drain(), vec![Notice { hash: 0, stamp: 3 }]);
    }
}
