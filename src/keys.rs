//! Weak and lookup key wrappers.
//!
//! Both wrappers carry the identity hash used to pick a shard and a bucket.
//! A `WeakKey` is what the table stores; a `LookupKey` is a scratch probe
//! that borrows a live `Tracked` for the duration of one operation and is
//! never stored.
//!
//! Equality contract
//! - A weak key matches a probe iff both name the same live key. The `Weak`
//!   held by the wrapper reserves the control block's address, so address
//!   equality with a live probe implies the stored key is that same live
//!   key. A dead wrapper matches no probe.
//! - Reclamation addresses a wrapper by its stamp, never by its referent,
//!   so two dead wrappers that share a bucket are never confused.

use crate::reclaim::{Notice, ReclamationQueue};
use crate::tracked::{Anchor, Tracked};
use std::sync::{Arc, Weak};

pub(crate) struct WeakKey<T> {
    hash: u64,
    stamp: u64,
    referent: Weak<Anchor<T>>,
}

impl<T> WeakKey<T> {
    /// Wrap `key` and register the wrapper with `queue` so its notice is
    /// delivered when the key dies.
    pub(crate) fn wrap(
        key: &Tracked<T>,
        hash: u64,
        stamp: u64,
        queue: &Arc<ReclamationQueue>,
    ) -> Self {
        key.register(queue, Notice { hash, stamp });
        Self {
            hash,
            stamp,
            referent: key.downgrade(),
        }
    }

    #[inline]
    pub(crate) fn identity_hash(&self) -> u64 {
        self.hash
    }

    #[cfg(test)]
    pub(crate) fn stamp(&self) -> u64 {
        self.stamp
    }

    /// Resolve a strong handle, or `None` if the key is gone.
    pub(crate) fn upgrade(&self) -> Option<Tracked<T>> {
        self.referent.upgrade().map(Tracked::from_anchor)
    }

    pub(crate) fn is_live(&self) -> bool {
        self.referent.strong_count() > 0
    }

    #[inline]
    pub(crate) fn matches(&self, probe: &LookupKey<'_, T>) -> bool {
        match probe.key() {
            Some(k) => {
                self.hash == probe.identity_hash()
                    && Weak::as_ptr(&self.referent) == Arc::as_ptr(k.anchor())
            }
            None => false,
        }
    }

    /// True only for the exact wrapper instance a notice was issued for.
    #[inline]
    pub(crate) fn is_instance(&self, notice: &Notice) -> bool {
        self.stamp == notice.stamp
    }

    /// Withdraw the drop-time registration after explicit removal. A key
    /// that already died has nothing left to withdraw.
    pub(crate) fn release(&self, queue: &Arc<ReclamationQueue>) {
        if let Some(anchor) = self.referent.upgrade() {
            anchor.unregister(queue, self.stamp);
        }
    }
}

/// Probe for one operation. Holds the key strongly only while bound.
pub(crate) struct LookupKey<'a, T> {
    hash: u64,
    raw: Option<&'a Tracked<T>>,
}

impl<'a, T> LookupKey<'a, T> {
    pub(crate) fn probe(key: &'a Tracked<T>, hash: u64) -> Self {
        Self {
            hash,
            raw: Some(key),
        }
    }

    #[inline]
    pub(crate) fn identity_hash(&self) -> u64 {
        self.hash
    }

    #[inline]
    pub(crate) fn key(&self) -> Option<&'a Tracked<T>> {
        self.raw
    }

    /// Unbind. Idempotent; also runs on drop so every exit path unbinds.
    pub(crate) fn reset(&mut self) {
        self.raw = None;
    }
}

impl<'a, T> Drop for LookupKey<'a, T> {
    fn drop(&mut self) {
        self.reset();
    }
}
