//! Shard: one lock-guarded segment of the concurrent table.
//!
//! Same structure as a handle map: a `HashTable` index of slot handles over
//! a generational `SlotMap` arena. Indexing always uses the identity hash
//! cached in each weak key, so nothing is rehashed from a possibly dead
//! referent. Generational handles let the snapshot iterator hold plain
//! handles between lock acquisitions without a stale handle ever resolving
//! to a later entry. Nothing here calls user code; values leave the shard
//! by move so callers can drop them after unlocking.

use crate::keys::{LookupKey, WeakKey};
use crate::reclaim::Notice;
use hashbrown::HashTable;
use slotmap::{DefaultKey, SlotMap};

pub(crate) struct Slot<T, V> {
    pub(crate) key: WeakKey<T>,
    pub(crate) value: V,
}

pub(crate) struct Shard<T, V> {
    index: HashTable<DefaultKey>,
    slots: SlotMap<DefaultKey, Slot<T, V>>,
}

impl<T, V> Shard<T, V> {
    pub(crate) fn new() -> Self {
        Self {
            index: HashTable::new(),
            slots: SlotMap::with_key(),
        }
    }

    /// Stored entries, including dead ones not yet expunged.
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn find(&self, probe: &LookupKey<'_, T>) -> Option<DefaultKey> {
        let slots = &self.slots;
        self.index
            .find(probe.identity_hash(), |&h| {
                slots.get(h).map_or(false, |s| s.key.matches(probe))
            })
            .copied()
    }

    pub(crate) fn get(&self, probe: &LookupKey<'_, T>) -> Option<&V> {
        let h = self.find(probe)?;
        self.slots.get(h).map(|s| &s.value)
    }

    pub(crate) fn slot(&self, handle: DefaultKey) -> Option<&Slot<T, V>> {
        self.slots.get(handle)
    }

    /// Insert or replace. `wrap` only runs when a new slot is created;
    /// returns the replaced value.
    pub(crate) fn upsert<F>(&mut self, probe: &LookupKey<'_, T>, value: V, wrap: F) -> Option<V>
    where
        F: FnOnce() -> WeakKey<T>,
    {
        if let Some(h) = self.find(probe) {
            let slot = self
                .slots
                .get_mut(h)
                .expect("indexed handle must resolve to a slot");
            return Some(core::mem::replace(&mut slot.value, value));
        }
        self.insert_new(probe.identity_hash(), Slot { key: wrap(), value });
        None
    }

    /// Insert only if no live entry matches. On a lost race the existing
    /// handle is returned together with the rejected value.
    pub(crate) fn insert_if_absent<F>(
        &mut self,
        probe: &LookupKey<'_, T>,
        value: V,
        wrap: F,
    ) -> Result<DefaultKey, (DefaultKey, V)>
    where
        F: FnOnce() -> WeakKey<T>,
    {
        if let Some(h) = self.find(probe) {
            return Err((h, value));
        }
        Ok(self.insert_new(probe.identity_hash(), Slot { key: wrap(), value }))
    }

    fn insert_new(&mut self, hash: u64, slot: Slot<T, V>) -> DefaultKey {
        let h = self.slots.insert(slot);
        let slots = &self.slots;
        self.index.insert_unique(hash, h, |&kk| {
            slots.get(kk).map_or(0, |s| s.key.identity_hash())
        });
        h
    }

    pub(crate) fn remove(&mut self, probe: &LookupKey<'_, T>) -> Option<Slot<T, V>> {
        let slots = &self.slots;
        let entry = self
            .index
            .find_entry(probe.identity_hash(), |&h| {
                slots.get(h).map_or(false, |s| s.key.matches(probe))
            })
            .ok()?;
        let (h, _) = entry.remove();
        self.slots.remove(h)
    }

    /// Remove the exact wrapper a notice names; a no-op if it is already
    /// gone. Never consults the referent.
    pub(crate) fn remove_instance(&mut self, notice: &Notice) -> Option<Slot<T, V>> {
        let slots = &self.slots;
        let entry = self
            .index
            .find_entry(notice.hash, |&h| {
                slots.get(h).map_or(false, |s| s.key.is_instance(notice))
            })
            .ok()?;
        let (h, _) = entry.remove();
        self.slots.remove(h)
    }

    /// Remove everything, handing the slots back to the caller.
    pub(crate) fn take_all(&mut self) -> Vec<Slot<T, V>> {
        self.index.clear();
        self.slots.drain().map(|(_, s)| s).collect()
    }

    /// Handles of all current slots, in arena order.
    pub(crate) fn handles(&self) -> Vec<DefaultKey> {
        self.slots.keys().collect()
    }

    #[cfg(test)]
    pub(crate) fn index_len(&self) -> usize {
        self.index.len()
    }
}
