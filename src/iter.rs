//! Snapshot iteration over live entries.

use crate::map::Core;
use crate::tracked::Tracked;
use core::hash::BuildHasher;
use core::iter::FusedIterator;
use slotmap::DefaultKey;

/// Lazy, single-pass iterator over the live entries of a map.
///
/// Walks one shard at a time: the shard's slot handles are captured under a
/// short read lock, then each handle is resolved on demand. Entries whose
/// key has died, or that were removed since the capture, are skipped. No
/// key is held strongly except by the `Entry` currently being yielded.
///
/// Entries inserted concurrently may or may not be observed. Removal
/// through the iterator is not offered.
pub struct Iter<'a, T, V, S> {
    core: &'a Core<T, V, S>,
    next_shard: usize,
    current: usize,
    pending: std::vec::IntoIter<DefaultKey>,
}

impl<'a, T, V, S> Iter<'a, T, V, S>
where
    S: BuildHasher,
{
    pub(crate) fn new(core: &'a Core<T, V, S>) -> Self {
        Self {
            core,
            next_shard: 0,
            current: 0,
            pending: Vec::new().into_iter(),
        }
    }

    fn resolve(&self, handle: DefaultKey) -> Option<(Tracked<T>, V)>
    where
        V: Clone,
    {
        let _g = self.core.reentrancy().enter();
        let shard = self.core.shards()[self.current].read();
        let slot = shard.slot(handle)?;
        let key = slot.key.upgrade()?;
        Some((key, slot.value.clone()))
    }
}

impl<'a, T, V, S> Iterator for Iter<'a, T, V, S>
where
    V: Clone,
    S: BuildHasher,
{
    type Item = Entry<'a, T, V, S>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(handle) = self.pending.next() {
                if let Some((key, value)) = self.resolve(handle) {
                    return Some(Entry {
                        core: self.core,
                        key,
                        value,
                    });
                }
                continue;
            }
            let shards = self.core.shards();
            if self.next_shard >= shards.len() {
                return None;
            }
            self.current = self.next_shard;
            self.next_shard += 1;
            self.pending = shards[self.current].read().handles().into_iter();
        }
    }
}

impl<'a, T, V, S> FusedIterator for Iter<'a, T, V, S>
where
    V: Clone,
    S: BuildHasher,
{
}

/// A live entry yielded by [`Iter`]. Holds its key strongly.
pub struct Entry<'a, T, V, S> {
    core: &'a Core<T, V, S>,
    key: Tracked<T>,
    value: V,
}

impl<'a, T, V, S> Entry<'a, T, V, S>
where
    S: BuildHasher,
{
    pub fn key(&self) -> &Tracked<T> {
        &self.key
    }

    /// The value observed when this entry was yielded.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Write `value` through to the map under this entry's key and return
    /// the value it replaced. If the entry was removed since it was
    /// yielded, this installs it again.
    pub fn set_value(&mut self, value: V) -> Option<V>
    where
        V: Clone,
    {
        let prev = self.core.put(&self.key, value.clone());
        self.value = value;
        prev
    }

    pub fn into_parts(self) -> (Tracked<T>, V) {
        (self.key, self.value)
    }
}

impl<'a, T, V, S> core::fmt::Debug for Entry<'a, T, V, S>
where
    T: core::fmt::Debug,
    V: core::fmt::Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("value", &self.value)
            .finish()
    }
}
