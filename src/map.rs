//! WeakConcurrentMap: public map over sharded, weakly keyed storage.

use crate::error::Result;
use crate::iter::Iter;
use crate::keys::{LookupKey, WeakKey};
use crate::reclaim::{Cleaner, Notice, Reclamation, ReclamationQueue};
use crate::reentrancy::DebugReentrancy;
use crate::shard::{Shard, Slot};
use crate::tracked::{identity_hash, Tracked};
use core::hash::BuildHasher;
use parking_lot::RwLock;
use std::collections::hash_map::RandomState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type DefaultFn<T, V> = Box<dyn Fn(&T) -> Option<V> + Send + Sync>;

/// State shared between the map handle and its cleaner thread.
pub(crate) struct Core<T, V, S> {
    hasher: S,
    shards: Box<[RwLock<Shard<T, V>>]>,
    queue: Arc<ReclamationQueue>,
    stamps: AtomicU64,
    default_value: Option<DefaultFn<T, V>>,
    reentrancy: DebugReentrancy,
}

impl<T, V, S> Core<T, V, S>
where
    S: BuildHasher,
{
    #[inline]
    fn probe<'a>(&self, key: &'a Tracked<T>) -> LookupKey<'a, T> {
        LookupKey::probe(key, identity_hash(&self.hasher, key.identity()))
    }

    #[inline]
    fn shard_index(&self, hash: u64) -> usize {
        // The shard count is a power of two. High bits pick the shard; the
        // low bits stay for bucket selection inside it.
        ((hash >> 32) as usize) & (self.shards.len() - 1)
    }

    #[inline]
    pub(crate) fn shard(&self, hash: u64) -> &RwLock<Shard<T, V>> {
        &self.shards[self.shard_index(hash)]
    }

    pub(crate) fn shards(&self) -> &[RwLock<Shard<T, V>>] {
        &self.shards
    }

    pub(crate) fn reentrancy(&self) -> &DebugReentrancy {
        &self.reentrancy
    }

    fn wrap(&self, key: &Tracked<T>, hash: u64) -> WeakKey<T> {
        let stamp = self.stamps.fetch_add(1, Ordering::Relaxed);
        WeakKey::wrap(key, hash, stamp, &self.queue)
    }

    fn contains_key(&self, key: &Tracked<T>) -> bool {
        let probe = self.probe(key);
        let _g = self.reentrancy.enter();
        let shard = self.shard(probe.identity_hash()).read();
        shard.find(&probe).is_some()
    }

    pub(crate) fn put(&self, key: &Tracked<T>, value: V) -> Option<V> {
        let probe = self.probe(key);
        let hash = probe.identity_hash();
        let _g = self.reentrancy.enter();
        let mut shard = self.shard(hash).write();
        shard.upsert(&probe, value, || self.wrap(key, hash))
    }

    /// Atomic insert-if-absent against the owning shard. Returns the
    /// winner's value when an entry is already present.
    fn install(&self, probe: &LookupKey<'_, T>, key: &Tracked<T>, value: V) -> Option<V>
    where
        V: Clone,
    {
        let hash = probe.identity_hash();
        let (winner, _rejected) = {
            let _g = self.reentrancy.enter();
            let mut shard = self.shard(hash).write();
            match shard.insert_if_absent(probe, value, || self.wrap(key, hash)) {
                Ok(_) => return None,
                Err((handle, rejected)) => {
                    let slot = shard
                        .slot(handle)
                        .expect("winning handle must resolve under the same lock");
                    (slot.value.clone(), rejected)
                }
            }
        };
        // The rejected value drops here, after the lock is released.
        Some(winner)
    }

    fn remove(&self, key: &Tracked<T>) -> Option<V> {
        let probe = self.probe(key);
        let slot = {
            let _g = self.reentrancy.enter();
            let mut shard = self.shard(probe.identity_hash()).write();
            shard.remove(&probe)
        }?;
        slot.key.release(&self.queue);
        Some(slot.value)
    }

    fn clear(&self) {
        for lock in self.shards.iter() {
            let taken = {
                let _g = self.reentrancy.enter();
                lock.write().take_all()
            };
            for Slot { key, value } in taken {
                key.release(&self.queue);
                drop(value);
            }
        }
    }

    fn approximate_size(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    fn remove_notices(&self, notices: Vec<Notice>) -> usize {
        let mut removed = 0;
        for notice in notices {
            let slot = {
                let _g = self.reentrancy.enter();
                self.shard(notice.hash).write().remove_instance(&notice)
            };
            if let Some(slot) = slot {
                debug_assert!(!slot.key.is_live());
                removed += 1;
                drop(slot);
            }
        }
        removed
    }

    /// Non-blocking drain of everything currently queued.
    fn expunge(&self) -> usize {
        let notices = self.queue.try_drain();
        if notices.is_empty() {
            return 0;
        }
        let removed = self.remove_notices(notices);
        log::trace!("expunged {removed} stale entries");
        removed
    }

    /// Blocking drain loop; returns once cleaning is stopped.
    fn run(&self) {
        while let Ok(notices) = self.queue.recv_blocking() {
            let removed = self.remove_notices(notices);
            log::trace!("cleaner removed {removed} stale entries");
        }
        log::debug!("cleaner loop exiting");
    }
}

/// A concurrent map whose keys are held weakly.
///
/// Keys are `Tracked<T>` handles compared by identity. The map never keeps
/// a key alive: once the last `Tracked` clone is dropped, its entry becomes
/// unreachable through lookups and is removed by the configured
/// [`Reclamation`] strategy. Values are returned by clone; wrap heavy values
/// in `Arc`.
pub struct WeakConcurrentMap<T, V, S = RandomState> {
    core: Arc<Core<T, V, S>>,
    reclamation: Reclamation,
    cleaner: Option<Cleaner>,
}

impl<T, V> WeakConcurrentMap<T, V>
where
    T: Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a map with the given strategy and default settings.
    ///
    /// Fails only if `Reclamation::Thread` cannot spawn its worker.
    pub fn new(reclamation: Reclamation) -> Result<Self> {
        Builder::new().reclamation(reclamation).build()
    }

    pub fn builder() -> Builder<T, V> {
        Builder::new()
    }
}

impl<T, V> Default for WeakConcurrentMap<T, V> {
    /// An inline-reclaiming map; never spawns a thread.
    fn default() -> Self {
        Builder::new().reclamation(Reclamation::Inline).assemble()
    }
}

impl<T, V, S> WeakConcurrentMap<T, V, S>
where
    S: BuildHasher,
{
    #[inline]
    fn maintain(&self) {
        if self.reclamation == Reclamation::Inline {
            self.core.expunge();
        }
    }

    pub fn reclamation(&self) -> Reclamation {
        self.reclamation
    }

    /// The dedicated cleaner, if this map uses `Reclamation::Thread`.
    pub fn cleaner(&self) -> Option<&Cleaner> {
        self.cleaner.as_ref()
    }

    /// Current value for `key`. If absent and a default-value hook is set,
    /// computes a default and installs it unless another caller wins the
    /// race, in which case the winner's value is returned.
    pub fn get(&self, key: &Tracked<T>) -> Option<V>
    where
        V: Clone,
    {
        self.maintain();
        let probe = self.core.probe(key);
        if let Some(v) = self.lookup(&probe) {
            return Some(v);
        }
        let hook = self.core.default_value.as_ref()?;
        let computed = hook(key.get())?;
        let mine = computed.clone();
        match self.core.install(&probe, key, computed) {
            None => Some(mine),
            Some(winner) => Some(winner),
        }
    }

    fn lookup(&self, probe: &LookupKey<'_, T>) -> Option<V>
    where
        V: Clone,
    {
        let _g = self.core.reentrancy.enter();
        let shard = self.core.shard(probe.identity_hash()).read();
        shard.get(probe).cloned()
    }

    /// Current value for `key`; never computes a default.
    pub fn get_if_present(&self, key: &Tracked<T>) -> Option<V>
    where
        V: Clone,
    {
        self.maintain();
        self.lookup(&self.core.probe(key))
    }

    pub fn contains_key(&self, key: &Tracked<T>) -> bool {
        self.maintain();
        self.core.contains_key(key)
    }

    /// Insert or replace; returns the previous value.
    pub fn put(&self, key: &Tracked<T>, value: V) -> Option<V> {
        self.maintain();
        self.core.put(key, value)
    }

    /// Insert unless present. Returns the existing value when one was
    /// already associated (nothing is inserted), `None` when `value` was
    /// installed.
    pub fn put_if_absent(&self, key: &Tracked<T>, value: V) -> Option<V>
    where
        V: Clone,
    {
        self.maintain();
        let probe = self.core.probe(key);
        if let Some(existing) = self.lookup(&probe) {
            return Some(existing);
        }
        self.core.install(&probe, key, value)
    }

    /// Like `put_if_absent` but skips the read-locked pre-check and goes
    /// straight to the atomic insert. Use when absence is likely.
    pub fn put_if_probably_absent(&self, key: &Tracked<T>, value: V) -> Option<V>
    where
        V: Clone,
    {
        self.maintain();
        let probe = self.core.probe(key);
        self.core.install(&probe, key, value)
    }

    /// Remove `key`'s entry; returns its value.
    pub fn remove(&self, key: &Tracked<T>) -> Option<V> {
        self.maintain();
        self.core.remove(key)
    }

    pub fn clear(&self) {
        self.maintain();
        self.core.clear();
    }

    /// Number of stored entries. Never less than the number of live
    /// entries; may count dead entries that are not yet expunged.
    pub fn approximate_size(&self) -> usize {
        self.maintain();
        self.core.approximate_size()
    }

    pub fn is_empty_approx(&self) -> bool {
        self.approximate_size() == 0
    }

    /// Lazy iterator over live entries. See [`Iter`].
    pub fn iter(&self) -> Iter<'_, T, V, S>
    where
        V: Clone,
    {
        self.maintain();
        Iter::new(&self.core)
    }

    /// Remove every entry whose key has died, without blocking. Safe to
    /// call from any thread under any strategy. Returns the number removed.
    pub fn expunge_stale_entries(&self) -> usize {
        self.core.expunge()
    }

    /// Drain stale entries until `stop_cleaning` is called. Meant as the
    /// body of a caller-owned worker for `Reclamation::Manual`.
    pub fn run(&self) {
        self.core.run();
    }

    /// Stop every blocking drain loop of this map, including the dedicated
    /// cleaner. Permanent.
    pub fn stop_cleaning(&self) {
        self.core.queue.stop();
    }
}

impl<T, V, S> Drop for WeakConcurrentMap<T, V, S> {
    fn drop(&mut self) {
        if let Some(cleaner) = &self.cleaner {
            cleaner.stop();
        }
    }
}

impl<T, V, S> core::fmt::Debug for WeakConcurrentMap<T, V, S>
where
    S: BuildHasher,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WeakConcurrentMap")
            .field("reclamation", &self.reclamation)
            .field("shards", &self.core.shards.len())
            .field("approximate_size", &self.core.approximate_size())
            .field("cleaner", &self.cleaner)
            .finish()
    }
}

/// Configuration for a [`WeakConcurrentMap`].
pub struct Builder<T, V, S = RandomState> {
    reclamation: Reclamation,
    shards: Option<usize>,
    hasher: S,
    default_value: Option<DefaultFn<T, V>>,
}

impl<T, V> Builder<T, V> {
    /// Defaults: inline reclamation, 4x available parallelism shards,
    /// `RandomState`, no default-value hook.
    pub fn new() -> Self {
        Self {
            reclamation: Reclamation::Inline,
            shards: None,
            hasher: RandomState::new(),
            default_value: None,
        }
    }
}

impl<T, V> Default for Builder<T, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, V, S> Builder<T, V, S> {
    pub fn reclamation(mut self, reclamation: Reclamation) -> Self {
        self.reclamation = reclamation;
        self
    }

    /// Number of table segments; rounded up to a power of two, at least 1.
    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = Some(shards);
        self
    }

    pub fn hasher<S2>(self, hasher: S2) -> Builder<T, V, S2> {
        Builder {
            reclamation: self.reclamation,
            shards: self.shards,
            hasher,
            default_value: self.default_value,
        }
    }

    /// Hook computing the value `get` installs for an absent key. Returning
    /// `None` leaves the key absent.
    pub fn default_value<F>(mut self, f: F) -> Self
    where
        F: Fn(&T) -> Option<V> + Send + Sync + 'static,
    {
        self.default_value = Some(Box::new(f));
        self
    }

    fn assemble(self) -> WeakConcurrentMap<T, V, S> {
        let count = self
            .shards
            .unwrap_or_else(|| {
                std::thread::available_parallelism().map_or(1, |n| n.get()) * 4
            })
            .max(1)
            .next_power_of_two();
        let shards = (0..count).map(|_| RwLock::new(Shard::new())).collect();
        WeakConcurrentMap {
            core: Arc::new(Core {
                hasher: self.hasher,
                shards,
                queue: Arc::new(ReclamationQueue::new()),
                stamps: AtomicU64::new(0),
                default_value: self.default_value,
                reentrancy: DebugReentrancy::new(),
            }),
            reclamation: self.reclamation,
            cleaner: None,
        }
    }

    pub fn build(self) -> Result<WeakConcurrentMap<T, V, S>>
    where
        T: Send + Sync + 'static,
        V: Send + Sync + 'static,
        S: BuildHasher + Send + Sync + 'static,
    {
        let mut map = self.assemble();
        if map.reclamation == Reclamation::Thread {
            let core = Arc::clone(&map.core);
            let cleaner = Cleaner::spawn(Arc::clone(&map.core.queue), move || core.run())?;
            map.cleaner = Some(cleaner);
        }
        Ok(map)
    }
}
