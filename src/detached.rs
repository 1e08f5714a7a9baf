//! DetachedLocal: one value per thread, stored outside the thread.
//!
//! Each thread is keyed by a thread-local `Tracked<ThreadId>` that is
//! dropped when the thread exits, so values of finished threads are
//! reclaimed like any other dead key. Unlike `thread_local!`, values are
//! reachable from other threads: they can be copied to another thread's
//! key or cleared for all threads at once.

use crate::error::Result;
use crate::map::{Builder, WeakConcurrentMap};
use crate::reclaim::{Cleaner, Reclamation};
use crate::tracked::Tracked;
use std::thread::{self, ThreadId};

thread_local! {
    static THREAD_KEY: Tracked<ThreadId> = Tracked::new(thread::current().id());
}

/// Key of the calling thread. Keep a clone only as long as needed: holding
/// it keeps that thread's entries alive after the thread exits.
pub fn current_thread_key() -> Tracked<ThreadId> {
    THREAD_KEY.with(Tracked::clone)
}

pub struct DetachedLocal<V> {
    map: WeakConcurrentMap<ThreadId, V>,
}

impl<V> DetachedLocal<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(reclamation: Reclamation) -> Result<Self> {
        Ok(Self {
            map: WeakConcurrentMap::new(reclamation)?,
        })
    }

    /// `initial` supplies the value `get` installs for a thread with none.
    pub fn with_initial<F>(reclamation: Reclamation, initial: F) -> Result<Self>
    where
        F: Fn() -> Option<V> + Send + Sync + 'static,
    {
        let map = Builder::new()
            .reclamation(reclamation)
            .default_value(move |_| initial())
            .build()?;
        Ok(Self { map })
    }

    pub fn get(&self) -> Option<V> {
        THREAD_KEY.with(|k| self.map.get(k))
    }

    /// Set the calling thread's value; returns the previous one.
    pub fn set(&self, value: V) -> Option<V> {
        THREAD_KEY.with(|k| self.map.put(k, value))
    }

    /// Remove the calling thread's value.
    pub fn clear(&self) -> Option<V> {
        THREAD_KEY.with(|k| self.map.remove(k))
    }

    /// Remove the values of all threads.
    pub fn clear_all(&self) {
        self.map.clear();
    }

    /// Copy the calling thread's current value to `thread`. Returns the
    /// copied value, or `None` if the caller has none.
    pub fn inherit_to(&self, thread: &Tracked<ThreadId>) -> Option<V> {
        let value = self.get()?;
        self.map.put(thread, value.clone());
        Some(value)
    }

    pub fn get_for(&self, thread: &Tracked<ThreadId>) -> Option<V> {
        self.map.get_if_present(thread)
    }

    pub fn set_for(&self, thread: &Tracked<ThreadId>, value: V) -> Option<V> {
        self.map.put(thread, value)
    }

    pub fn approximate_size(&self) -> usize {
        self.map.approximate_size()
    }

    pub fn cleaner(&self) -> Option<&Cleaner> {
        self.map.cleaner()
    }

    pub fn expunge_stale_entries(&self) -> usize {
        self.map.expunge_stale_entries()
    }

    pub fn run(&self) {
        self.map.run();
    }

    pub fn stop_cleaning(&self) {
        self.map.stop_cleaning();
    }
}
