//! WeakConcurrentSet: a set of weakly held elements.

use crate::error::Result;
use crate::map::WeakConcurrentMap;
use crate::reclaim::{Cleaner, Reclamation};
use crate::tracked::Tracked;
use core::hash::BuildHasher;
use std::collections::hash_map::RandomState;

/// Concurrent set whose elements vanish once dropped elsewhere. Backed by a
/// map whose values are all `()`.
pub struct WeakConcurrentSet<T, S = RandomState> {
    map: WeakConcurrentMap<T, (), S>,
}

impl<T> WeakConcurrentSet<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(reclamation: Reclamation) -> Result<Self> {
        Ok(Self {
            map: WeakConcurrentMap::new(reclamation)?,
        })
    }
}

impl<T, S> WeakConcurrentSet<T, S>
where
    S: BuildHasher,
{
    /// Wrap an already configured map.
    pub fn from_map(map: WeakConcurrentMap<T, (), S>) -> Self {
        Self { map }
    }

    /// Returns true if `value` was not already present.
    pub fn add(&self, value: &Tracked<T>) -> bool {
        self.map.put(value, ()).is_none()
    }

    pub fn contains(&self, value: &Tracked<T>) -> bool {
        self.map.contains_key(value)
    }

    /// Returns true if `value` was present.
    pub fn remove(&self, value: &Tracked<T>) -> bool {
        self.map.remove(value).is_some()
    }

    pub fn clear(&self) {
        self.map.clear();
    }

    pub fn approximate_size(&self) -> usize {
        self.map.approximate_size()
    }

    /// Live elements, each held strongly only while yielded.
    pub fn iter(&self) -> impl Iterator<Item = Tracked<T>> + '_ {
        self.map.iter().map(|e| e.into_parts().0)
    }

    pub fn expunge_stale_entries(&self) -> usize {
        self.map.expunge_stale_entries()
    }

    pub fn cleaner(&self) -> Option<&Cleaner> {
        self.map.cleaner()
    }

    pub fn run(&self) {
        self.map.run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_contains_remove() {
        let set = WeakConcurrentSet::new(Reclamation::Manual).unwrap();
        let a = Tracked::new("a");
        let b = Tracked::new("b");
        assert!(set.add(&a));
        assert!(!set.add(&a));
        assert!(set.add(&b));
        assert!(set.contains(&a));
        assert!(set.remove(&a));
        assert!(!set.remove(&a));
        assert!(!set.contains(&a));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![b.clone()]);

        drop(b);
        assert_eq!(set.approximate_size(), 1);
        assert_eq!(set.expunge_stale_entries(), 1);
        assert_eq!(set.approximate_size(), 0);
    }
}
