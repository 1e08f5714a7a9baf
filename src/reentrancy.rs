//! Debug-only reentrancy guard.
//!
//! Detects a thread re-entering a map while it already holds one of that
//! map's shard locks (for example from `V::clone` running under a read
//! lock). Such nesting can deadlock against a queued writer, so debug
//! builds panic instead. Each thread tracks the maps it is inside of; in
//! release builds this compiles to a zero-cost no-op.

use core::marker::PhantomData;

#[cfg(debug_assertions)]
use core::cell::RefCell;
#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(debug_assertions)]
static NEXT_ID: AtomicU64 = AtomicU64::new(0);

#[cfg(debug_assertions)]
thread_local! {
    static ENTERED: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Per-map reentrancy tracker. Guard critical sections with
/// `let _g = self.reentrancy.enter();`.
#[derive(Debug)]
pub struct DebugReentrancy {
    #[cfg(debug_assertions)]
    id: u64,
}

impl DebugReentrancy {
    pub fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Enter a guarded section. In debug builds, panics if this thread is
    /// already inside a section of the same tracker.
    #[inline]
    pub fn enter(&self) -> ReentrancyGuard<'_> {
        #[cfg(debug_assertions)]
        {
            let _ = ENTERED.try_with(|entered| {
                let mut entered = entered.borrow_mut();
                assert!(
                    !entered.contains(&self.id),
                    "reentrancy detected: nested entry into map while a shard lock is held"
                );
                entered.push(self.id);
            });
            ReentrancyGuard {
                owner: self,
                _nosend: PhantomData,
            }
        }

        #[cfg(not(debug_assertions))]
        {
            ReentrancyGuard {
                _z: PhantomData,
                _nosend: PhantomData,
            }
        }
    }
}

impl Default for DebugReentrancy {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by `DebugReentrancy::enter`. Bound to its thread.
pub struct ReentrancyGuard<'a> {
    #[cfg(debug_assertions)]
    owner: &'a DebugReentrancy,
    #[cfg(not(debug_assertions))]
    _z: PhantomData<&'a ()>,
    _nosend: PhantomData<*mut ()>,
}

impl<'a> Drop for ReentrancyGuard<'a> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            let id = self.owner.id;
            let _ = ENTERED.try_with(|entered| {
                let mut entered = entered.borrow_mut();
                if let Some(pos) = entered.iter().rposition(|&e| e == id) {
                    entered.remove(pos);
                }
            });
        }
    }
}
