//! Reclamation queue, scheduling strategies and the cleaner worker handle.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

static CLEANER_ID: AtomicU64 = AtomicU64::new(0);

/// Names one weak key instance: its cached bucket hash and its stamp,
/// unique within the owning map.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct Notice {
    pub(crate) hash: u64,
    pub(crate) stamp: u64,
}

/// How stale entries get removed once their key is dropped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Reclamation {
    /// A dedicated background thread waits on the queue and drains it.
    Thread,
    /// Every public operation first drains whatever is queued.
    Inline,
    /// Nothing drains automatically; call `expunge_stale_entries` or run
    /// `run` on a thread you own.
    Manual,
}

struct QueueState {
    notices: VecDeque<Notice>,
    stopped: bool,
}

/// Channel through which dying keys report their weak keys.
pub(crate) struct ReclamationQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
    // Mirrors `notices.len()` so empty polls skip the lock.
    pending: AtomicUsize,
}

impl ReclamationQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                notices: VecDeque::new(),
                stopped: false,
            }),
            ready: Condvar::new(),
            pending: AtomicUsize::new(0),
        }
    }

    pub(crate) fn push(&self, notice: Notice) {
        let mut state = self.state.lock();
        state.notices.push_back(notice);
        self.pending.store(state.notices.len(), Ordering::Release);
        drop(state);
        self.ready.notify_one();
    }

    /// Take everything currently queued without blocking.
    pub(crate) fn try_drain(&self) -> Vec<Notice> {
        if self.pending.load(Ordering::Acquire) == 0 {
            return Vec::new();
        }
        let mut state = self.state.lock();
        self.pending.store(0, Ordering::Release);
        Vec::from(core::mem::take(&mut state.notices))
    }

    /// Block until notices arrive, then take them all. Fails with
    /// `Error::Cancelled` once the queue has been stopped.
    pub(crate) fn recv_blocking(&self) -> Result<Vec<Notice>> {
        let mut state = self.state.lock();
        self.ready
            .wait_while(&mut state, |s| s.notices.is_empty() && !s.stopped);
        if state.stopped {
            return Err(Error::Cancelled);
        }
        self.pending.store(0, Ordering::Release);
        Ok(Vec::from(core::mem::take(&mut state.notices)))
    }

    /// Permanently wake and release every blocked receiver.
    pub(crate) fn stop(&self) {
        self.state.lock().stopped = true;
        self.ready.notify_all();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state.lock().notices.len()
    }
}

/// Handle to a map's dedicated cleaner thread.
///
/// Stopping is permanent: a stopped cleaner cannot be restarted, and any
/// notices that arrive afterwards are only drained by explicit calls to
/// `expunge_stale_entries`.
pub struct Cleaner {
    name: String,
    queue: Arc<ReclamationQueue>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Cleaner {
    pub(crate) fn spawn<F>(queue: Arc<ReclamationQueue>, body: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = format!(
            "weak-ref-cleaner-{}",
            CLEANER_ID.fetch_add(1, Ordering::Relaxed)
        );
        let handle = thread::Builder::new().name(name.clone()).spawn(body)?;
        log::debug!("started {name}");
        Ok(Self {
            name,
            queue,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the worker to exit. Returns immediately; use `join` to wait.
    pub fn stop(&self) {
        log::debug!("stop requested for {}", self.name);
        self.queue.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.queue.is_stopped()
    }

    /// True once the worker thread has exited (or was already joined).
    pub fn is_finished(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map_or(true, |h| h.is_finished())
    }

    /// Wait for the worker to exit. Returns false if it panicked. Does not
    /// stop the worker by itself.
    pub fn join(&self) -> bool {
        let handle = self.handle.lock().take();
        match handle {
            Some(h) => h.join().is_ok(),
            None => true,
        }
    }
}

impl core::fmt::Debug for Cleaner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Cleaner")
            .field("name", &self.name)
            .field("stopped", &self.is_stopped())
            .field("finished", &self.is_finished())
            .finish()
    }
}
