// Collaborators built on the map: WeakConcurrentSet and DetachedLocal.
//
// - Set: elements are held weakly and vanish with their last owner.
// - DetachedLocal: one value per thread, reclaimed after the thread exits,
//   and reachable from other threads (copy to a thread key, clear all).
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use weak_concurrent_map::{
    current_thread_key, DetachedLocal, Reclamation, Tracked, WeakConcurrentMap, WeakConcurrentSet,
};

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

// Test: set over a pre-configured map.
// Verifies: membership follows element liveness under inline reclamation.
#[test]
fn set_elements_vanish_with_their_owner() {
    let map: WeakConcurrentMap<String, ()> =
        WeakConcurrentMap::builder().reclamation(Reclamation::Inline).shards(4).build().unwrap();
    let set = WeakConcurrentSet::from_map(map);
    let keep = Tracked::new("keep".to_string());
    let temp = Tracked::new("temp".to_string());
    assert!(set.add(&keep));
    assert!(set.add(&temp));
    assert_eq!(set.approximate_size(), 2);

    drop(temp);
    assert_eq!(set.approximate_size(), 1);
    let members: Vec<_> = set.iter().collect();
    assert_eq!(members, vec![keep.clone()]);

    set.clear();
    assert!(!set.contains(&keep));
    assert!(set.cleaner().is_none());
}

// Test: set with a dedicated cleaner shared across threads.
// Verifies: elements added from other threads are counted and then
// reclaimed by the cleaner once those threads drop them.
#[test]
fn set_with_cleaner_thread() {
    let set = Arc::new(WeakConcurrentSet::new(Reclamation::Thread).unwrap());
    assert!(set.cleaner().is_some());
    let workers: Vec<_> = (0..8)
        .map(|i| {
            let set = Arc::clone(&set);
            thread::spawn(move || {
                let element = Tracked::new(i);
                assert!(set.add(&element));
                assert!(set.contains(&element));
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    assert!(wait_until(Duration::from_secs(5), || set.approximate_size() == 0));
}

// Test: per-thread values.
// Verifies: each thread sees only its own value; other threads' values are
// visible through their keys.
#[test]
fn detached_local_values_are_per_thread() {
    let local = Arc::new(DetachedLocal::new(Reclamation::Manual).unwrap());
    local.set("main");
    let (key_tx, key_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let worker = {
        let local = Arc::clone(&local);
        thread::spawn(move || {
            assert_eq!(local.get(), None);
            local.set("worker");
            key_tx.send(current_thread_key()).unwrap();
            done_rx.recv().unwrap();
            local.get()
        })
    };
    let worker_key = key_rx.recv().unwrap();
    assert_eq!(local.get(), Some("main"));
    assert_eq!(local.get_for(&worker_key), Some("worker"));
    assert_eq!(local.set_for(&worker_key, "patched"), Some("worker"));
    done_tx.send(()).unwrap();
    assert_eq!(worker.join().unwrap(), Some("patched"));
}

// Test: inheriting a value into another thread.
// Verifies: inherit_to copies the caller's value; a caller without one
// copies nothing.
#[test]
fn detached_local_inherit_to() {
    let local = Arc::new(DetachedLocal::new(Reclamation::Manual).unwrap());
    let child = Tracked::new(thread::spawn(|| ()).thread().id());
    assert_eq!(local.inherit_to(&child), None);
    assert_eq!(local.get_for(&child), None);

    local.set(42u64);
    assert_eq!(local.inherit_to(&child), Some(42));
    assert_eq!(local.get_for(&child), Some(42));
    // The copy is independent.
    local.set(7);
    assert_eq!(local.get_for(&child), Some(42));
}

// Test: thread exit.
// Verifies: a finished thread's value becomes a dead entry and is reclaimed
// once its key is no longer held.
#[test]
fn detached_local_reclaims_finished_threads() {
    let local = Arc::new(DetachedLocal::new(Reclamation::Manual).unwrap());
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let local = Arc::clone(&local);
            thread::spawn(move || {
                local.set(i);
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    // Thread-local destructors run before join returns.
    assert_eq!(local.approximate_size(), 4);
    assert_eq!(local.expunge_stale_entries(), 4);
    assert_eq!(local.approximate_size(), 0);
}

// Test: clear_all.
// Verifies: values of every thread are removed at once.
#[test]
fn detached_local_clear_all() {
    let local = DetachedLocal::with_initial(Reclamation::Inline, || Some(0u8)).unwrap();
    let other = Tracked::new(thread::current().id());
    local.set(1);
    local.set_for(&other, 2);
    assert_eq!(local.approximate_size(), 2);
    local.clear_all();
    assert_eq!(local.approximate_size(), 0);
    assert_eq!(local.get_for(&other), None);
    // `get` re-installs the initial value; `get_for` never does.
    assert_eq!(local.get(), Some(0));
    assert_eq!(local.approximate_size(), 1);
}

// Test: a caller-owned cleaner for DetachedLocal.
// Verifies: `run` drains thread exits and returns after `stop_cleaning`.
#[test]
fn detached_local_with_external_worker() {
    let local = Arc::new(DetachedLocal::<u32>::new(Reclamation::Manual).unwrap());
    assert!(local.cleaner().is_none());
    let worker = {
        let local = Arc::clone(&local);
        thread::spawn(move || local.run())
    };
    let l = Arc::clone(&local);
    thread::spawn(move || {
        l.set(1);
    })
    .join()
    .unwrap();
    assert!(wait_until(Duration::from_secs(5), || local.approximate_size() == 0));
    local.stop_cleaning();
    worker.join().unwrap();
}
