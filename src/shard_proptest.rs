#![cfg(test)]

// Property tests for Shard kept inside the crate so they can reach the
// internal key wrappers and the reclamation queue.

use crate::keys::{LookupKey, WeakKey};
use crate::reclaim::ReclamationQueue;
use crate::shard::Shard;
use crate::tracked::Tracked;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug)]
enum Op {
    Upsert(usize, i32),
    InsertIfAbsent(usize, i32),
    Remove(usize),
    Find(usize),
    Kill(usize),
    Revive(usize),
    Drain,
    Iterate,
}

fn arb_ops(pool: usize) -> impl Strategy<Value = Vec<Op>> {
    let idx = 0..pool;
    let op = prop_oneof![
        (idx.clone(), any::<i32>()).prop_map(|(i, v)| Op::Upsert(i, v)),
        (idx.clone(), any::<i32>()).prop_map(|(i, v)| Op::InsertIfAbsent(i, v)),
        idx.clone().prop_map(Op::Remove),
        idx.clone().prop_map(Op::Find),
        idx.clone().prop_map(Op::Kill),
        idx.clone().prop_map(Op::Revive),
        Just(Op::Drain),
        Just(Op::Iterate),
    ];
    proptest::collection::vec(op, 1..80)
}

// Few distinct hashes so most keys collide.
fn hash_of<T>(k: &Tracked<T>) -> u64 {
    (k.identity() as u64 >> 4) % 3
}

// Property: state-machine equivalence against a HashMap of live keys.
// Invariants exercised across random operation sequences:
// - Live keys resolve to their model value; killed keys never resolve,
//   including a fresh key created after the old one died.
// - `len` equals live model entries plus dead entries not yet drained.
// - Draining removes exactly the dead entries (no live entry is touched),
//   and explicitly removed entries produce no notices.
// - Handles captured for iteration resolve to live or dead slots only,
//   never to a slot of a different key.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_shard_state_machine(ops in arb_ops(6)) {
        let queue = Arc::new(ReclamationQueue::new());
        let mut sut: Shard<usize, i32> = Shard::new();
        let mut pool: Vec<Option<Tracked<usize>>> = (0..6).map(|i| Some(Tracked::new(i))).collect();
        let mut model: HashMap<usize, i32> = HashMap::new();
        let mut dead_pending = 0usize;
        let mut stamp = 0u64;

        for op in ops {
            match op {
                Op::Upsert(i, v) => {
                    if let Some(k) = &pool[i] {
                        let h = hash_of(k);
                        let prev = sut.upsert(&LookupKey::probe(k, h), v, || {
                            stamp += 1;
                            WeakKey::wrap(k, h, stamp, &queue)
                        });
                        prop_assert_eq!(prev, model.insert(i, v));
                    }
                }
                Op::InsertIfAbsent(i, v) => {
                    if let Some(k) = &pool[i] {
                        let h = hash_of(k);
                        let res = sut.insert_if_absent(&LookupKey::probe(k, h), v, || {
                            stamp += 1;
                            WeakKey::wrap(k, h, stamp, &queue)
                        });
                        match res {
                            Ok(_) => {
                                prop_assert!(!model.contains_key(&i));
                                model.insert(i, v);
                            }
                            Err((handle, rejected)) => {
                                prop_assert_eq!(rejected, v);
                                let existing = sut.slot(handle).map(|s| s.value);
                                prop_assert_eq!(existing, model.get(&i).copied());
                            }
                        }
                    }
                }
                Op::Remove(i) => {
                    if let Some(k) = &pool[i] {
                        let removed = sut.remove(&LookupKey::probe(k, hash_of(k)));
                        let removed = removed.map(|slot| {
                            slot.key.release(&queue);
                            slot.value
                        });
                        prop_assert_eq!(removed, model.remove(&i));
                    }
                }
                Op::Find(i) => {
                    if let Some(k) = &pool[i] {
                        let got = sut.get(&LookupKey::probe(k, hash_of(k))).copied();
                        prop_assert_eq!(got, model.get(&i).copied());
                    }
                }
                Op::Kill(i) => {
                    if pool[i].take().is_some() && model.remove(&i).is_some() {
                        dead_pending += 1;
                    }
                }
                Op::Revive(i) => {
                    if pool[i].is_none() {
                        let k = Tracked::new(i);
                        let got = sut.get(&LookupKey::probe(&k, hash_of(&k)));
                        prop_assert!(got.is_none(), "a fresh key must not see a dead entry");
                        pool[i] = Some(k);
                    }
                }
                Op::Drain => {
                    let mut removed = 0;
                    for notice in queue.try_drain() {
                        if let Some(slot) = sut.remove_instance(&notice) {
                            prop_assert!(slot.key.upgrade().is_none());
                            removed += 1;
                        }
                    }
                    prop_assert_eq!(removed, dead_pending);
                    dead_pending = 0;
                }
                Op::Iterate => {
                    let mut live = 0;
                    for h in sut.handles() {
                        let slot = sut.slot(h).expect("captured handle resolves while unchanged");
                        if let Some(k) = slot.key.upgrade() {
                            let i = *k;
                            prop_assert_eq!(Some(slot.value), model.get(&i).copied());
                            live += 1;
                        }
                    }
                    prop_assert_eq!(live, model.len());
                }
            }
            prop_assert_eq!(sut.len(), model.len() + dead_pending);
        }
    }
}
