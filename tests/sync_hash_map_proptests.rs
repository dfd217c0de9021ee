// SyncHashMap property tests (consolidated).
//
// Property 1: single-threaded behavior matches a plain HashMap model.
//  - Model: std HashMap<String, i32>.
//  - Operations: load, store, load_or_store, delete, load_and_delete,
//    swap, compare_and_swap, compare_and_delete, range, clear.
//  - Invariant: every operation's result agrees with the model, and a full
//    range after each step equals the model contents. Interleaving range
//    (promotion) with misses and rebuilds exercises every state transition.
//
// Property 2: range visits each present key exactly once.
//  - Model: the set of keys stored and not deleted.
//  - Invariant: no duplicates, no omissions, no deleted keys.
use proptest::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use sync_hashmap::SyncHashMap;

fn key(k: usize) -> String {
    format!("k{}", k)
}

fn snapshot(m: &SyncHashMap<String, i32>) -> BTreeMap<String, i32> {
    let mut out = BTreeMap::new();
    m.range(|k, v| {
        out.insert(k.clone(), *v);
        true
    });
    out
}

proptest! {
    #[test]
    fn prop_matches_hashmap_model(
        keys in 1usize..=8,
        ops in proptest::collection::vec((0u8..=10u8, 0usize..64usize, -3i32..3i32), 1..200)
    ) {
        let m: SyncHashMap<String, i32> = SyncHashMap::new();
        let mut model: HashMap<String, i32> = HashMap::new();

        for (op, raw_k, v) in ops {
            let k = key(raw_k % keys);
            match op {
                0 | 1 => {
                    let got = m.load(&k).map(|r| *r);
                    prop_assert_eq!(got, model.get(&k).copied());
                }
                2 => {
                    m.store(k.clone(), v);
                    model.insert(k, v);
                }
                3 => {
                    let (actual, loaded) = m.load_or_store(k.clone(), v);
                    match model.get(&k) {
                        Some(&existing) => {
                            prop_assert!(loaded);
                            prop_assert_eq!(*actual, existing);
                        }
                        None => {
                            prop_assert!(!loaded);
                            prop_assert_eq!(*actual, v);
                            model.insert(k, v);
                        }
                    }
                }
                4 => {
                    m.delete(&k);
                    model.remove(&k);
                }
                5 => {
                    let got = m.load_and_delete(&k).map(|r| *r);
                    prop_assert_eq!(got, model.remove(&k));
                }
                6 => {
                    let got = m.swap(k.clone(), v).map(|r| *r);
                    prop_assert_eq!(got, model.insert(k, v));
                }
                7 => {
                    let expected = model.get(&k) == Some(&v);
                    prop_assert_eq!(m.compare_and_swap(&k, &v, v + 10), expected);
                    if expected {
                        model.insert(k, v + 10);
                    }
                }
                8 => {
                    let expected = model.get(&k) == Some(&v);
                    prop_assert_eq!(m.compare_and_delete(&k, &v), expected);
                    if expected {
                        model.remove(&k);
                    }
                }
                9 => {
                    let expected: BTreeMap<String, i32> =
                        model.iter().map(|(k, v)| (k.clone(), *v)).collect();
                    prop_assert_eq!(snapshot(&m), expected);
                }
                10 => {
                    if raw_k % 8 == 0 {
                        m.clear();
                        model.clear();
                    }
                }
                _ => unreachable!(),
            }
        }

        let expected: BTreeMap<String, i32> =
            model.iter().map(|(k, v)| (k.clone(), *v)).collect();
        prop_assert_eq!(snapshot(&m), expected);
    }
}

proptest! {
    #[test]
    fn prop_range_visits_each_key_once(
        inserts in proptest::collection::vec(0usize..200usize, 0..300),
        deletes in proptest::collection::vec(0usize..200usize, 0..100),
        loads in proptest::collection::vec(0usize..200usize, 0..100),
    ) {
        let m: SyncHashMap<usize, usize> = SyncHashMap::new();
        let mut live: HashSet<usize> = HashSet::new();
        for (i, k) in inserts.iter().enumerate() {
            m.store(*k, i);
            live.insert(*k);
            if let Some(l) = loads.get(i) {
                let _ = m.load(l);
            }
        }
        for k in &deletes {
            m.delete(k);
            live.remove(k);
        }

        let mut seen = HashSet::new();
        m.range(|k, _| {
            assert!(seen.insert(*k), "key {} visited twice", k);
            true
        });
        prop_assert_eq!(seen, live);
    }
}
