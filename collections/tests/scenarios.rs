use std::sync::Arc;

use compiler_collections::{
    BipartiteSet, ConcurrentSmallIntSet, Error, OrderedIndex, Rope, SmallMap,
};
use pretty_assertions::assert_eq;

/// A thousand distinct pseudo-random keys.
fn keys() -> Vec<u64> {
    (1..=1000u64)
        .map(|i| i.wrapping_mul(2_654_435_761) % 1_000_000_007)
        .collect()
}

#[test]
fn symbol_index_lifecycle() {
    let keys = keys();
    let mut index: OrderedIndex<u64, u64> = keys.iter().map(|&k| (k, k * 2)).collect();
    index.check_invariants();
    assert_eq!(index.len(), 1000);

    let mut sorted = keys.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), 1000);
    assert_eq!(index.key_at(500), Ok(&sorted[500]));
    assert_eq!(index.value_at(500), Ok(&(sorted[500] * 2)));
    assert_eq!(
        index.get_at(1000),
        Err(Error::IndexOutOfRange {
            index: 1000,
            len: 1000
        })
    );

    let full = index.clone();
    let last = keys[keys.len() - 1];
    for (removed, k) in keys.iter().step_by(2).enumerate() {
        index = index.remove(k);
        assert_eq!(index.len(), 1000 - removed - 1);
        assert!(!index.contains_key(k));
        assert_eq!(index.get(&last), Some(&(last * 2)));
    }
    index.check_invariants();

    for (i, k) in keys.iter().enumerate() {
        assert_eq!(index.contains_key(k), i % 2 == 1);
        assert!(full.contains_key(k));
    }
    assert_eq!(full.len(), 1000);
}

#[test]
fn bulk_and_single_inserts_agree() {
    let keys = keys();
    let bulk: OrderedIndex<u64, usize> = keys.iter().copied().zip(0..).collect();
    let single = keys
        .iter()
        .zip(0..)
        .fold(OrderedIndex::new(), |index, (&k, v)| index.insert(k, v));
    assert_eq!(bulk, single);

    for (i, (k, _)) in bulk.iter().enumerate() {
        assert_eq!(bulk.index_of(k), Some(i));
    }
}

#[test]
fn source_buffer_edits() {
    let source = Arc::new("fn main() {\n    let x = 1;\n}\n".repeat(50));
    let rope: Rope<u8> = Rope::from_shared(source.clone(), 0..source.len());

    // Type a line in the middle of the buffer, then take it back out.
    let offset = source.len() / 2;
    let line = b"    dbg!(x);\n";
    let edited = rope.insert_all_at(offset, line.iter().copied());
    edited.check_invariants();
    assert_eq!(edited.len(), source.len() + line.len());
    assert_eq!(edited.range(offset, line.len()).to_vec(), line.to_vec());

    let restored = edited.remove_at(offset, line.len());
    restored.check_invariants();
    assert_eq!(restored, rope);
    assert_eq!(rope.to_vec(), source.as_bytes());
}

#[test]
fn rope_laws() {
    let rope: Rope<u32> = (0..777).collect();
    assert_eq!(rope.range(0, rope.len()), rope);

    for idx in (0..=777).step_by(37) {
        assert_eq!(rope.insert_at(idx, 42).remove_at(idx, 1), rope);
    }

    let built = (0..777).fold(Rope::new(), |rope, i| rope.push_back(i));
    built.check_invariants();
    assert_eq!(built, rope);
}

#[test]
fn scope_tracking() {
    let scope = BipartiteSet::new()
        .insert("x")
        .insert("y")
        .insert("z");
    assert_eq!(scope.newest(), Some(&"z"));
    assert_eq!(scope.len(), 3);

    let shadowed = scope.insert("y");
    assert_eq!(shadowed, scope);

    let popped = scope.remove(&"z");
    assert_eq!(popped.newest(), None);
    assert_eq!(popped.older().keys().copied().collect::<Vec<_>>(), vec!["x", "y"]);

    let consolidated = scope.remove(&"x");
    assert_eq!(consolidated.newest(), None);
    assert_eq!(
        consolidated.older().keys().copied().collect::<Vec<_>>(),
        vec!["y", "z"]
    );
}

#[test]
fn member_table() {
    let mut members = SmallMap::new();
    for name in ["len", "push", "pop", "iter", "get"] {
        members.add(name.to_owned(), name.len()).unwrap();
    }
    assert_eq!(members.add("pop".to_owned(), 0), Err(Error::DuplicateKey));
    assert_eq!(members.get("iter"), Some(&4));
    assert_eq!(members["push"], 4);
    assert_eq!(members.get("insert"), None);
    members.assert_balanced();
}

#[test]
fn racing_diagnostic_ids() {
    let reported = ConcurrentSmallIntSet::new();
    let fresh: Vec<bool> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| reported.add(1234)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(fresh.iter().filter(|&&b| b).count(), 1);
    assert!(reported.contains(1234));
}
