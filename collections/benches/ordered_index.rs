use std::collections::BTreeMap;

use compiler_collections::OrderedIndex;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn keys() -> Vec<u64> {
    (0..10000u64)
        .map(|i| i.wrapping_mul(2_654_435_761) % 1_000_000_007)
        .collect()
}

pub fn insert(c: &mut Criterion) {
    let keys = keys();
    let mut group = c.benchmark_group("insert");

    group.bench_function("ours 10000", |b| {
        b.iter(|| {
            let mut index = OrderedIndex::new();
            for &k in &keys {
                index = index.insert(k, k);
            }
            black_box(index)
        })
    });

    group.bench_function("ours bulk 10000", |b| {
        b.iter(|| black_box(keys.iter().map(|&k| (k, k)).collect::<OrderedIndex<_, _>>()))
    });

    group.bench_function("rpds 10000", |b| {
        b.iter(|| {
            let mut map = rpds::RedBlackTreeMapSync::new_sync();
            for &k in &keys {
                map = map.insert(k, k);
            }
            black_box(map)
        })
    });
}

pub fn get(c: &mut Criterion) {
    let keys = keys();
    let index: OrderedIndex<u64, u64> = keys.iter().map(|&k| (k, k)).collect();
    let rpds: rpds::RedBlackTreeMapSync<u64, u64> = keys.iter().map(|&k| (k, k)).collect();
    let btree: BTreeMap<u64, u64> = keys.iter().map(|&k| (k, k)).collect();
    let mut group = c.benchmark_group("get");

    group.bench_function("ours 10000", |b| {
        b.iter(|| {
            for k in &keys {
                black_box(index.get(k));
            }
        });
    });

    group.bench_function("rpds 10000", |b| {
        b.iter(|| {
            for k in &keys {
                black_box(rpds.get(k));
            }
        });
    });

    group.bench_function("std 10000", |b| {
        b.iter(|| {
            for k in &keys {
                black_box(btree.get(k));
            }
        });
    });
}

pub fn get_at(c: &mut Criterion) {
    let index: OrderedIndex<u64, u64> = keys().into_iter().map(|k| (k, k)).collect();

    c.bench_function("get_at 10000", |b| {
        b.iter(|| {
            for i in 0..10000 {
                black_box(index.get_at(i).ok());
            }
        });
    });
}

criterion_group!(benches, insert, get, get_at);
criterion_main!(benches);
