use std::collections::{BTreeMap, BTreeSet, HashMap};

use arbitrary::Unstructured;
use arbtest::{arbitrary, arbtest};
use compiler_collections::{BipartiteSet, BitVector, OrderedIndex, Rope, SmallMap};

// u.arbitrary() generates very short vecs by default:
// https://github.com/matklad/arbtest/issues/8
fn arb_vec<T>(u: &mut Unstructured<'_>) -> arbitrary::Result<Vec<T>>
where
    T: for<'a> arbitrary::Arbitrary<'a>,
{
    let len = u.arbitrary_len::<T>()?;
    std::iter::from_fn(|| Some(u.arbitrary::<T>()))
        .take(len)
        .collect()
}

#[derive(arbitrary::Arbitrary, Debug)]
enum IndexOp {
    Insert(u8, u32),
    Remove(u8),
    InsertAll(Vec<(u8, u32)>),
    Snapshot,
}

impl IndexOp {
    fn apply_to_map(&self, map: &mut BTreeMap<u8, u32>) {
        match self {
            IndexOp::Insert(k, v) => {
                map.insert(*k, *v);
            }
            IndexOp::Remove(k) => {
                map.remove(k);
            }
            IndexOp::InsertAll(pairs) => map.extend(pairs.iter().copied()),
            IndexOp::Snapshot => {}
        }
    }

    fn apply_to_index(
        &self,
        index: &mut OrderedIndex<u8, u32>,
        snapshots: &mut Vec<(OrderedIndex<u8, u32>, Vec<(u8, u32)>)>,
    ) {
        match self {
            IndexOp::Insert(k, v) => *index = index.insert(*k, *v),
            IndexOp::Remove(k) => *index = index.remove(k),
            IndexOp::InsertAll(pairs) => *index = index.insert_all(pairs.iter().copied()),
            IndexOp::Snapshot => {
                let contents = index.iter().map(|(k, v)| (*k, *v)).collect();
                snapshots.push((index.clone(), contents));
            }
        }
    }
}

#[test]
fn ordered_index_mutations() {
    arbtest(|u| {
        let pairs: Vec<(u8, u32)> = arb_vec(u)?;
        let mut map: BTreeMap<u8, u32> = pairs.iter().copied().collect();
        let mut index: OrderedIndex<u8, u32> = pairs.into_iter().collect();
        let mut snapshots = Vec::new();
        let ops: Vec<IndexOp> = u.arbitrary()?;

        for op in ops {
            op.apply_to_map(&mut map);
            op.apply_to_index(&mut index, &mut snapshots);

            index.check_invariants();
            assert_eq!(
                map.iter().collect::<Vec<_>>(),
                index.iter().collect::<Vec<_>>()
            );
        }

        for (i, (k, v)) in map.iter().enumerate() {
            assert_eq!(index.get_at(i), Ok((k, v)));
            assert_eq!(index.index_of(k), Some(i));
        }
        assert!(index.get_at(map.len()).is_err());

        for (snapshot, contents) in snapshots {
            assert_eq!(
                snapshot.iter().map(|(k, v)| (*k, *v)).collect::<Vec<_>>(),
                contents
            );
        }

        Ok(())
    });
}

#[derive(arbitrary::Arbitrary, Debug)]
enum RopeOp {
    Insert(usize, u32),
    InsertAll(usize, Vec<u32>),
    Remove(usize, usize),
    Range(usize, usize),
    Replace(usize, u32),
    Snapshot,
}

impl RopeOp {
    fn apply_to_vec(&self, vec: &mut Vec<u32>) {
        match self {
            RopeOp::Insert(idx, x) => vec.insert(idx % (vec.len() + 1), *x),
            RopeOp::InsertAll(idx, xs) => {
                let idx = idx % (vec.len() + 1);
                vec.splice(idx..idx, xs.iter().copied());
            }
            RopeOp::Remove(idx, len) => {
                let idx = idx % (vec.len() + 1);
                let end = idx.saturating_add(*len).min(vec.len());
                vec.drain(idx..end);
            }
            RopeOp::Range(idx, len) => {
                let idx = idx % (vec.len() + 1);
                let end = idx.saturating_add(*len).min(vec.len());
                vec.truncate(end);
                vec.drain(..idx);
            }
            RopeOp::Replace(idx, x) => {
                if !vec.is_empty() {
                    let len = vec.len();
                    vec[idx % len] = *x;
                }
            }
            RopeOp::Snapshot => {}
        }
    }

    fn apply_to_rope(&self, rope: &mut Rope<u32>, snapshots: &mut Vec<(Rope<u32>, Vec<u32>)>) {
        match self {
            RopeOp::Insert(idx, x) => *rope = rope.insert_at(idx % (rope.len() + 1), *x),
            RopeOp::InsertAll(idx, xs) => {
                *rope = rope.insert_all_at(idx % (rope.len() + 1), xs.iter().copied())
            }
            RopeOp::Remove(idx, len) => *rope = rope.remove_at(idx % (rope.len() + 1), *len),
            RopeOp::Range(idx, len) => *rope = rope.range(idx % (rope.len() + 1), *len),
            RopeOp::Replace(idx, x) => {
                if !rope.is_empty() {
                    *rope = rope.replace_at(idx % rope.len(), *x);
                }
            }
            RopeOp::Snapshot => snapshots.push((rope.clone(), rope.to_vec())),
        }
    }
}

#[test]
fn rope_mutations() {
    arbtest(|u| {
        let mut vec: Vec<u32> = arb_vec(u)?;
        let mut rope: Rope<u32> = vec.iter().copied().collect();
        let mut snapshots = Vec::new();
        let ops: Vec<RopeOp> = u.arbitrary()?;

        for op in ops {
            op.apply_to_vec(&mut vec);
            op.apply_to_rope(&mut rope, &mut snapshots);

            rope.check_invariants();
            assert_eq!(vec, rope.to_vec());
        }

        for (snapshot, contents) in snapshots {
            assert_eq!(snapshot.to_vec(), contents);
        }

        Ok(())
    });
}

#[test]
fn rope_random_access() {
    arbtest(|u| {
        let vec: Vec<u32> = arb_vec(u)?;
        let rope: Rope<u32> = vec.iter().copied().collect();
        let idx = u.arbitrary::<usize>()? % (vec.len() + 1);

        assert_eq!(rope.get(idx), vec.get(idx));
        assert_eq!(rope.iter().len(), vec.len());

        Ok(())
    });
}

#[test]
fn small_map_inserts() {
    arbtest(|u| {
        let pairs: Vec<(u16, u32)> = arb_vec(u)?;
        let mut expected = HashMap::new();
        let mut map = SmallMap::new();

        for (k, v) in pairs {
            let fresh = !expected.contains_key(&k);
            assert_eq!(map.add(k, v).is_ok(), fresh);
            map.insert(k, v);
            expected.insert(k, v);
            map.assert_balanced();
        }

        assert_eq!(map.len(), expected.len());
        for (k, v) in &expected {
            assert_eq!(map.get(k), Some(v));
        }
        let lookup: u16 = u.arbitrary()?;
        assert_eq!(map.get(&lookup), expected.get(&lookup));

        Ok(())
    });
}

#[derive(arbitrary::Arbitrary, Debug)]
enum BitOp {
    Set(u16, bool),
    Clear,
    Invert,
    Union(Vec<u16>),
    Intersect(Vec<u16>),
}

const BIT_RANGE: usize = 300;

fn bits_of(indices: &[u16]) -> BitVector {
    let mut ret = BitVector::empty();
    for &i in indices {
        ret.set(i as usize % BIT_RANGE, true);
    }
    ret
}

impl BitOp {
    fn apply_to_vec(&self, vec: &mut Vec<bool>) {
        match self {
            BitOp::Set(idx, value) => {
                let idx = *idx as usize % BIT_RANGE;
                if idx >= vec.len() {
                    vec.resize(idx + 1, false);
                }
                vec[idx] = *value;
            }
            BitOp::Clear => vec.fill(false),
            BitOp::Invert => vec.iter_mut().for_each(|b| *b = !*b),
            BitOp::Union(indices) => {
                let other = bits_of(indices);
                if other.capacity() > vec.len() {
                    vec.resize(other.capacity(), false);
                }
                for i in other.true_bits() {
                    vec[i] = true;
                }
            }
            BitOp::Intersect(indices) => {
                let other = bits_of(indices);
                for (i, b) in vec.iter_mut().enumerate() {
                    *b &= other.get(i);
                }
            }
        }
    }

    fn apply_to_bits(&self, bits: &mut BitVector) {
        match self {
            BitOp::Set(idx, value) => bits.set(*idx as usize % BIT_RANGE, *value),
            BitOp::Clear => bits.clear(),
            BitOp::Invert => bits.invert(),
            BitOp::Union(indices) => {
                bits.union_with(&bits_of(indices));
            }
            BitOp::Intersect(indices) => {
                bits.intersect_with(&bits_of(indices));
            }
        }
    }
}

#[test]
fn bit_vector_operations() {
    arbtest(|u| {
        let mut vec = Vec::new();
        let mut bits = BitVector::empty();
        let ops: Vec<BitOp> = u.arbitrary()?;

        for op in ops {
            op.apply_to_vec(&mut vec);
            op.apply_to_bits(&mut bits);

            assert_eq!(bits.capacity(), vec.len());
            let expected: Vec<usize> = (0..vec.len()).filter(|&i| vec[i]).collect();
            assert_eq!(bits.true_bits().collect::<Vec<_>>(), expected);
        }

        Ok(())
    });
}

#[derive(arbitrary::Arbitrary, Debug)]
enum SetOp {
    Insert(u8),
    Remove(u8),
}

#[test]
fn bipartite_set_operations() {
    arbtest(|u| {
        let mut newest: Option<u8> = None;
        let mut older: BTreeSet<u8> = BTreeSet::new();
        let mut set = BipartiteSet::new();
        let ops: Vec<SetOp> = u.arbitrary()?;

        for op in ops {
            match op {
                SetOp::Insert(x) => {
                    if newest != Some(x) && !older.contains(&x) {
                        older.extend(newest.replace(x));
                    }
                    set = set.insert(x);
                }
                SetOp::Remove(x) => {
                    if newest == Some(x) {
                        newest = None;
                    } else if older.remove(&x) {
                        older.extend(newest.take());
                    }
                    set = set.remove(&x);
                }
            }

            assert_eq!(set.newest(), newest.as_ref());
            assert_eq!(
                set.older().keys().copied().collect::<Vec<_>>(),
                older.iter().copied().collect::<Vec<_>>()
            );
        }

        Ok(())
    });
}
