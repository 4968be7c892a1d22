//! A persistent, key-ordered map with positional lookup.
//!
//! [`OrderedIndex`] is a B-tree in which every bucket is either a single
//! key/value pair (a leaf) or an ordered run of at most [`MAX_BUCKETS`] child
//! buckets that caches its total count and its smallest key. All leaves are at
//! the same depth.
//!
//! Buckets are immutable and shared through `Arc`: an insertion or removal
//! rebuilds the path from the root to the affected leaf and reuses everything
//! else, so older versions of the index stay valid and can keep being read
//! from other threads.
use std::{
    borrow::Borrow,
    cmp::Ordering,
    fmt,
    iter::{FusedIterator, Peekable},
    sync::Arc,
};

use imbl_sized_chunks::Chunk;
use smallvec::{smallvec, SmallVec};

use crate::{
    error::{Error, Result},
    metrics::increment,
    partition::even_ranges,
};

/// The maximum number of children of an interior bucket.
pub const MAX_BUCKETS: usize = 7;

/// Interior buckets other than the root have at least this many children.
const MIN_BUCKETS: usize = 3;

type Children<K, V> = Chunk<Arc<Bucket<K, V>>, MAX_BUCKETS>;

/// Replacement buckets returned when rebuilding a path. Usually one, two when
/// a bucket overflowed and was split.
type Replacement<K, V> = SmallVec<[Arc<Bucket<K, V>>; 2]>;

#[derive(Debug)]
enum Bucket<K, V> {
    Leaf {
        key: K,
        value: V,
    },
    Node {
        children: Children<K, V>,
        count: usize,
        min_key: K,
    },
}

enum Removed<K, V> {
    /// The key wasn't there; nothing changed.
    Absent,
    /// The bucket lost its last entry.
    Emptied,
    Replaced(Arc<Bucket<K, V>>),
}

impl<K, V> Bucket<K, V> {
    fn count(&self) -> usize {
        match self {
            Bucket::Leaf { .. } => 1,
            Bucket::Node { count, .. } => *count,
        }
    }

    fn min_key(&self) -> &K {
        match self {
            Bucket::Leaf { key, .. } => key,
            Bucket::Node { min_key, .. } => min_key,
        }
    }

    /// The position of the child whose key range would contain `key`, or
    /// `None` if `key` is smaller than every key in `children`.
    fn child_index<Q>(children: &[Arc<Bucket<K, V>>], key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        children
            .partition_point(|c| <K as Borrow<Q>>::borrow(c.min_key()) <= key)
            .checked_sub(1)
    }
}

impl<K: Clone, V> Bucket<K, V> {
    fn node(children: Children<K, V>) -> Self {
        debug_assert!(!children.is_empty());
        Bucket::Node {
            count: children.iter().map(|c| c.count()).sum(),
            min_key: children[0].min_key().clone(),
            children,
        }
    }

    /// Packs a run of sibling buckets into as few interior buckets as
    /// possible, splitting evenly when they don't fit in one.
    fn pack(siblings: &[Arc<Bucket<K, V>>]) -> Replacement<K, V> {
        let ret: Replacement<K, V> = even_ranges(siblings.len(), MAX_BUCKETS)
            .map(|range| Arc::new(Bucket::node(siblings[range].iter().cloned().collect())))
            .collect();
        if ret.len() > 1 {
            increment!("OrderedIndex::split");
        }
        ret
    }
}

impl<K: Ord + Clone, V> Bucket<K, V> {
    fn insert(self: &Arc<Self>, key: K, value: V) -> Replacement<K, V> {
        match self.as_ref() {
            Bucket::Leaf { key: existing, .. } => {
                let ordering = key.cmp(existing);
                let leaf = Arc::new(Bucket::Leaf { key, value });
                match ordering {
                    Ordering::Equal => smallvec![leaf],
                    Ordering::Less => smallvec![leaf, Arc::clone(self)],
                    Ordering::Greater => smallvec![Arc::clone(self), leaf],
                }
            }
            Bucket::Node { children, .. } => {
                // Keys smaller than everything go to the first child.
                let idx = Bucket::child_index(children, &key).unwrap_or(0);
                let replacement = children[idx].insert(key, value);

                let mut siblings = Vec::with_capacity(children.len() + 1);
                siblings.extend(children[..idx].iter().cloned());
                siblings.extend(replacement);
                siblings.extend(children[idx + 1..].iter().cloned());
                Bucket::pack(&siblings)
            }
        }
    }

    fn remove<Q>(&self, key: &Q) -> Removed<K, V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        match self {
            Bucket::Leaf { key: existing, .. } => {
                if <K as Borrow<Q>>::borrow(existing) == key {
                    Removed::Emptied
                } else {
                    Removed::Absent
                }
            }
            Bucket::Node { children, .. } => {
                let Some(idx) = Bucket::child_index(children, key) else {
                    return Removed::Absent;
                };
                let mut siblings: Vec<_> = children.iter().cloned().collect();
                match children[idx].remove(key) {
                    Removed::Absent => return Removed::Absent,
                    Removed::Emptied => {
                        siblings.remove(idx);
                        if siblings.is_empty() {
                            return Removed::Emptied;
                        }
                    }
                    Removed::Replaced(child) => {
                        let underfull = matches!(
                            child.as_ref(),
                            Bucket::Node { children, .. } if children.len() < MIN_BUCKETS
                        );
                        siblings[idx] = child;
                        if underfull && siblings.len() > 1 {
                            let lo = idx.saturating_sub(1).min(siblings.len() - 2);
                            let merged = Bucket::merge(&siblings[lo], &siblings[lo + 1]);
                            siblings.splice(lo..lo + 2, merged);
                        }
                    }
                }
                Removed::Replaced(Arc::new(Bucket::node(siblings.into_iter().collect())))
            }
        }
    }

    /// Merges two adjacent interior buckets, splitting the result again if it
    /// doesn't fit in one.
    fn merge(left: &Arc<Self>, right: &Arc<Self>) -> Replacement<K, V> {
        let (Bucket::Node { children: l, .. }, Bucket::Node { children: r, .. }) =
            (left.as_ref(), right.as_ref())
        else {
            unreachable!("siblings of an interior bucket are interior buckets");
        };
        increment!("OrderedIndex::merge");
        let siblings: Vec<_> = l.iter().chain(r.iter()).cloned().collect();
        Bucket::pack(&siblings)
    }
}

/// A persistent map whose entries are ordered by key and can also be
/// addressed by their position in that order.
///
/// Cloning is cheap, and so is keeping old versions around: every method that
/// changes the index returns a new one and leaves `self` untouched.
///
/// # Examples
///
/// ```rust
/// # use compiler_collections::OrderedIndex;
/// let a = OrderedIndex::new().insert(1, "x");
/// let b = a.insert(2, "y");
/// assert_eq!(a.len(), 1);
/// assert_eq!(b.len(), 2);
/// assert_eq!(b.get_at(1), Ok((&2, &"y")));
/// assert_eq!(b.index_of(&2), Some(1));
/// ```
pub struct OrderedIndex<K, V> {
    root: Option<Arc<Bucket<K, V>>>,
}

impl<K, V> OrderedIndex<K, V> {
    /// The empty index. It doesn't allocate.
    pub fn new() -> Self {
        OrderedIndex { root: None }
    }

    pub fn len(&self) -> usize {
        self.root.as_ref().map_or(0, |r| r.count())
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Iterates over the entries in ascending key order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            stack: Vec::new(),
            root: self.root.as_deref(),
            remaining: self.len(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, v)| v)
    }

    /// The entry at position `index` in key order.
    ///
    /// Fails with [`Error::IndexOutOfRange`] unless `index < self.len()`.
    pub fn get_at(&self, index: usize) -> Result<(&K, &V)> {
        let len = self.len();
        let Some(mut bucket) = self.root.as_deref().filter(|_| index < len) else {
            return Err(Error::IndexOutOfRange { index, len });
        };
        let mut rest = index;
        loop {
            match bucket {
                Bucket::Leaf { key, value } => return Ok((key, value)),
                Bucket::Node { children, .. } => {
                    bucket = children
                        .iter()
                        .find(|c| {
                            if rest < c.count() {
                                true
                            } else {
                                rest -= c.count();
                                false
                            }
                        })
                        .expect("cached counts are consistent")
                        .as_ref();
                }
            }
        }
    }

    pub fn key_at(&self, index: usize) -> Result<&K> {
        self.get_at(index).map(|(k, _)| k)
    }

    pub fn value_at(&self, index: usize) -> Result<&V> {
        self.get_at(index).map(|(_, v)| v)
    }

    /// The entry with the smallest key.
    pub fn first(&self) -> Option<(&K, &V)> {
        self.get_at(0).ok()
    }

    /// The entry with the largest key.
    pub fn last(&self) -> Option<(&K, &V)> {
        self.len().checked_sub(1).and_then(|i| self.get_at(i).ok())
    }
}

impl<K: Ord, V> OrderedIndex<K, V> {
    fn find<Q>(&self, key: &Q) -> Option<(usize, &K, &V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut bucket = self.root.as_deref()?;
        let mut offset = 0;
        loop {
            match bucket {
                Bucket::Leaf { key: k, value } => {
                    return (<K as Borrow<Q>>::borrow(k) == key).then_some((offset, k, value));
                }
                Bucket::Node { children, .. } => {
                    let idx = Bucket::child_index(children, key)?;
                    offset += children[..idx].iter().map(|c| c.count()).sum::<usize>();
                    bucket = children[idx].as_ref();
                }
            }
        }
    }

    /// Looks up the value associated with `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.find(key).map(|(_, _, v)| v)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.find(key).is_some()
    }

    /// The position of `key` in key order, if it is present.
    pub fn index_of<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.find(key).map(|(i, _, _)| i)
    }
}

impl<K: Ord + Clone, V: Clone> OrderedIndex<K, V> {
    /// Returns an index with `key` mapped to `value`. If `key` is already
    /// present its value is replaced.
    pub fn insert(&self, key: K, value: V) -> Self {
        let Some(root) = &self.root else {
            return OrderedIndex {
                root: Some(Arc::new(Bucket::Leaf { key, value })),
            };
        };
        let replacement = root.insert(key, value);
        let root = match replacement.len() {
            1 => replacement.into_iter().next(),
            _ => Some(Arc::new(Bucket::node(replacement.into_iter().collect()))),
        };
        OrderedIndex { root }
    }

    /// Returns an index without `key`. Removing a missing key returns an
    /// index equal to `self`.
    pub fn remove<Q>(&self, key: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let Some(root) = &self.root else {
            return OrderedIndex::new();
        };
        match root.remove(key) {
            Removed::Absent => self.clone(),
            Removed::Emptied => OrderedIndex::new(),
            Removed::Replaced(mut root) => {
                // Collapse roots that are left with a single child.
                while let Bucket::Node { children, .. } = root.as_ref() {
                    if children.len() > 1 {
                        break;
                    }
                    root = Arc::clone(&children[0]);
                }
                OrderedIndex { root: Some(root) }
            }
        }
    }

    /// Returns an index with all of `pairs` added.
    ///
    /// If `pairs` mentions a key more than once, the last occurrence wins; new
    /// pairs also win over entries already in `self`. The result is built in
    /// one go rather than by repeated insertion.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use compiler_collections::OrderedIndex;
    /// let index = OrderedIndex::new().insert_all([(1, "a"), (1, "b"), (2, "c")]);
    /// assert_eq!(index.len(), 2);
    /// assert_eq!(index.get(&1), Some(&"b"));
    /// ```
    pub fn insert_all<I: IntoIterator<Item = (K, V)>>(&self, pairs: I) -> Self {
        let mut incoming: Vec<(K, V)> = pairs.into_iter().collect();
        if incoming.is_empty() {
            return self.clone();
        }
        sort_and_dedup(&mut incoming);
        if self.is_empty() {
            return Self::construct(incoming);
        }

        let existing = self.iter().map(|(k, v)| (k.clone(), v.clone()));
        Self::construct(merge_sorted(existing, incoming.into_iter()).collect())
    }

    /// Builds an index out of pairs that are sorted by key, without duplicates.
    fn construct(pairs: Vec<(K, V)>) -> Self {
        fn build_level<K: Clone, V>(level: Vec<Arc<Bucket<K, V>>>) -> Option<Arc<Bucket<K, V>>> {
            if level.len() <= 1 {
                return level.into_iter().next();
            }
            let parents = even_ranges(level.len(), MAX_BUCKETS)
                .map(|range| Arc::new(Bucket::node(level[range].iter().cloned().collect())))
                .collect();
            build_level(parents)
        }

        log::debug!("constructing an ordered index of {} entries", pairs.len());
        let leaves = pairs
            .into_iter()
            .map(|(key, value)| Arc::new(Bucket::Leaf { key, value }))
            .collect();
        OrderedIndex {
            root: build_level(leaves),
        }
    }

    /// Checks the structural invariants, panicking if any of them is violated.
    pub fn check_invariants(&self) {
        /// Returns the depth of the subtree.
        fn check<K: Ord, V>(bucket: &Bucket<K, V>, is_root: bool) -> usize {
            match bucket {
                Bucket::Leaf { .. } => 0,
                Bucket::Node {
                    children,
                    count,
                    min_key,
                } => {
                    assert!(children.len() <= MAX_BUCKETS);
                    if is_root {
                        assert!(children.len() >= 2, "root with a single child");
                    } else {
                        assert!(children.len() >= MIN_BUCKETS, "underfull bucket");
                    }
                    assert_eq!(*count, children.iter().map(|c| c.count()).sum::<usize>());
                    assert!(min_key == children[0].min_key());
                    assert!(children.windows(2).all(|w| w[0].min_key() < w[1].min_key()));
                    let depth = check(&children[0], false);
                    for c in children.iter().skip(1) {
                        assert_eq!(check(c, false), depth, "leaves at different depths");
                    }
                    depth + 1
                }
            }
        }

        if let Some(root) = &self.root {
            check(root, true);
        }
        assert!(self.keys().zip(self.keys().skip(1)).all(|(a, b)| a < b));
        assert_eq!(self.iter().count(), self.len());
    }
}

/// Sorts `pairs` by key (unless they are sorted already) and keeps only the
/// last pair of every run of equal keys.
fn sort_and_dedup<K: Ord, V>(pairs: &mut Vec<(K, V)>) {
    if !pairs.windows(2).all(|w| w[0].0 <= w[1].0) {
        // The sort is stable, so "last" still means last in the input.
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
    }
    let mut deduped: Vec<(K, V)> = Vec::with_capacity(pairs.len());
    for (key, value) in pairs.drain(..) {
        match deduped.last_mut() {
            Some(last) if last.0 == key => *last = (key, value),
            _ => deduped.push((key, value)),
        }
    }
    *pairs = deduped;
}

/// Merges two sorted, deduplicated sequences of pairs. On equal keys, the
/// pair from `new` wins.
fn merge_sorted<K: Ord, V>(
    old: impl Iterator<Item = (K, V)>,
    new: impl Iterator<Item = (K, V)>,
) -> impl Iterator<Item = (K, V)> {
    struct Merge<A: Iterator, B: Iterator> {
        old: Peekable<A>,
        new: Peekable<B>,
    }

    impl<K: Ord, V, A, B> Iterator for Merge<A, B>
    where
        A: Iterator<Item = (K, V)>,
        B: Iterator<Item = (K, V)>,
    {
        type Item = (K, V);

        fn next(&mut self) -> Option<(K, V)> {
            let ordering = match (self.old.peek(), self.new.peek()) {
                (Some((a, _)), Some((b, _))) => a.cmp(b),
                (Some(_), None) => Ordering::Less,
                (None, _) => Ordering::Greater,
            };
            match ordering {
                Ordering::Less => self.old.next(),
                Ordering::Greater => self.new.next(),
                Ordering::Equal => {
                    self.old.next();
                    self.new.next()
                }
            }
        }
    }

    Merge {
        old: old.peekable(),
        new: new.peekable(),
    }
}

impl<K, V> Clone for OrderedIndex<K, V> {
    fn clone(&self) -> Self {
        OrderedIndex {
            root: self.root.clone(),
        }
    }
}

impl<K, V> Default for OrderedIndex<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: PartialEq, V: PartialEq> PartialEq for OrderedIndex<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl<K: Eq, V: Eq> Eq for OrderedIndex<K, V> {}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for OrderedIndex<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Ord + Clone, V: Clone> FromIterator<(K, V)> for OrderedIndex<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        OrderedIndex::new().insert_all(iter)
    }
}

impl<'a, K, V> IntoIterator for &'a OrderedIndex<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: serde::Serialize, V: serde::Serialize> serde::Serialize for OrderedIndex<K, V> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_map(self.iter())
    }
}

impl<'de, K, V> serde::Deserialize<'de> for OrderedIndex<K, V>
where
    K: Ord + Clone + serde::Deserialize<'de>,
    V: Clone + serde::Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let map = std::collections::BTreeMap::<K, V>::deserialize(deserializer)?;
        Ok(map.into_iter().collect())
    }
}

/// The iterator returned by [`OrderedIndex::iter`].
#[derive(Clone)]
pub struct Iter<'a, K, V> {
    stack: Vec<std::slice::Iter<'a, Arc<Bucket<K, V>>>>,
    /// The root, until the first call to `next`.
    root: Option<&'a Bucket<K, V>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let mut bucket = match self.root.take() {
            Some(root) => root,
            None => loop {
                let top = self.stack.last_mut()?;
                match top.next() {
                    Some(next) => break next.as_ref(),
                    None => {
                        self.stack.pop();
                    }
                }
            },
        };

        loop {
            match bucket {
                Bucket::Leaf { key, value } => {
                    self.remaining -= 1;
                    return Some((key, value));
                }
                Bucket::Node { children, .. } => {
                    let mut children_iter = children.iter();
                    bucket = children_iter.next().expect("empty interior bucket").as_ref();
                    self.stack.push(children_iter);
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<K, V> FusedIterator for Iter<'_, K, V> {}
