//! A persistent sequence with cheap edits in the middle.
//!
//! A [`Rope`] is a tree of segments. Leaves hold contiguous runs of elements,
//! either in a small owned chunk or as a window into a large shared buffer
//! (a `Vec<T>`, or a `String` when `T` is `u8`). Interior segments hold up to
//! [`MAX_CHILDREN`] children and cache their total length. All leaves are at
//! the same depth.
//!
//! An edit descends to the leaf that owns the edited position, replaces it by
//! a short run of new leaves, and then rebalances that run against its
//! neighbours on the way back up: a segment that fell under the minimum size
//! is merged into a neighbour, or borrows just enough from it. Everything off
//! the edited path is shared with the previous version.
use std::{fmt, iter::FusedIterator, ops::Index, ops::Range, sync::Arc};

use imbl_sized_chunks::Chunk;
use smallvec::{smallvec, SmallVec};

use crate::{
    metrics::{increment, sample},
    partition::even_ranges,
};

/// The maximum length of a leaf that owns its elements.
pub const MAX_SIZE: usize = 32;

/// Leaves other than the root have at least this many elements.
pub const MIN_SIZE: usize = 8;

/// The maximum number of children of an interior segment.
pub const MAX_CHILDREN: usize = 8;

/// Interior segments other than the root have at least this many children.
const MIN_CHILDREN: usize = 4;

type Leaf<T> = Chunk<T, MAX_SIZE>;

/// A buffer that shared leaves can point into.
type Source<T> = Arc<dyn AsRef<[T]> + Send + Sync>;

enum Segment<T> {
    /// An owned run of at most `MAX_SIZE` elements.
    Array(Arc<Leaf<T>>),
    /// A window into a shared buffer. It may be longer than `MAX_SIZE`.
    Shared {
        source: Source<T>,
        start: usize,
        len: usize,
    },
    Tree(Arc<TreeSegment<T>>),
}

struct TreeSegment<T> {
    children: Chunk<Segment<T>, MAX_CHILDREN>,
    count: usize,
}

/// The result of balancing two neighbours: one or two segments.
type Pair<T> = SmallVec<[Segment<T>; 2]>;

impl<T> Clone for Segment<T> {
    fn clone(&self) -> Self {
        match self {
            Segment::Array(leaf) => Segment::Array(Arc::clone(leaf)),
            Segment::Shared { source, start, len } => Segment::Shared {
                source: Arc::clone(source),
                start: *start,
                len: *len,
            },
            Segment::Tree(tree) => Segment::Tree(Arc::clone(tree)),
        }
    }
}

impl<T> Segment<T> {
    fn len(&self) -> usize {
        match self {
            Segment::Array(leaf) => leaf.len(),
            Segment::Shared { len, .. } => *len,
            Segment::Tree(tree) => tree.count,
        }
    }

    fn is_underfull(&self) -> bool {
        match self {
            Segment::Tree(tree) => tree.children.len() < MIN_CHILDREN,
            leaf => leaf.len() < MIN_SIZE,
        }
    }

    /// The elements of a leaf segment.
    fn leaf_slice(&self) -> &[T] {
        match self {
            Segment::Array(leaf) => &leaf[..],
            Segment::Shared { source, start, len } => {
                &AsRef::<[T]>::as_ref(&**source)[*start..*start + *len]
            }
            Segment::Tree(_) => unreachable!("not a leaf segment"),
        }
    }

    fn tree(children: impl IntoIterator<Item = Segment<T>>) -> Self {
        let children: Chunk<Segment<T>, MAX_CHILDREN> = children.into_iter().collect();
        debug_assert!(!children.is_empty());
        Segment::Tree(Arc::new(TreeSegment {
            count: children.iter().map(Segment::len).sum(),
            children,
        }))
    }

    /// Groups a run of siblings under as few interior segments as possible.
    fn pack(siblings: Vec<Segment<T>>) -> Vec<Segment<T>> {
        let packed: Vec<_> = even_ranges(siblings.len(), MAX_CHILDREN)
            .map(|range| Segment::tree(siblings[range].iter().cloned()))
            .collect();
        if packed.len() > 1 {
            increment!("Rope::split");
        }
        packed
    }
}

impl<T> TreeSegment<T> {
    /// Finds the child containing position `index`, and the position relative
    /// to that child. `index == self.count` resolves to the end of the last
    /// child.
    fn locate(&self, index: usize) -> (usize, usize) {
        let mut rest = index;
        for (i, child) in self.children.iter().enumerate() {
            if rest < child.len() {
                return (i, rest);
            }
            rest -= child.len();
        }
        let last = self.children.len() - 1;
        (last, self.children[last].len() + rest)
    }
}

impl<T: Clone> Segment<T> {
    fn array(items: impl IntoIterator<Item = T>) -> Self {
        Segment::Array(Arc::new(items.into_iter().collect()))
    }

    /// A leaf holding the elements of this leaf within `range`. Shared leaves
    /// are narrowed without copying.
    fn sub_leaf(&self, range: Range<usize>) -> Self {
        match self {
            Segment::Array(leaf) if range == (0..leaf.len()) => self.clone(),
            Segment::Array(leaf) => Segment::array(leaf[range].iter().cloned()),
            Segment::Shared { source, start, .. } => Segment::Shared {
                source: Arc::clone(source),
                start: start + range.start,
                len: range.len(),
            },
            Segment::Tree(_) => unreachable!("not a leaf segment"),
        }
    }

    fn concat_leaves(left: &Self, right: &Self) -> Self {
        debug_assert!(left.len() + right.len() <= MAX_SIZE);
        Segment::array(
            left.leaf_slice()
                .iter()
                .chain(right.leaf_slice())
                .cloned(),
        )
    }

    /// Rebalances two neighbouring segments of the same depth.
    ///
    /// If neither is under the minimum size, they are left alone. Otherwise
    /// they are merged when they fit in one segment, and else the underfull one
    /// borrows the least it needs from the other.
    fn balance_with(self, right: Self) -> Pair<T> {
        if !self.is_underfull() && !right.is_underfull() {
            return smallvec![self, right];
        }
        increment!("Rope::rebalance");

        match (&self, &right) {
            (Segment::Tree(l), Segment::Tree(r)) => {
                let mut siblings: Vec<Segment<T>> = l.children.iter().cloned().collect();
                // The two children meeting at the seam may need balancing too.
                let seam = siblings.pop().expect("empty interior segment");
                let mut right_children = r.children.iter().cloned();
                let first = right_children.next().expect("empty interior segment");
                siblings.extend(seam.balance_with(first));
                siblings.extend(right_children);
                Segment::pack(siblings).into_iter().collect()
            }
            (Segment::Tree(_), _) | (_, Segment::Tree(_)) => {
                unreachable!("neighbouring segments have the same depth")
            }
            _ => {
                let (l, r) = (self.len(), right.len());
                if l + r <= MAX_SIZE {
                    smallvec![Segment::concat_leaves(&self, &right)]
                } else if l < MIN_SIZE {
                    let need = MIN_SIZE - l;
                    smallvec![
                        Segment::concat_leaves(&self, &right.sub_leaf(0..need)),
                        right.sub_leaf(need..r),
                    ]
                } else {
                    let need = MIN_SIZE - r;
                    smallvec![
                        self.sub_leaf(0..l - need),
                        Segment::concat_leaves(&self.sub_leaf(l - need..l), &right),
                    ]
                }
            }
        }
    }

    /// Rebalances a run of neighbouring segments of the same depth, dropping
    /// empty leaves.
    fn balance_run(run: impl IntoIterator<Item = Segment<T>>) -> Vec<Segment<T>> {
        let mut ret: Vec<Segment<T>> = Vec::new();
        for segment in run {
            if segment.len() == 0 {
                continue;
            }
            match ret.pop() {
                None => ret.push(segment),
                Some(prev) => ret.extend(prev.balance_with(segment)),
            }
        }
        ret
    }

    /// Returns the segments replacing this one after inserting the leaf `new`
    /// at `index`.
    fn insert(&self, index: usize, new: Segment<T>) -> Vec<Segment<T>> {
        match self {
            Segment::Tree(tree) => {
                let (child, offset) = tree.locate(index);
                let replacement = tree.children[child].insert(offset, new);
                tree.rebuild(child..child + 1, replacement)
            }
            leaf => Segment::balance_run([
                leaf.sub_leaf(0..index),
                new,
                leaf.sub_leaf(index..leaf.len()),
            ]),
        }
    }

    /// Returns the segments replacing this one after removing the elements
    /// in `range`, which is non-empty and within bounds.
    fn remove(&self, range: Range<usize>) -> Vec<Segment<T>> {
        match self {
            Segment::Tree(tree) => {
                let mut affected: Option<Range<usize>> = None;
                let mut replacement = Vec::new();
                let mut start = 0;
                for (i, child) in tree.children.iter().enumerate() {
                    let end = start + child.len();
                    if start < range.end && range.start < end {
                        let lo = range.start.max(start) - start;
                        let hi = range.end.min(end) - start;
                        // Children that are entirely covered just disappear.
                        if lo > 0 || hi < child.len() {
                            replacement.extend(child.remove(lo..hi));
                        }
                        affected = Some(affected.map_or(i..i + 1, |a| a.start..i + 1));
                    }
                    start = end;
                }
                let affected = affected.expect("removed range overlaps a child");
                tree.rebuild(affected, replacement)
            }
            leaf => Segment::balance_run([
                leaf.sub_leaf(0..range.start),
                leaf.sub_leaf(range.end..leaf.len()),
            ]),
        }
    }
}

impl<T: Clone> TreeSegment<T> {
    /// Replaces the children in `affected` by `replacement`, rebalances them
    /// against their immediate neighbours, and repacks the result.
    fn rebuild(&self, affected: Range<usize>, replacement: Vec<Segment<T>>) -> Vec<Segment<T>> {
        let lo = affected.start.saturating_sub(1);
        let hi = (affected.end + 1).min(self.children.len());
        sample!("Rope.rebuilt_run", (hi - lo) as f64);

        let run = self.children[lo..affected.start]
            .iter()
            .cloned()
            .chain(replacement)
            .chain(self.children[affected.end..hi].iter().cloned());
        let balanced = Segment::balance_run(run);

        let mut siblings = Vec::with_capacity(self.children.len() + 2);
        siblings.extend(self.children[..lo].iter().cloned());
        siblings.extend(balanced);
        siblings.extend(self.children[hi..].iter().cloned());
        Segment::pack(siblings)
    }
}

/// A persistent sequence supporting `O(log n)` insertion, removal and
/// slicing anywhere.
///
/// Every editing method returns a new rope and leaves `self` untouched; the
/// two share all the segments the edit didn't touch.
///
/// # Examples
///
/// ```rust
/// # use compiler_collections::Rope;
/// let rope: Rope<u32> = (0..100).collect();
/// let edited = rope.insert_at(50, 1000).remove_at(0, 10);
/// assert_eq!(rope.len(), 100);
/// assert_eq!(edited.len(), 91);
/// assert_eq!(edited[40], 1000);
/// ```
pub struct Rope<T> {
    root: Option<Segment<T>>,
}

impl<T> Rope<T> {
    /// The empty rope. It doesn't allocate.
    pub fn new() -> Self {
        Rope { root: None }
    }

    pub fn len(&self) -> usize {
        self.root.as_ref().map_or(0, Segment::len)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// The element at `index`, or `None` if `index >= self.len()`.
    pub fn get(&self, index: usize) -> Option<&T> {
        let mut segment = self.root.as_ref().filter(|r| index < r.len())?;
        let mut index = index;
        loop {
            match segment {
                Segment::Tree(tree) => {
                    let (child, offset) = tree.locate(index);
                    segment = &tree.children[child];
                    index = offset;
                }
                leaf => return leaf.leaf_slice().get(index),
            }
        }
    }

    /// Iterates over the elements, walking the leaves from left to right.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            stack: self
                .root
                .as_ref()
                .map(|root| std::slice::from_ref(root).iter())
                .into_iter()
                .collect(),
            leaf: [].iter(),
            remaining: self.len(),
        }
    }
}

impl<T: Clone> Rope<T> {
    /// Builds a rope out of the segments that replaced the old root.
    fn from_segments(mut level: Vec<Segment<T>>) -> Self {
        while level.len() > 1 {
            level = Segment::pack(level);
        }
        let Some(mut root) = level.pop() else {
            return Rope::new();
        };
        // The root may have been left with a single child; skip over it.
        while let Segment::Tree(tree) = &root {
            if tree.children.len() > 1 {
                break;
            }
            root = tree.children[0].clone();
        }
        Rope { root: Some(root) }
    }

    fn insert_leaf(&self, index: usize, leaf: Segment<T>) -> Self {
        match &self.root {
            None => Rope { root: Some(leaf) },
            Some(root) => {
                let segments = root.insert(index, leaf);
                if segments.len() > 1 {
                    log::debug!("rope root split into {} segments", segments.len());
                }
                Rope::from_segments(segments)
            }
        }
    }

    /// Returns a rope with `item` inserted at position `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index > self.len()`.
    pub fn insert_at(&self, index: usize, item: T) -> Self {
        assert!(index <= self.len(), "insertion index out of bounds");
        self.insert_leaf(index, Segment::array([item]))
    }

    /// Returns a rope with all of `items` inserted, in order, starting at
    /// position `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index > self.len()`.
    pub fn insert_all_at<I: IntoIterator<Item = T>>(&self, index: usize, items: I) -> Self {
        assert!(index <= self.len(), "insertion index out of bounds");
        let items: Vec<T> = items.into_iter().collect();
        if self.is_empty() {
            return Rope::from(items);
        }

        let mut ret = self.clone();
        let mut items = items.into_iter();
        let ranges: Vec<_> = even_ranges(items.len(), MAX_SIZE).collect();
        for range in ranges {
            let leaf = Segment::array(items.by_ref().take(range.len()));
            ret = ret.insert_leaf(index + range.start, leaf);
        }
        ret
    }

    /// Appends `item` at the end.
    pub fn push_back(&self, item: T) -> Self {
        self.insert_at(self.len(), item)
    }

    /// Returns a rope without the `length` elements starting at `index`. If
    /// fewer than `length` elements follow `index`, all of them are removed.
    ///
    /// # Panics
    ///
    /// Panics if `index > self.len()`.
    pub fn remove_at(&self, index: usize, length: usize) -> Self {
        let len = self.len();
        assert!(index <= len, "removal index out of bounds");
        let length = length.min(len - index);
        match &self.root {
            _ if length == 0 => self.clone(),
            Some(_) if length == len => Rope::new(),
            Some(root) => Rope::from_segments(root.remove(index..index + length)),
            None => unreachable!("an empty rope only supports empty removals"),
        }
    }

    /// Returns a rope with the element at `index` replaced by `item`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn replace_at(&self, index: usize, item: T) -> Self {
        assert!(index < self.len(), "index out of bounds");
        self.remove_at(index, 1).insert_at(index, item)
    }

    /// The sub-rope of (at most) `length` elements starting at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index > self.len()`.
    pub fn range(&self, index: usize, length: usize) -> Self {
        let len = self.len();
        assert!(index <= len, "range start out of bounds");
        let end = index.saturating_add(length).min(len);
        self.remove_at(end, len - end).remove_at(0, index)
    }

    /// Wraps the elements of a shared buffer within `range` into a rope.
    ///
    /// When the range covers a good part of the buffer, the rope points into
    /// the buffer instead of copying it. Otherwise the range is copied, so
    /// that a small rope doesn't keep a large buffer alive.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use std::sync::Arc;
    /// # use compiler_collections::Rope;
    /// let text = Arc::new("let x = 1;\n".repeat(20));
    /// let rope: Rope<u8> = Rope::from_shared(text.clone(), 0..text.len());
    /// assert_eq!(rope.len(), text.len());
    /// assert_eq!(rope[4], b'x');
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `range` is not within the buffer.
    pub fn from_shared<S>(source: Arc<S>, range: Range<usize>) -> Self
    where
        S: AsRef<[T]> + Send + Sync + 'static,
    {
        let items = AsRef::<[T]>::as_ref(&*source);
        assert!(range.start <= range.end && range.end <= items.len(), "range out of bounds");
        if range.len() <= MAX_SIZE || range.len() < items.len() / 2 {
            return Rope::from(items[range].to_vec());
        }
        log::trace!("sharing {} of {} buffer elements", range.len(), items.len());
        Rope {
            root: Some(Segment::Shared {
                source,
                start: range.start,
                len: range.len(),
            }),
        }
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    /// Checks the structural invariants, panicking if any of them is violated.
    pub fn check_invariants(&self) {
        /// Returns the depth of the subtree.
        fn check<T>(segment: &Segment<T>, is_root: bool) -> usize {
            match segment {
                Segment::Tree(tree) => {
                    let children = &tree.children;
                    assert!(children.len() <= MAX_CHILDREN);
                    if is_root {
                        assert!(children.len() >= 2, "root with a single child");
                    } else {
                        assert!(children.len() >= MIN_CHILDREN, "underfull interior segment");
                    }
                    assert_eq!(tree.count, children.iter().map(Segment::len).sum::<usize>());
                    let depth = check(&children[0], false);
                    for child in children.iter().skip(1) {
                        assert_eq!(check(child, false), depth, "leaves at different depths");
                    }
                    depth + 1
                }
                leaf => {
                    assert!(leaf.len() > 0, "empty leaf");
                    if let Segment::Array(items) = leaf {
                        assert!(items.len() <= MAX_SIZE);
                    }
                    if !is_root {
                        assert!(leaf.len() >= MIN_SIZE, "underfull leaf");
                    }
                    0
                }
            }
        }

        if let Some(root) = &self.root {
            check(root, true);
        }
        assert_eq!(self.iter().count(), self.len());
    }
}

impl<T> Clone for Rope<T> {
    fn clone(&self) -> Self {
        Rope {
            root: self.root.clone(),
        }
    }
}

impl<T> Default for Rope<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> From<Vec<T>> for Rope<T> {
    /// Short inputs become a single leaf; longer ones are cut into evenly
    /// sized leaves and packed into a balanced tree.
    fn from(items: Vec<T>) -> Self {
        if items.is_empty() {
            return Rope::new();
        }
        let ranges: Vec<_> = even_ranges(items.len(), MAX_SIZE).collect();
        let mut items = items.into_iter();
        let leaves = ranges
            .into_iter()
            .map(|range| Segment::array(items.by_ref().take(range.len())))
            .collect();
        Rope::from_segments(leaves)
    }
}

impl<T: Clone> FromIterator<T> for Rope<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Rope::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl<T> Index<usize> for Rope<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        self.get(index).expect("index out of bounds")
    }
}

impl<T: PartialEq> PartialEq for Rope<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl<T: Eq> Eq for Rope<T> {}

impl<T: fmt::Debug> fmt::Debug for Rope<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<'a, T> IntoIterator for &'a Rope<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: serde::Serialize> serde::Serialize for Rope<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeSeq;

        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for elt in self.iter() {
            seq.serialize_element(elt)?;
        }
        seq.end()
    }
}

impl<'de, T: Clone + serde::Deserialize<'de>> serde::Deserialize<'de> for Rope<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let vec: Vec<T> = Vec::deserialize(deserializer)?;
        Ok(Rope::from(vec))
    }
}

/// The iterator returned by [`Rope::iter`].
pub struct Iter<'a, T> {
    stack: Vec<std::slice::Iter<'a, Segment<T>>>,
    leaf: std::slice::Iter<'a, T>,
    remaining: usize,
}

impl<T> Clone for Iter<'_, T> {
    fn clone(&self) -> Self {
        Iter {
            stack: self.stack.clone(),
            leaf: self.leaf.clone(),
            remaining: self.remaining,
        }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(ret) = self.leaf.next() {
                self.remaining -= 1;
                return Some(ret);
            }
            match self.stack.last_mut()?.next() {
                None => {
                    self.stack.pop();
                }
                Some(Segment::Tree(tree)) => self.stack.push(tree.children.iter()),
                Some(leaf) => self.leaf = leaf.leaf_slice().iter(),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

impl<T> FusedIterator for Iter<'_, T> {}
