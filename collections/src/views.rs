//! Read-only views over sets.
//!
//! [`SetLike`] abstracts over the collections that can answer membership
//! queries. [`ReadOnlySet`] hides the mutating API of a set behind a borrow,
//! and [`UnionView`] presents several disjoint sets as one without copying
//! them.
use std::{
    collections::{BTreeSet, HashSet},
    fmt,
    hash::{BuildHasher, Hash},
};

use once_cell::unsync::OnceCell;

use crate::{BipartiteSet, OrderedIndex};

/// A collection answering membership queries.
pub trait SetLike<T> {
    fn contains(&self, item: &T) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over the elements, in no particular order.
    fn items(&self) -> Box<dyn Iterator<Item = &T> + '_>;
}

impl<T: Eq + Hash, S: BuildHasher> SetLike<T> for HashSet<T, S> {
    fn contains(&self, item: &T) -> bool {
        HashSet::contains(self, item)
    }

    fn len(&self) -> usize {
        HashSet::len(self)
    }

    fn items(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        Box::new(self.iter())
    }
}

impl<T: Ord> SetLike<T> for BTreeSet<T> {
    fn contains(&self, item: &T) -> bool {
        BTreeSet::contains(self, item)
    }

    fn len(&self) -> usize {
        BTreeSet::len(self)
    }

    fn items(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        Box::new(self.iter())
    }
}

/// Membership in a vector is a linear scan; this is meant for short vectors.
impl<T: PartialEq> SetLike<T> for Vec<T> {
    fn contains(&self, item: &T) -> bool {
        self.as_slice().contains(item)
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn items(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        Box::new(self.iter())
    }
}

impl<T: Ord> SetLike<T> for BipartiteSet<T> {
    fn contains(&self, item: &T) -> bool {
        BipartiteSet::contains(self, item)
    }

    fn len(&self) -> usize {
        BipartiteSet::len(self)
    }

    fn items(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        Box::new(self.iter())
    }
}

/// The keys of an index form a set.
impl<K: Ord, V> SetLike<K> for OrderedIndex<K, V> {
    fn contains(&self, item: &K) -> bool {
        self.contains_key(item)
    }

    fn len(&self) -> usize {
        OrderedIndex::len(self)
    }

    fn items(&self) -> Box<dyn Iterator<Item = &K> + '_> {
        Box::new(self.keys())
    }
}

/// A borrowed set that can only be read.
pub struct ReadOnlySet<'a, T> {
    inner: &'a dyn SetLike<T>,
}

impl<'a, T> ReadOnlySet<'a, T> {
    pub fn new(inner: &'a dyn SetLike<T>) -> Self {
        ReadOnlySet { inner }
    }

    pub fn contains(&self, item: &T) -> bool {
        self.inner.contains(item)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a T> + 'a {
        self.inner.items()
    }
}

impl<T> Clone for ReadOnlySet<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ReadOnlySet<'_, T> {}

impl<T> SetLike<T> for ReadOnlySet<'_, T> {
    fn contains(&self, item: &T) -> bool {
        self.inner.contains(item)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn items(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        self.inner.items()
    }
}

impl<T: fmt::Debug> fmt::Debug for ReadOnlySet<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// The union of several sets, which are assumed to be pairwise disjoint.
///
/// # Examples
///
/// ```rust
/// # use std::collections::{BTreeSet, HashSet};
/// # use compiler_collections::{SetLike, UnionView};
/// let locals: HashSet<&str> = ["x", "y"].into_iter().collect();
/// let globals: BTreeSet<&str> = ["main"].into_iter().collect();
/// let scopes: Vec<&dyn SetLike<&str>> = vec![&locals, &globals];
/// let visible = UnionView::new(scopes);
/// assert!(visible.contains(&"main"));
/// assert_eq!(visible.len(), 3);
/// ```
pub struct UnionView<'a, T> {
    members: Vec<&'a dyn SetLike<T>>,
    len: OnceCell<usize>,
}

impl<'a, T> UnionView<'a, T> {
    pub fn new(members: Vec<&'a dyn SetLike<T>>) -> Self {
        UnionView {
            members,
            len: OnceCell::new(),
        }
    }

    pub fn members(&self) -> &[&'a dyn SetLike<T>] {
        &self.members
    }

    pub fn contains(&self, item: &T) -> bool {
        self.members.iter().any(|m| m.contains(item))
    }

    /// The sum of the lengths of the members. It is computed once.
    pub fn len(&self) -> usize {
        *self
            .len
            .get_or_init(|| self.members.iter().map(|m| m.len()).sum())
    }

    pub fn is_empty(&self) -> bool {
        self.members.iter().all(|m| m.is_empty())
    }

    /// Iterates over the elements of each member in turn.
    pub fn iter(&self) -> impl Iterator<Item = &'a T> + '_ {
        self.members.iter().flat_map(|&m| m.items())
    }
}

impl<T> SetLike<T> for UnionView<'_, T> {
    fn contains(&self, item: &T) -> bool {
        UnionView::contains(self, item)
    }

    fn len(&self) -> usize {
        UnionView::len(self)
    }

    fn items(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        Box::new(self.members.iter().flat_map(|m| m.items()))
    }
}

impl<T: fmt::Debug> fmt::Debug for UnionView<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
