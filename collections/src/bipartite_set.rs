//! A persistent set that keeps its most recently added element apart.
use std::{fmt, iter::FusedIterator};

use crate::ordered_index::{self, OrderedIndex};

/// A persistent set split into the element added last (the "newest" one) and
/// everything else (the "older" ones).
///
/// Scopes use this to cheaply answer "what did I just declare?" while still
/// looking names up in everything declared before.
///
/// # Examples
///
/// ```rust
/// # use compiler_collections::BipartiteSet;
/// let set = BipartiteSet::new().insert("a").insert("b");
/// assert_eq!(set.newest(), Some(&"b"));
/// assert!(set.older().contains_key(&"a"));
///
/// // Removing an older element folds the newest one into the older part.
/// let set = set.remove(&"a");
/// assert_eq!(set.newest(), None);
/// assert!(set.contains(&"b"));
/// ```
pub struct BipartiteSet<T> {
    newest: Option<T>,
    older: OrderedIndex<T, ()>,
}

impl<T> BipartiteSet<T> {
    pub fn new() -> Self {
        BipartiteSet {
            newest: None,
            older: OrderedIndex::new(),
        }
    }

    pub fn newest(&self) -> Option<&T> {
        self.newest.as_ref()
    }

    /// Every element except the newest one, in order.
    pub fn older(&self) -> &OrderedIndex<T, ()> {
        &self.older
    }

    pub fn len(&self) -> usize {
        self.older.len() + usize::from(self.newest.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.newest.is_none() && self.older.is_empty()
    }

    /// Iterates over the newest element first, then over the older ones in
    /// order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            newest: self.newest.as_ref(),
            older: self.older.iter(),
        }
    }
}

impl<T: Ord> BipartiteSet<T> {
    pub fn contains(&self, item: &T) -> bool {
        self.newest.as_ref() == Some(item) || self.older.contains_key(item)
    }
}

impl<T: Ord + Clone> BipartiteSet<T> {
    /// Returns a set where `item` is the newest element and the previous
    /// newest element (if any) has become an older one. If `item` is already
    /// in the set, the set is returned as is.
    pub fn insert(&self, item: T) -> Self {
        if self.contains(&item) {
            return self.clone();
        }
        let older = match &self.newest {
            Some(newest) => self.older.insert(newest.clone(), ()),
            None => self.older.clone(),
        };
        BipartiteSet {
            newest: Some(item),
            older,
        }
    }

    /// Returns a set without `item`.
    ///
    /// Removing an older element also moves the newest element into the older
    /// part, so the resulting set has no newest element.
    pub fn remove(&self, item: &T) -> Self {
        if self.newest.as_ref() == Some(item) {
            return BipartiteSet {
                newest: None,
                older: self.older.clone(),
            };
        }
        if !self.older.contains_key(item) {
            return self.clone();
        }

        let older = self.older.remove(item);
        let older = match &self.newest {
            Some(newest) => older.insert(newest.clone(), ()),
            None => older,
        };
        BipartiteSet {
            newest: None,
            older,
        }
    }
}

impl<T: Clone> Clone for BipartiteSet<T> {
    fn clone(&self) -> Self {
        BipartiteSet {
            newest: self.newest.clone(),
            older: self.older.clone(),
        }
    }
}

impl<T> Default for BipartiteSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PartialEq> PartialEq for BipartiteSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.newest == other.newest && self.older == other.older
    }
}

impl<T: Eq> Eq for BipartiteSet<T> {}

impl<T: fmt::Debug> fmt::Debug for BipartiteSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BipartiteSet")
            .field("newest", &self.newest)
            .field("older", &DebugKeys(&self.older))
            .finish()
    }
}

struct DebugKeys<'a, T>(&'a OrderedIndex<T, ()>);

impl<T: fmt::Debug> fmt::Debug for DebugKeys<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

impl<'a, T> IntoIterator for &'a BipartiteSet<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// The iterator returned by [`BipartiteSet::iter`].
pub struct Iter<'a, T> {
    newest: Option<&'a T>,
    older: ordered_index::Iter<'a, T, ()>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        self.newest
            .take()
            .or_else(|| self.older.next().map(|(item, _)| item))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.older.len() + usize::from(self.newest.is_some());
        (len, Some(len))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

impl<T> FusedIterator for Iter<'_, T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn older(set: &BipartiteSet<&'static str>) -> Vec<&'static str> {
        set.older().keys().copied().collect()
    }

    #[test]
    fn insert_demotes_newest() {
        let empty = BipartiteSet::new();
        let a = empty.insert("a");
        assert_eq!(a.newest(), Some(&"a"));
        assert!(a.older().is_empty());

        let ab = a.insert("b");
        assert_eq!(ab.newest(), Some(&"b"));
        assert_eq!(older(&ab), vec!["a"]);

        // The previous versions are untouched.
        assert!(empty.is_empty());
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn insert_existing_is_noop() {
        let set = BipartiteSet::new().insert("a").insert("b");
        assert_eq!(set.insert("a"), set);
        assert_eq!(set.insert("b"), set);
    }

    #[test]
    fn remove_newest() {
        let set = BipartiteSet::new().insert("a").insert("b").remove(&"b");
        assert_eq!(set.newest(), None);
        assert_eq!(older(&set), vec!["a"]);
    }

    #[test]
    fn remove_older_consolidates() {
        let set = BipartiteSet::new().insert("a").insert("b").insert("c");
        let removed = set.remove(&"a");
        assert_eq!(removed.newest(), None);
        assert_eq!(older(&removed), vec!["b", "c"]);
        assert_eq!(removed.len(), 2);
    }

    #[test]
    fn older_removal_consolidates_instead_of_keeping_newest() {
        let set = BipartiteSet::new().insert("x").insert("y");
        assert_eq!(set.newest(), Some(&"y"));
        assert_eq!(older(&set), vec!["x"]);

        let removed = set.remove(&"x");
        assert_eq!(removed.newest(), None);
        assert_eq!(older(&removed), vec!["y"]);
        assert!(removed.contains(&"y"));
    }

    #[test]
    fn add_then_remove_is_empty() {
        let set = BipartiteSet::new().insert("x").remove(&"x");
        assert_eq!(set, BipartiteSet::new());
        assert!(set.is_empty());
    }

    #[test]
    fn remove_absent_is_noop() {
        let set = BipartiteSet::new().insert("a").insert("b");
        assert_eq!(set.remove(&"z"), set);
    }

    #[test]
    fn iterates_newest_first() {
        let set = BipartiteSet::new().insert(3).insert(1).insert(2);
        let items: Vec<_> = set.iter().copied().collect();
        assert_eq!(items, vec![2, 1, 3]);
        assert_eq!(set.iter().len(), 3);
        assert!(set.contains(&3));
        assert!(!set.contains(&4));
    }
}
