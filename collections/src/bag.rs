//! An unordered collection shared between worker threads.
use std::fmt;

use crossbeam::queue::SegQueue;

/// A lock-free bag: any number of threads may add and take items
/// concurrently. No ordering is promised between items.
///
/// Parallel passes use it to collect diagnostics or work items without a
/// lock.
pub struct ConcurrentBag<T> {
    items: SegQueue<T>,
}

impl<T> ConcurrentBag<T> {
    pub fn new() -> Self {
        ConcurrentBag {
            items: SegQueue::new(),
        }
    }

    pub fn add(&self, item: T) {
        self.items.push(item);
    }

    /// Takes some item out of the bag, or returns `None` if it's empty.
    pub fn try_take(&self) -> Option<T> {
        self.items.pop()
    }

    /// The number of items. Other threads may change it right after it is
    /// read.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Takes every item currently in the bag.
    pub fn drain(&self) -> impl Iterator<Item = T> + '_ {
        std::iter::from_fn(|| self.items.pop())
    }

    pub fn into_vec(self) -> Vec<T> {
        self.drain().collect()
    }
}

impl<T> Default for ConcurrentBag<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ConcurrentBag<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentBag")
            .field("len", &self.len())
            .finish()
    }
}

impl<T> FromIterator<T> for ConcurrentBag<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let ret = ConcurrentBag::new();
        for item in iter {
            ret.add(item);
        }
        ret
    }
}

impl<T> Extend<T> for ConcurrentBag<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.add(item);
        }
    }
}
