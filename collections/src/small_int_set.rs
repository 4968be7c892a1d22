//! An append-only set of small integers that can be shared between threads
//! without locks.
//!
//! The set is a chain of nodes with four slots each. A slot starts out holding
//! [`SENTINEL`] and is claimed with a single compare-and-swap; once claimed it
//! never changes again. When every slot is taken, a new node is published at
//! the end of the chain, exactly once.
//!
//! This is intended for sets that stay small (a few dozen members at most):
//! lookups are linear in the number of members.
use std::{
    fmt,
    sync::atomic::{AtomicI32, Ordering},
};

use once_cell::sync::OnceCell;

use crate::metrics::increment;

/// The value marking an unoccupied slot. It can never be a member of the set.
pub const SENTINEL: i32 = i32::MIN;

const SLOTS: usize = 4;

struct Node {
    slots: [AtomicI32; SLOTS],
    next: OnceCell<Box<Node>>,
}

impl Node {
    fn new() -> Self {
        Node {
            slots: std::array::from_fn(|_| AtomicI32::new(SENTINEL)),
            next: OnceCell::new(),
        }
    }

    fn with_value(value: i32) -> Self {
        let node = Node::new();
        node.slots[0].store(value, Ordering::Relaxed);
        node
    }

    fn contains(&self, value: i32) -> bool {
        let [a, b, c, d] = &self.slots;
        // No short-circuiting: at this size a wasted comparison is cheaper than a branch.
        (a.load(Ordering::Acquire) == value)
            | (b.load(Ordering::Acquire) == value)
            | (c.load(Ordering::Acquire) == value)
            | (d.load(Ordering::Acquire) == value)
    }
}

/// A lock-free, append-only set of `i32`s.
///
/// Every method takes `&self`: readers never wait and writers only ever retry
/// when they lose a race against another writer. Values can't be removed.
pub struct ConcurrentSmallIntSet {
    head: Node,
}

impl ConcurrentSmallIntSet {
    pub fn new() -> Self {
        ConcurrentSmallIntSet { head: Node::new() }
    }

    /// Creates a set containing just `value`.
    pub fn with_value(value: i32) -> Self {
        debug_assert_ne!(value, SENTINEL, "the sentinel can't be stored");
        ConcurrentSmallIntSet {
            head: Node::with_value(value),
        }
    }

    /// Is `value` a member of the set?
    ///
    /// Once this returns `true` for some value, it returns `true` forever.
    pub fn contains(&self, value: i32) -> bool {
        debug_assert_ne!(value, SENTINEL, "the sentinel is never a member");
        let mut node = &self.head;
        loop {
            if node.contains(value) {
                return true;
            }
            match node.next.get() {
                Some(next) => node = next.as_ref(),
                None => return false,
            }
        }
    }

    /// Adds `value` to the set.
    ///
    /// Returns `true` if this call inserted the value and `false` if it was
    /// already present, including when a concurrent call inserted it first.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use compiler_collections::ConcurrentSmallIntSet;
    /// let set = ConcurrentSmallIntSet::new();
    /// assert!(set.add(7));
    /// assert!(!set.add(7));
    /// assert!(set.contains(7));
    /// ```
    pub fn add(&self, value: i32) -> bool {
        debug_assert_ne!(value, SENTINEL, "the sentinel can't be stored");
        let mut node = &self.head;
        loop {
            for slot in &node.slots {
                let mut current = slot.load(Ordering::Acquire);
                if current == SENTINEL {
                    match slot.compare_exchange(
                        SENTINEL,
                        value,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return true,
                        Err(winner) => {
                            increment!("ConcurrentSmallIntSet::lost_slot_race");
                            current = winner;
                        }
                    }
                }
                if current == value {
                    return false;
                }
            }

            match node.next.get() {
                Some(next) => node = next.as_ref(),
                None => match node.next.try_insert(Box::new(Node::with_value(value))) {
                    Ok(_) => return true,
                    Err((winner, _ours)) => {
                        // Someone else extended the chain first; their node may
                        // well hold `value`, so keep scanning from there.
                        increment!("ConcurrentSmallIntSet::lost_append_race");
                        node = winner.as_ref();
                    }
                },
            }
        }
    }

    /// Iterates over the members in insertion order (as far as concurrent
    /// insertions allow talking about an order).
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            node: Some(&self.head),
            slot: 0,
        }
    }

    /// The number of members at the time of the call.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl Default for ConcurrentSmallIntSet {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConcurrentSmallIntSet {
    fn drop(&mut self) {
        // Unlink the chain iteratively so that long chains can't overflow the stack.
        let mut next = self.head.next.take();
        while let Some(mut node) = next {
            next = node.next.take();
        }
    }
}

impl fmt::Debug for ConcurrentSmallIntSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<i32> for ConcurrentSmallIntSet {
    fn from_iter<I: IntoIterator<Item = i32>>(iter: I) -> Self {
        let ret = ConcurrentSmallIntSet::new();
        for value in iter {
            ret.add(value);
        }
        ret
    }
}

/// The iterator returned by [`ConcurrentSmallIntSet::iter`].
pub struct Iter<'a> {
    node: Option<&'a Node>,
    slot: usize,
}

impl Iterator for Iter<'_> {
    type Item = i32;

    fn next(&mut self) -> Option<i32> {
        while let Some(node) = self.node {
            if self.slot < SLOTS {
                let value = node.slots[self.slot].load(Ordering::Acquire);
                self.slot += 1;
                if value != SENTINEL {
                    return Some(value);
                }
            } else {
                self.node = node.next.get().map(|next| next.as_ref());
                self.slot = 0;
            }
        }
        None
    }
}
