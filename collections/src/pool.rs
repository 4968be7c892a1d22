//! Recycling of scratch hash sets.
//!
//! Binding passes allocate many short-lived sets (candidate symbols, visited
//! nodes...). A [`HashSetPool`] hands out sets that are cleared and given back
//! to the pool when the [`PooledHashSet`] guard is dropped, so their storage
//! is reused.
use std::{
    cell::RefCell,
    collections::{hash_map::RandomState, HashSet},
    fmt,
    hash::{BuildHasher, Hash},
    ops::{Deref, DerefMut},
};

use crate::metrics::{increment, sample};

/// Limits applied by a [`HashSetPool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// The maximum number of idle sets kept by the pool. Sets returned to a
    /// full pool are dropped.
    pub max_pooled: usize,
    /// Sets whose capacity grew past this are dropped instead of being
    /// returned, so that one unusually large set doesn't stay around forever.
    pub max_retained_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_pooled: 32,
            max_retained_capacity: 512,
        }
    }
}

/// A pool of empty hash sets.
///
/// The pool is meant to be owned by a single thread (typically one per
/// compilation worker); it isn't `Sync`.
pub struct HashSetPool<T, S = RandomState> {
    free: RefCell<Vec<HashSet<T, S>>>,
    config: PoolConfig,
}

impl<T, S> HashSetPool<T, S> {
    pub fn with_config(config: PoolConfig) -> Self {
        HashSetPool {
            free: RefCell::new(Vec::new()),
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// The number of idle sets currently held by the pool.
    pub fn idle(&self) -> usize {
        self.free.borrow().len()
    }
}

impl<T> HashSetPool<T> {
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }
}

impl<T, S: Default> Default for HashSetPool<T, S> {
    fn default() -> Self {
        Self::with_config(PoolConfig::default())
    }
}

impl<T, S: Default> HashSetPool<T, S> {
    /// Takes an empty set out of the pool, allocating a new one if the pool
    /// has none.
    pub fn rent(&self) -> PooledHashSet<'_, T, S> {
        let set = match self.free.borrow_mut().pop() {
            Some(set) => {
                increment!("HashSetPool::hit");
                set
            }
            None => {
                increment!("HashSetPool::miss");
                HashSet::default()
            }
        };
        PooledHashSet {
            set: Some(set),
            pool: self,
        }
    }
}

impl<T, S> HashSetPool<T, S> {
    fn give_back(&self, mut set: HashSet<T, S>) {
        if set.capacity() > self.config.max_retained_capacity {
            log::trace!("dropping pooled set of capacity {}", set.capacity());
            increment!("HashSetPool::oversized");
            return;
        }

        let mut free = self.free.borrow_mut();
        if free.len() >= self.config.max_pooled {
            log::trace!("hash set pool is full ({} sets)", free.len());
            increment!("HashSetPool::overflow");
            return;
        }
        set.clear();
        free.push(set);
        sample!("HashSetPool.idle", free.len() as f64);
    }
}

impl<T, S> fmt::Debug for HashSetPool<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashSetPool")
            .field("idle", &self.idle())
            .field("config", &self.config)
            .finish()
    }
}

/// A hash set rented from a [`HashSetPool`]. It is returned to the pool when
/// dropped.
pub struct PooledHashSet<'a, T, S = RandomState> {
    /// Only `None` once the set has been taken out of the guard.
    set: Option<HashSet<T, S>>,
    pool: &'a HashSetPool<T, S>,
}

impl<T, S> PooledHashSet<'_, T, S> {
    /// Takes the set out of the guard. It won't go back to the pool.
    pub fn into_inner(mut self) -> HashSet<T, S> {
        self.set.take().expect("pooled set already taken")
    }
}

impl<T, S> Deref for PooledHashSet<'_, T, S> {
    type Target = HashSet<T, S>;

    fn deref(&self) -> &Self::Target {
        self.set.as_ref().expect("pooled set already taken")
    }
}

impl<T, S> DerefMut for PooledHashSet<'_, T, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.set.as_mut().expect("pooled set already taken")
    }
}

impl<T, S> Drop for PooledHashSet<'_, T, S> {
    fn drop(&mut self) {
        if let Some(set) = self.set.take() {
            self.pool.give_back(set);
        }
    }
}

impl<T: fmt::Debug, S> fmt::Debug for PooledHashSet<'_, T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T: Eq + Hash, S: BuildHasher> Extend<T> for PooledHashSet<'_, T, S> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        (**self).extend(iter)
    }
}
