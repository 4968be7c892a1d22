//! This crate provides the collections that a compiler front end builds its
//! symbol tables, scopes and incremental syntax trees out of.
//!
//! The persistent structures never mutate a published node: every "mutation"
//! returns a new value that shares the untouched parts with the old one, so any
//! number of versions can be read concurrently from any number of threads.
//!
//! - [`OrderedIndex`] is a persistent, key-ordered map with ordinal lookup
//!   (think "symbol index sorted by name").
//! - [`Rope`] is a persistent sequence with cheap insertion and removal in the
//!   middle (think "source buffer" or "list of syntax nodes").
//! - [`BipartiteSet`] is a persistent set that remembers which element was
//!   added last.
//!
//! The mutable ones are tuned for the hot paths of a binding pass:
//!
//! - [`SmallMap`] is an AVL tree over hash codes, meant to be filled once and
//!   then read many times.
//! - [`BitVector`] is a growable bit set for flow analysis.
//! - [`ConcurrentSmallIntSet`] is an append-only, lock-free set of small
//!   integers.
//!
//! Finally, [`pool`], [`views`] and [`bag`] contain thin adapters layered on
//! top of the standard collections.

pub mod bag;
pub mod bipartite_set;
pub mod bit_vector;
pub mod error;
pub(crate) mod metrics;
pub mod ordered_index;
mod partition;
pub mod pool;
pub mod rope;
pub mod small_int_set;
pub mod small_map;
pub mod views;

pub use bag::ConcurrentBag;
pub use bipartite_set::BipartiteSet;
pub use bit_vector::BitVector;
pub use error::{Error, Result};
pub use ordered_index::OrderedIndex;
pub use pool::{HashSetPool, PoolConfig, PooledHashSet};
pub use rope::Rope;
pub use small_int_set::ConcurrentSmallIntSet;
pub use small_map::SmallMap;
pub use views::{ReadOnlySet, SetLike, UnionView};
