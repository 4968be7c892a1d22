//! Errors reported by the collections.
//!
//! Only contract violations that a caller may want to propagate are reported as
//! values. Benign absence (a missing key, a read past the end of a bit vector)
//! is expressed with `Option` or `bool` instead.

/// A violated contract of one of the collections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Error {
    /// [`SmallMap::add`](crate::SmallMap::add) was called with a key that is
    /// already present.
    #[error("an entry with the same key has already been added")]
    DuplicateKey,
    /// A positional lookup was made outside of `0..len`.
    #[error("index {index} is out of range for a collection of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
