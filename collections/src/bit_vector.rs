//! A growable bit vector for flow analysis.
//!
//! Flow analyses track one bit per variable or slot, and most methods only
//! have a handful of those. [`BitVector`] therefore stores its first word
//! inline and only touches the heap once more than [`BITS_PER_WORD`] bits are
//! needed.
use std::{fmt, iter::FusedIterator, ops::Index};

type Word = u64;

/// The number of bits stored in each backing word.
pub const BITS_PER_WORD: usize = Word::BITS as usize;

fn words_for_capacity(capacity: usize) -> usize {
    capacity.div_ceil(BITS_PER_WORD)
}

/// A mask selecting the bits of the last word that are below `capacity`.
fn last_word_mask(capacity: usize) -> Word {
    match capacity % BITS_PER_WORD {
        0 => !0,
        rem => (1 << rem) - 1,
    }
}

/// A mutable, growable vector of bits.
///
/// Reads past the capacity return `false` rather than panicking, and writes
/// past the capacity grow the vector. Two bit vectors are equal when they have
/// the same capacity and the same bits.
///
/// `BitVector` is a plain value: cloning it copies every word, and mutating it
/// requires unique access.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct BitVector {
    /// Bits `0..BITS_PER_WORD`.
    bits0: Word,
    /// Every following word. Invariant: `bits.len() + 1 >= words_for_capacity(capacity)`.
    bits: Vec<Word>,
    capacity: usize,
}

impl BitVector {
    /// A bit vector that can't hold anything; it doesn't allocate.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a bit vector with room for at least `capacity` bits, all unset.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use compiler_collections::BitVector;
    /// let bits = BitVector::new(100);
    /// assert_eq!(bits.capacity(), 100);
    /// assert!(!bits.get(42));
    /// ```
    pub fn new(capacity: usize) -> Self {
        BitVector {
            bits0: 0,
            bits: vec![0; words_for_capacity(capacity).saturating_sub(1)],
            capacity,
        }
    }

    /// Creates a bit vector in which exactly the bits `0..capacity` are set.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use compiler_collections::BitVector;
    /// let bits = BitVector::all_set(70);
    /// assert!(bits.get(0) && bits.get(69));
    /// assert!(!bits.get(70));
    /// ```
    pub fn all_set(capacity: usize) -> Self {
        let mut ret = Self::new(capacity);
        ret.set_all();
        ret
    }

    /// The number of bits this vector can address without growing.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn word(&self, idx: usize) -> Word {
        match idx {
            0 => self.bits0,
            _ => self.bits.get(idx - 1).copied().unwrap_or(0),
        }
    }

    fn word_mut(&mut self, idx: usize) -> &mut Word {
        match idx {
            0 => &mut self.bits0,
            _ => &mut self.bits[idx - 1],
        }
    }

    fn word_count(&self) -> usize {
        self.bits.len() + 1
    }

    /// All the backing words, starting with the one holding bit zero.
    pub fn words(&self) -> impl Iterator<Item = Word> + '_ {
        std::iter::once(self.bits0).chain(self.bits.iter().copied())
    }

    /// Grows the vector so that it can hold at least `capacity` bits. Never shrinks.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        if capacity <= self.capacity {
            return;
        }
        let needed = words_for_capacity(capacity).saturating_sub(1);
        if needed > self.bits.len() {
            self.bits.resize(needed, 0);
        }
        self.capacity = capacity;
    }

    /// Reads a bit. Anything at or past the capacity reads as `false`.
    pub fn get(&self, idx: usize) -> bool {
        if idx >= self.capacity {
            return false;
        }
        self.word(idx / BITS_PER_WORD) & (1 << (idx % BITS_PER_WORD)) != 0
    }

    /// Sets or clears a bit, growing the vector first if `idx` is past the capacity.
    pub fn set(&mut self, idx: usize, value: bool) {
        if idx >= self.capacity {
            self.ensure_capacity(idx + 1);
        }
        let mask = 1 << (idx % BITS_PER_WORD);
        let word = self.word_mut(idx / BITS_PER_WORD);
        if value {
            *word |= mask;
        } else {
            *word &= !mask;
        }
    }

    /// Sets every bit below the capacity.
    pub fn set_all(&mut self) {
        let words = words_for_capacity(self.capacity);
        if words == 0 {
            return;
        }
        for idx in 0..words {
            *self.word_mut(idx) = !0;
        }
        *self.word_mut(words - 1) &= last_word_mask(self.capacity);
    }

    /// Clears every bit, keeping the capacity.
    pub fn clear(&mut self) {
        self.bits0 = 0;
        self.bits.fill(0);
    }

    /// Flips every bit below the capacity.
    pub fn invert(&mut self) {
        let words = words_for_capacity(self.capacity);
        if words == 0 {
            return;
        }
        for idx in 0..words {
            let word = self.word_mut(idx);
            *word = !*word;
        }
        *self.word_mut(words - 1) &= last_word_mask(self.capacity);
    }

    /// Is any bit set?
    pub fn any(&self) -> bool {
        self.words().any(|w| w != 0)
    }

    /// Keeps only the bits that are also set in `other`. Bits past the end of
    /// `other` are considered unset.
    ///
    /// Returns `true` if any bit changed.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use compiler_collections::BitVector;
    /// let mut a = BitVector::all_set(10);
    /// let mut b = BitVector::new(5);
    /// b.set(3, true);
    /// assert!(a.intersect_with(&b));
    /// assert_eq!(a.true_bits().collect::<Vec<_>>(), vec![3]);
    /// assert!(!a.intersect_with(&b));
    /// ```
    pub fn intersect_with(&mut self, other: &BitVector) -> bool {
        let mut changed = false;
        for idx in 0..self.word_count() {
            let word = self.word_mut(idx);
            let new_word = *word & other.word(idx);
            changed |= new_word != *word;
            *word = new_word;
        }
        changed
    }

    /// Sets every bit that is set in `other`, growing to `other`'s capacity if
    /// it is larger.
    ///
    /// Returns `true` if any bit changed.
    pub fn union_with(&mut self, other: &BitVector) -> bool {
        self.ensure_capacity(other.capacity);
        let mut changed = false;
        for (idx, other_word) in other.words().enumerate() {
            if idx >= self.word_count() {
                // `other` carries words that are entirely past its capacity; they hold nothing.
                debug_assert_eq!(other_word, 0);
                break;
            }
            let word = self.word_mut(idx);
            let new_word = *word | other_word;
            changed |= new_word != *word;
            *word = new_word;
        }
        changed
    }

    /// Iterates over the indices of the set bits, in ascending order.
    ///
    /// Iteration stops at the capacity, even if stray bits are set above it.
    /// The iterator borrows the vector and can be cloned to restart from its
    /// current position.
    pub fn true_bits(&self) -> TrueBits<'_> {
        TrueBits {
            vector: self,
            word_idx: 0,
            word: if self.capacity == 0 { 0 } else { self.bits0 },
        }
    }
}

impl Index<usize> for BitVector {
    type Output = bool;

    fn index(&self, index: usize) -> &Self::Output {
        if self.get(index) {
            &true
        } else {
            &false
        }
    }
}

impl fmt::Display for BitVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for idx in 0..self.capacity {
            f.write_str(if self.get(idx) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl FromIterator<bool> for BitVector {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let mut ret = BitVector::empty();
        for (idx, bit) in iter.into_iter().enumerate() {
            ret.set(idx, bit);
        }
        ret
    }
}

/// The iterator returned by [`BitVector::true_bits`].
#[derive(Clone, Debug)]
pub struct TrueBits<'a> {
    vector: &'a BitVector,
    word_idx: usize,
    /// The bits of the current word that haven't been yielded yet.
    word: Word,
}

impl Iterator for TrueBits<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let words = words_for_capacity(self.vector.capacity);
        loop {
            if self.word != 0 {
                let bit = self.word.trailing_zeros() as usize;
                self.word &= self.word - 1;
                let idx = self.word_idx * BITS_PER_WORD + bit;
                if idx >= self.vector.capacity {
                    self.word = 0;
                    self.word_idx = words;
                    return None;
                }
                return Some(idx);
            }
            if self.word_idx + 1 >= words {
                self.word_idx = words;
                return None;
            }
            self.word_idx += 1;
            self.word = self.vector.word(self.word_idx);
        }
    }
}

impl FusedIterator for TrueBits<'_> {}
