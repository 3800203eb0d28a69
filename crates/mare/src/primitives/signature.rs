// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Group signatures: a sparse bitmap identifying a concrete or virtual
//! group. Each concrete group owns exactly one bit; a virtual group's
//! signature is the union of its constituents' bits, and membership is a
//! superset test.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

const WORD_BITS: usize = 64;

/// Process-wide allocator of group bits. Grows by doubling, mirroring the
/// original's lazily-growing dense bitmap rather than fixing a compile-time
/// bit count.
#[derive(Debug)]
pub struct SignatureAllocator {
    next_bit: AtomicUsize,
    words: std::sync::Mutex<Vec<Arc<AtomicU64>>>,
}

impl SignatureAllocator {
    pub fn new() -> Self {
        Self {
            next_bit: AtomicUsize::new(0),
            words: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Allocates the next free bit, growing the backing word array as
    /// needed, and returns a single-bit [`Signature`].
    pub fn alloc(&self) -> Signature {
        let bit = self.next_bit.fetch_add(1, Ordering::Relaxed);
        let word_idx = bit / WORD_BITS;
        {
            let mut words = self.words.lock().unwrap();
            while words.len() <= word_idx {
                words.push(Arc::new(AtomicU64::new(0)));
            }
        }
        let mut sig = Signature::empty();
        sig.set_bit(word_idx, bit % WORD_BITS);
        sig
    }
}

impl Default for SignatureAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// A sparse bitmap over group bits. Small signatures (the overwhelmingly
/// common case: one concrete group, or a handful joined) store their words
/// inline; this never needs to reach back into the allocator to test
/// membership or compute a union.
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash)]
pub struct Signature {
    words: Vec<u64>,
}

impl Signature {
    pub fn empty() -> Self {
        Self { words: Vec::new() }
    }

    fn set_bit(&mut self, word_idx: usize, bit_idx: usize) {
        if self.words.len() <= word_idx {
            self.words.resize(word_idx + 1, 0);
        }
        self.words[word_idx] |= 1u64 << bit_idx;
    }

    /// The union of `self` and `other`'s bits: the signature of the virtual
    /// group `self & other`.
    pub fn union(&self, other: &Signature) -> Signature {
        let len = self.words.len().max(other.words.len());
        let mut words = vec![0u64; len];
        for (i, w) in self.words.iter().enumerate() {
            words[i] |= w;
        }
        for (i, w) in other.words.iter().enumerate() {
            words[i] |= w;
        }
        Signature { words }
    }

    pub fn union_assign(&mut self, other: &Signature) {
        if self.words.len() < other.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (i, w) in other.words.iter().enumerate() {
            self.words[i] |= w;
        }
    }

    /// `true` if `self` contains every bit set in `other` (i.e. `self` is a
    /// superset of `other`). This is the join-membership test of spec §4.2.
    pub fn is_superset_of(&self, other: &Signature) -> bool {
        for (i, w) in other.words.iter().enumerate() {
            let mine = self.words.get(i).copied().unwrap_or(0);
            if mine & w != *w {
                return false;
            }
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// A stable hash used to shard the unlaunched-task cache. Plain FNV-1a
    /// fold over the words: the signature is already a handful of `u64`s, no
    /// crate needed for hashing that.
    pub fn shard_hash(&self) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for w in &self.words {
            for byte in w.to_le_bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x1000_0000_01b3);
            }
        }
        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_signature_is_union_and_superset_test_works() {
        let alloc = SignatureAllocator::new();
        let a = alloc.alloc();
        let b = alloc.alloc();
        let joined = a.union(&b);

        assert!(joined.is_superset_of(&a));
        assert!(joined.is_superset_of(&b));
        assert!(!a.is_superset_of(&b));

        let mut member = a.clone();
        member.union_assign(&b);
        assert!(member.is_superset_of(&joined));
    }

    #[test]
    fn allocator_grows_past_one_word() {
        let alloc = SignatureAllocator::new();
        let mut sigs = Vec::new();
        for _ in 0..130 {
            sigs.push(alloc.alloc());
        }
        assert!(sigs.last().unwrap().words.len() >= 3);
        for (i, s) in sigs.iter().enumerate() {
            for (j, t) in sigs.iter().enumerate() {
                if i != j {
                    assert!(!s.is_superset_of(t));
                }
            }
        }
    }

    fn sig_from_words(words: Vec<u64>) -> Signature {
        Signature { words }
    }

    proptest::proptest! {
        /// Union is commutative and its result is a superset of both operands,
        /// for arbitrary word vectors (not just allocator-issued single bits).
        #[test]
        fn union_is_commutative_and_superset(a in proptest::collection::vec(proptest::num::u64::ANY, 0..4),
                                              b in proptest::collection::vec(proptest::num::u64::ANY, 0..4)) {
            let sa = sig_from_words(a);
            let sb = sig_from_words(b);
            let ab = sa.union(&sb);
            let ba = sb.union(&sa);
            proptest::prop_assert_eq!(&ab, &ba);
            proptest::prop_assert!(ab.is_superset_of(&sa));
            proptest::prop_assert!(ab.is_superset_of(&sb));
        }
    }
}
