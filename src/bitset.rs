//! Fixed-width bit vectors used for the per-frame enabled-systems mask.
//!
//! The width is a compile-time constant so the mask has the same size (and the
//! same serialized bytes) on every peer regardless of how many systems are
//! registered. Indices beyond the width are rejected with
//! [`SystemIndexReason::OutOfRange`] rather than silently ignored.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LockstepError, SystemIndexReason};

/// A fixed-width bit vector of `WORDS * 64` bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BitSet<const WORDS: usize> {
    #[serde(with = "words_serde")]
    words: [u64; WORDS],
}

/// 64 enable bits.
pub type BitSet64 = BitSet<1>;
/// 128 enable bits.
pub type BitSet128 = BitSet<2>;
/// 256 enable bits; the width used by [`FrameState`](crate::frame_state::FrameState).
pub type BitSet256 = BitSet<4>;
/// 512 enable bits.
pub type BitSet512 = BitSet<8>;

impl<const WORDS: usize> BitSet<WORDS> {
    /// Number of addressable bits.
    pub const CAPACITY: usize = WORDS * 64;

    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self { words: [0; WORDS] }
    }

    /// Creates a set with bits `0..count` set.
    pub fn with_first(count: usize) -> Result<Self, LockstepError> {
        if count > Self::CAPACITY {
            return Err(SystemIndexReason::TooManySystems {
                count,
                capacity: Self::CAPACITY,
            }
            .into());
        }
        let mut set = Self::new();
        for index in 0..count {
            set.insert_unchecked(index);
        }
        Ok(set)
    }

    fn check(index: usize) -> Result<(), LockstepError> {
        if index >= Self::CAPACITY {
            return Err(SystemIndexReason::OutOfRange {
                index,
                capacity: Self::CAPACITY,
            }
            .into());
        }
        Ok(())
    }

    fn insert_unchecked(&mut self, index: usize) {
        if let Some(word) = self.words.get_mut(index / 64) {
            *word |= 1 << (index % 64);
        }
    }

    /// Sets or clears one bit.
    pub fn set_bit(&mut self, index: usize, value: bool) -> Result<(), LockstepError> {
        Self::check(index)?;
        if let Some(word) = self.words.get_mut(index / 64) {
            let mask = 1u64 << (index % 64);
            if value {
                *word |= mask;
            } else {
                *word &= !mask;
            }
        }
        Ok(())
    }

    /// Returns whether a bit is set. Out-of-range indices read as unset.
    #[must_use]
    pub fn bit(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .is_some_and(|word| word & (1 << (index % 64)) != 0)
    }

    /// Number of set bits.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Whether no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Clears every bit.
    pub fn clear(&mut self) {
        self.words = [0; WORDS];
    }

    /// Iterates set bit indices in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(w, word)| {
            let mut bits = *word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let tz = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(w * 64 + tz)
            })
        })
    }

    /// The backing words, least significant first.
    #[must_use]
    pub const fn words(&self) -> &[u64; WORDS] {
        &self.words
    }

    /// Rebuilds a set from its backing words.
    #[must_use]
    pub const fn from_words(words: [u64; WORDS]) -> Self {
        Self { words }
    }

    /// Little-endian byte image, used by the frame visitor.
    pub fn to_le_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.words.iter().flat_map(|w| w.to_le_bytes())
    }
}

impl<const WORDS: usize> Default for BitSet<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const WORDS: usize> fmt::Debug for BitSet<WORDS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter_ones()).finish()
    }
}

// serde only derives arrays up to length 32 and needs help with const generics.
mod words_serde {
    use serde::de::{Error, SeqAccess, Visitor};
    use serde::ser::SerializeTuple;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S, const N: usize>(words: &[u64; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut tuple = serializer.serialize_tuple(N)?;
        for word in words {
            tuple.serialize_element(word)?;
        }
        tuple.end()
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u64; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        struct WordsVisitor<const N: usize>;

        impl<'de, const N: usize> Visitor<'de> for WordsVisitor<N> {
            type Value = [u64; N];

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} u64 words", N)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut words = [0u64; N];
                for (i, slot) in words.iter_mut().enumerate() {
                    *slot = seq
                        .next_element()?
                        .ok_or_else(|| A::Error::invalid_length(i, &self))?;
                }
                Ok(words)
            }
        }

        deserializer.deserialize_tuple(N, WordsVisitor::<N>)
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear_across_words() {
        let mut set = BitSet256::new();
        set.set_bit(0, true).unwrap();
        set.set_bit(63, true).unwrap();
        set.set_bit(64, true).unwrap();
        set.set_bit(255, true).unwrap();
        assert_eq!(set.count_ones(), 4);
        assert!(set.bit(64));
        set.set_bit(64, false).unwrap();
        assert!(!set.bit(64));
        assert_eq!(set.iter_ones().collect::<Vec<_>>(), vec![0, 63, 255]);
    }

    #[test]
    fn out_of_range_is_an_error() {
        let mut set = BitSet64::new();
        let err = set.set_bit(64, true).unwrap_err();
        assert_eq!(
            err,
            LockstepError::SystemIndex {
                reason: SystemIndexReason::OutOfRange {
                    index: 64,
                    capacity: 64
                }
            }
        );
        assert!(!set.bit(1000));
    }

    #[test]
    fn with_first_fills_prefix() {
        let set = BitSet128::with_first(70).unwrap();
        assert_eq!(set.count_ones(), 70);
        assert!(set.bit(69));
        assert!(!set.bit(70));
        assert!(BitSet64::with_first(65).is_err());
    }

    #[test]
    fn serde_round_trip_keeps_width() {
        let mut set = BitSet512::new();
        set.set_bit(300, true).unwrap();
        let bytes = crate::codec::encode(&set).unwrap();
        assert_eq!(bytes.len(), 64);
        let back: BitSet512 = crate::codec::decode_exact(&bytes).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn le_bytes_match_words() {
        let set = BitSet64::from_words([0x0102]);
        let bytes: Vec<u8> = set.to_le_bytes().collect();
        assert_eq!(bytes[..2], [0x02, 0x01]);
    }

    mod properties {
        use super::*;
        use crate::test_config::miri_case_count;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: miri_case_count(),
                ..ProptestConfig::default()
            })]

            #[test]
            fn prop_set_bits_are_exactly_the_ones_iterated(
                bits in proptest::collection::btree_set(0usize..256, 0..64)
            ) {
                let mut set = BitSet256::new();
                for &bit in &bits {
                    set.set_bit(bit, true).unwrap();
                }
                prop_assert_eq!(set.count_ones(), bits.len());
                prop_assert_eq!(set.iter_ones().collect::<Vec<_>>(), bits.iter().copied().collect::<Vec<_>>());
                let back = BitSet256::from_words(*set.words());
                prop_assert_eq!(back, set);
            }
        }
    }
}
