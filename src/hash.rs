//! Deterministic hashing utilities.
//!
//! Frame checksums and event payload hashes must agree across processes,
//! platforms, and runs. `std::collections::hash_map::DefaultHasher` is seeded
//! randomly and hashes integers in native byte order, so neither property holds.
//! [`DeterministicHasher`] is FNV-1a (64-bit) with every integer write pinned to
//! little-endian.
//!
//! # Usage
//!
//! ```
//! use fortress_lockstep::hash::{fnv1a_bytes, fnv1a_hash, DeterministicHasher};
//! use std::hash::Hasher;
//!
//! let mut hasher = DeterministicHasher::new();
//! hasher.write(b"hello");
//! assert_eq!(hasher.finish(), fnv1a_bytes(b"hello"));
//!
//! // Hashing the same value twice always yields the same result.
//! assert_eq!(fnv1a_hash(&(7u32, "jump")), fnv1a_hash(&(7u32, "jump")));
//! ```
//!
//! Note: FNV-1a is NOT cryptographically secure. It detects divergence; it does
//! not authenticate peers.

use std::hash::{Hash, Hasher};

/// FNV-1a 64-bit offset basis constant.
pub const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

/// FNV-1a 64-bit prime constant.
pub const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// A deterministic hasher using the FNV-1a algorithm.
///
/// Integer writes use little-endian byte order regardless of the host, so a
/// value hashed on one peer produces the same digest on every other peer.
#[derive(Debug, Clone)]
pub struct DeterministicHasher {
    state: u64,
}

impl DeterministicHasher {
    /// Creates a new `DeterministicHasher` with the standard FNV-1a offset basis.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: FNV_OFFSET_BASIS,
        }
    }

    /// Continues hashing from a previously finished state.
    #[inline]
    #[must_use]
    pub const fn with_state(state: u64) -> Self {
        Self { state }
    }
}

impl Default for DeterministicHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for DeterministicHasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.state
    }

    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= u64::from(byte);
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }

    #[inline]
    fn write_u16(&mut self, i: u16) {
        self.write(&i.to_le_bytes());
    }

    #[inline]
    fn write_u32(&mut self, i: u32) {
        self.write(&i.to_le_bytes());
    }

    #[inline]
    fn write_u64(&mut self, i: u64) {
        self.write(&i.to_le_bytes());
    }

    #[inline]
    fn write_u128(&mut self, i: u128) {
        self.write(&i.to_le_bytes());
    }

    // usize is widened so 32-bit and 64-bit peers agree.
    #[inline]
    fn write_usize(&mut self, i: usize) {
        self.write(&(i as u64).to_le_bytes());
    }

    #[inline]
    fn write_i16(&mut self, i: i16) {
        self.write(&i.to_le_bytes());
    }

    #[inline]
    fn write_i32(&mut self, i: i32) {
        self.write(&i.to_le_bytes());
    }

    #[inline]
    fn write_i64(&mut self, i: i64) {
        self.write(&i.to_le_bytes());
    }

    #[inline]
    fn write_i128(&mut self, i: i128) {
        self.write(&i.to_le_bytes());
    }

    #[inline]
    fn write_isize(&mut self, i: isize) {
        self.write(&(i as i64).to_le_bytes());
    }
}

/// Computes a deterministic FNV-1a hash of the given value.
#[inline]
pub fn fnv1a_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DeterministicHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Computes the FNV-1a hash of a raw byte slice.
///
/// Unlike [`fnv1a_hash`] on a slice, no length prefix is mixed in.
#[inline]
#[must_use]
pub fn fnv1a_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = DeterministicHasher::new();
    hasher.write(bytes);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_hasher_consistency() {
        assert_eq!(fnv1a_hash(&42u32), fnv1a_hash(&42u32));
        assert_ne!(fnv1a_hash(&42u32), fnv1a_hash(&43u32));
    }

    #[test]
    fn test_empty_input_is_offset_basis() {
        assert_eq!(fnv1a_bytes(&[]), FNV_OFFSET_BASIS);
    }

    #[test]
    fn test_known_vector() {
        // Published FNV-1a 64 test vector for "a".
        assert_eq!(fnv1a_bytes(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_integer_writes_are_little_endian() {
        let mut a = DeterministicHasher::new();
        a.write_u32(0x0102_0304);
        let mut b = DeterministicHasher::new();
        b.write(&[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn test_usize_matches_u64() {
        let mut a = DeterministicHasher::new();
        a.write_usize(99);
        let mut b = DeterministicHasher::new();
        b.write_u64(99);
        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn test_with_state_continues_stream() {
        let mut whole = DeterministicHasher::new();
        whole.write(b"abcdef");

        let mut first = DeterministicHasher::new();
        first.write(b"abc");
        let mut second = DeterministicHasher::with_state(first.finish());
        second.write(b"def");

        assert_eq!(whole.finish(), second.finish());
    }
}
