//! Deterministic random stream carried inside every frame.
//!
//! Gameplay systems draw randomness from the frame's [`Pcg32`] only. Its full
//! state (64-bit state plus stream increment) is part of the serialized frame and
//! of the checksum, so a rolled-back or replayed frame continues the exact same
//! sequence on every peer. There is deliberately no entropy-seeded constructor.
//!
//! PCG-XSH-RR with 64 bits of state, period 2^64. Reference: <https://www.pcg-random.org/>
//!
//! ```rust
//! use fortress_lockstep::rng::{Pcg32, Rng, SeedableRng};
//!
//! let mut a = Pcg32::seed_from_u64(12345);
//! let mut b = Pcg32::seed_from_u64(12345);
//! assert_eq!(a.gen_range(0..100), b.gen_range(0..100));
//! ```

use serde::{Deserialize, Serialize};

use crate::{
    report_violation,
    telemetry::{ViolationKind, ViolationSeverity},
};

/// PCG32 random number generator.
///
/// NOT cryptographically secure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pcg32 {
    state: u64,
    inc: u64,
}

/// Default stream for single-stream PCG32, from the PCG paper.
const PCG_DEFAULT_INCREMENT: u64 = 1442695040888963407;

/// Multiplier constant for the LCG step.
const PCG_MULTIPLIER: u64 = 6364136223846793005;

impl Pcg32 {
    /// Creates a new PCG32 generator with the given state and stream.
    ///
    /// The increment is derived as `(stream << 1) | 1` so it is always odd.
    #[must_use]
    pub const fn new(state: u64, stream: u64) -> Self {
        let inc = (stream << 1) | 1;
        let mut pcg = Self { state: 0, inc };
        pcg.state = pcg.state.wrapping_mul(PCG_MULTIPLIER).wrapping_add(pcg.inc);
        pcg.state = pcg.state.wrapping_add(state);
        pcg.state = pcg.state.wrapping_mul(PCG_MULTIPLIER).wrapping_add(pcg.inc);
        pcg
    }

    /// Rebuilds a generator from raw parts previously read with [`Pcg32::raw_parts`].
    ///
    /// Returns `None` if `inc` is even, which no generator built by [`Pcg32::new`] can have.
    #[must_use]
    pub const fn from_raw_parts(state: u64, inc: u64) -> Option<Self> {
        if inc & 1 == 0 {
            return None;
        }
        Some(Self { state, inc })
    }

    /// The `(state, increment)` pair that fully describes this generator.
    #[must_use]
    pub const fn raw_parts(&self) -> (u64, u64) {
        (self.state, self.inc)
    }

    /// Generates the next 32-bit random value.
    #[inline]
    #[must_use]
    pub fn next_u32(&mut self) -> u32 {
        let old_state = self.state;
        self.state = old_state
            .wrapping_mul(PCG_MULTIPLIER)
            .wrapping_add(self.inc);
        let xorshifted = (((old_state >> 18) ^ old_state) >> 27) as u32;
        let rot = (old_state >> 59) as u32;
        xorshifted.rotate_right(rot)
    }

    /// Generates the next 64-bit random value by combining two 32-bit values.
    #[inline]
    #[must_use]
    pub fn next_u64(&mut self) -> u64 {
        let high = u64::from(self.next_u32());
        let low = u64::from(self.next_u32());
        (high << 32) | low
    }
}

impl Default for Pcg32 {
    fn default() -> Self {
        Self::seed_from_u64(0)
    }
}

/// Trait for seeding random number generators.
pub trait SeedableRng: Sized {
    /// Creates a new RNG seeded from a 64-bit value.
    #[must_use]
    fn seed_from_u64(seed: u64) -> Self;
}

impl SeedableRng for Pcg32 {
    fn seed_from_u64(seed: u64) -> Self {
        Self::new(seed, PCG_DEFAULT_INCREMENT)
    }
}

/// Trait for random number generation.
pub trait Rng {
    /// Returns the next 32-bit random value.
    fn next_u32(&mut self) -> u32;

    /// Returns the next 64-bit random value.
    fn next_u64(&mut self) -> u64;

    /// Generates a random `u32` value in the given range `[low, high)`.
    ///
    /// # Empty Range Behavior
    /// If `range.is_empty()`, reports a violation via telemetry and returns `range.start`.
    fn gen_range(&mut self, range: std::ops::Range<u32>) -> u32 {
        let span = range.end.wrapping_sub(range.start);
        if span == 0 || range.end < range.start {
            report_violation!(
                ViolationSeverity::Error,
                ViolationKind::Configuration,
                "gen_range called with empty range [{}..{})",
                range.start,
                range.end
            );
            return range.start;
        }

        // Rejection sampling avoids modulo bias.
        let threshold = span.wrapping_neg() % span;
        loop {
            let random_value = self.next_u32();
            if random_value >= threshold {
                return range.start.wrapping_add(random_value % span);
            }
        }
    }

    /// Generates a random `i64` value in the given inclusive range `[low, high]`.
    ///
    /// # Empty Range Behavior
    /// If `start > end`, reports a violation via telemetry and returns `start`.
    fn gen_range_i64_inclusive(&mut self, range: std::ops::RangeInclusive<i64>) -> i64 {
        let start = *range.start();
        let end = *range.end();
        if start > end {
            report_violation!(
                ViolationSeverity::Error,
                ViolationKind::Configuration,
                "gen_range_i64_inclusive called with invalid range [{}..={}]",
                start,
                end
            );
            return start;
        }

        let span = (end as i128 - start as i128 + 1) as u64;
        // Full i64 range wraps the span to zero.
        if span == 0 {
            return self.next_u64() as i64;
        }

        let threshold = span.wrapping_neg() % span;
        loop {
            let random_value = self.next_u64();
            if random_value >= threshold {
                return start.wrapping_add((random_value % span) as i64);
            }
        }
    }

    /// Returns `true` with probability `numerator / denominator`.
    ///
    /// Integer-only so every platform agrees; floats are avoided in simulation code.
    fn gen_ratio(&mut self, numerator: u32, denominator: u32) -> bool {
        if denominator == 0 {
            report_violation!(
                ViolationSeverity::Error,
                ViolationKind::Configuration,
                "gen_ratio called with zero denominator"
            );
            return false;
        }
        self.gen_range(0..denominator) < numerator
    }

    /// Fills the given slice with random bytes.
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let mut chunks = dest.chunks_exact_mut(4);
        for chunk in chunks.by_ref() {
            chunk.copy_from_slice(&self.next_u32().to_le_bytes());
        }
        let remainder = chunks.into_remainder();
        if !remainder.is_empty() {
            let val = self.next_u32().to_le_bytes();
            if let Some(val_slice) = val.get(..remainder.len()) {
                remainder.copy_from_slice(val_slice);
            }
        }
    }
}

impl Rng for Pcg32 {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        Self::next_u32(self)
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        Self::next_u64(self)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_pcg32_deterministic() {
        let mut rng1 = Pcg32::seed_from_u64(42);
        let mut rng2 = Pcg32::seed_from_u64(42);
        for _ in 0..100 {
            assert_eq!(rng1.next_u32(), rng2.next_u32());
        }
    }

    #[test]
    fn test_pcg32_golden() {
        let mut rng = Pcg32::seed_from_u64(0);
        let expected = [
            0x348a463f_u32,
            0x4f205a1b_u32,
            0x2946c488_u32,
            0x805e36de_u32,
            0x79f994a9_u32,
        ];
        for &exp in &expected {
            assert_eq!(rng.next_u32(), exp, "Golden test failed");
        }
    }

    #[test]
    fn test_raw_parts_resume_sequence() {
        let mut rng = Pcg32::seed_from_u64(7);
        let _ = rng.next_u32();
        let (state, inc) = rng.raw_parts();
        let mut resumed = Pcg32::from_raw_parts(state, inc).unwrap();
        assert_eq!(rng.next_u64(), resumed.next_u64());
    }

    #[test]
    fn test_from_raw_parts_rejects_even_increment() {
        assert!(Pcg32::from_raw_parts(1, 2).is_none());
    }

    #[test]
    fn test_gen_range_bounds() {
        let mut rng = Pcg32::seed_from_u64(9);
        for _ in 0..1000 {
            let v = rng.gen_range(10..20);
            assert!((10..20).contains(&v));
        }
        assert_eq!(rng.gen_range(5..5), 5);
    }

    #[test]
    fn test_gen_range_i64_inclusive() {
        let mut rng = Pcg32::seed_from_u64(3);
        for _ in 0..1000 {
            let v = rng.gen_range_i64_inclusive(-5..=5);
            assert!((-5..=5).contains(&v));
        }
    }

    #[test]
    fn test_gen_ratio_extremes() {
        let mut rng = Pcg32::seed_from_u64(11);
        for _ in 0..100 {
            assert!(!rng.gen_ratio(0, 10));
            assert!(rng.gen_ratio(10, 10));
        }
        assert!(!rng.gen_ratio(1, 0));
    }

    #[test]
    fn test_fill_bytes_partial_chunk() {
        let mut a = Pcg32::seed_from_u64(5);
        let mut b = Pcg32::seed_from_u64(5);
        let mut buf = [0u8; 7];
        a.fill_bytes(&mut buf);
        let first = b.next_u32().to_le_bytes();
        assert_eq!(&buf[..4], &first);
    }
}
