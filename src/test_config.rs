//! Shared configuration for the crate's property-based tests.

/// Number of proptest cases per property.
///
/// Miri interprets every case, so it runs 5 instead of the default 256.
#[must_use]
pub const fn miri_case_count() -> u32 {
    if cfg!(miri) {
        5
    } else {
        256
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_count_depends_on_miri() {
        let expected = if cfg!(miri) { 5 } else { 256 };
        assert_eq!(miri_case_count(), expected);
    }
}
