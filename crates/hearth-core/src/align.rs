//! Alignment arithmetic and common size constants.

/// One kibibyte.
pub const KIB: usize = 1024;

/// One mebibyte.
pub const MIB: usize = 1024 * 1024;

/// Default alignment for arena allocations when none is requested.
pub const DEFAULT_ALIGNMENT: usize = 8;

/// Alignment for SIMD-friendly allocations.
pub const SIMD_ALIGNMENT: usize = 16;

/// Typical cache line size.
pub const CACHE_LINE: usize = 64;

/// Whether `value` is a non-zero power of two.
pub fn is_power_of_two(value: usize) -> bool {
    value != 0 && value & (value - 1) == 0
}

/// Round `value` up to the next multiple of `align`.
///
/// `align` must be a non-zero power of two. Returns `None` on overflow.
pub fn align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(is_power_of_two(align), "alignment {align} is not a power of two");
    let mask = align - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn align_up_exact_multiple_is_unchanged() {
        assert_eq!(align_up(64, 16), Some(64));
        assert_eq!(align_up(0, 8), Some(0));
    }

    #[test]
    fn align_up_rounds_to_next_boundary() {
        assert_eq!(align_up(1, 8), Some(8));
        assert_eq!(align_up(4097, 4096), Some(8192));
    }

    #[test]
    fn align_up_overflow_is_none() {
        assert_eq!(align_up(usize::MAX, 16), None);
    }

    #[test]
    fn power_of_two_rejects_zero_and_odd() {
        assert!(!is_power_of_two(0));
        assert!(!is_power_of_two(12));
        assert!(is_power_of_two(1));
        assert!(is_power_of_two(4096));
    }

    proptest! {
        #[test]
        fn align_up_is_aligned_and_minimal(value in 0usize..1 << 40, shift in 0u32..16) {
            let align = 1usize << shift;
            let aligned = align_up(value, align).unwrap();
            prop_assert_eq!(aligned % align, 0);
            prop_assert!(aligned >= value);
            prop_assert!(aligned - value < align);
        }
    }
}
