//! Alignment arithmetic for buffer sizes and addresses.
//!
//! Every `align` argument must be a power of two unless stated otherwise.

/// Returns `true` if `value` is a non-zero power of two.
pub const fn is_power_of_two(value: usize) -> bool {
    value != 0 && (value & (value - 1)) == 0
}

pub const fn is_aligned(value: usize, align: usize) -> bool {
    debug_assert!(is_power_of_two(align));
    value & (align - 1) == 0
}

/// Rounds `value` up to the next multiple of `align`, or `None` on overflow.
pub const fn align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(is_power_of_two(align));
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Pads a byte count so that it is a multiple of `align`.
///
/// `align` values of 0 and 1 leave the count untouched. Unlike the other
/// helpers, `align` does not need to be a power of two here.
pub const fn align_for_size(byte_count: usize, align: usize) -> usize {
    if align > 1 && byte_count % align != 0 {
        (byte_count / align + 1) * align
    } else {
        byte_count
    }
}

/// Adds speculative padding so that an allocation of the returned size can
/// always be moved up to an `align`-aligned start address and still hold
/// `byte_count` bytes.
pub const fn align_for_address(byte_count: usize, align: usize) -> usize {
    if align > 1 {
        byte_count + align
    } else {
        byte_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_power_of_two() {
        assert!(!is_power_of_two(0));
        assert!(is_power_of_two(1));
        assert!(is_power_of_two(64));
        assert!(!is_power_of_two(96));
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0x1001, 0x1000), Some(0x2000));
        assert_eq!(align_up(0x1000, 0x1000), Some(0x1000));
        assert_eq!(align_up(usize::MAX, 0x1000), None);
        assert!(is_aligned(0x40, 0x20));
        assert!(!is_aligned(0x41, 0x20));
    }

    #[test]
    fn test_align_for_size() {
        assert_eq!(align_for_size(100, 0), 100);
        assert_eq!(align_for_size(100, 1), 100);
        assert_eq!(align_for_size(100, 32), 128);
        assert_eq!(align_for_size(128, 32), 128);
        assert_eq!(align_for_size(10, 12), 12);
    }

    #[test]
    fn test_align_for_address() {
        assert_eq!(align_for_address(128, 1), 128);
        assert_eq!(align_for_address(128, 64), 192);
    }
}
