/// Test whether bit `bit` of the capability word `x` is set.
pub fn test_bit(bit: u32, x: u32) -> bool {
    (x >> bit) & 1 == 1
}

/// Number of zero bytes needed to pad `len` up to a multiple of 8.
pub fn pad_to_8(len: usize) -> usize {
    (8 - len % 8) % 8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_reads_single_flags() {
        assert!(test_bit(0, 0b1));
        assert!(!test_bit(1, 0b1));
        assert!(test_bit(8, 0x100));
    }

    #[test]
    fn pad_to_8_rounds_up_only_when_needed() {
        assert_eq!(pad_to_8(8), 0);
        assert_eq!(pad_to_8(4), 4);
        assert_eq!(pad_to_8(22), 2);
    }
}
