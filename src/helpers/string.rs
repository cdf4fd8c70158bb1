//! Little-endian conversions for the binary record readers.

/// Splits a byte slice into little-endian `u32` values, widened to `usize`.
/// A trailing partial chunk is ignored.
pub(crate) fn to_usize_iter(bytes: &[u8]) -> impl Iterator<Item = usize> + '_ {
    bytes.chunks_exact(4).map(to_usize)
}

#[inline]
pub(crate) fn to_f64(s: &[u8]) -> f64 {
    f64::from_le_bytes([s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7]])
}

#[inline]
pub(crate) fn to_u64(s: &[u8]) -> u64 {
    u64::from_le_bytes([s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7]])
}

#[inline]
pub(crate) fn to_u32(s: &[u8]) -> u32 {
    u32::from_le_bytes([s[0], s[1], s[2], s[3]])
}

#[inline]
pub(crate) fn to_u16(s: &[u8]) -> u16 {
    u16::from_le_bytes([s[0], s[1]])
}

#[inline]
pub(crate) fn to_usize(s: &[u8]) -> usize {
    to_u32(s) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian() {
        assert_eq!(to_u16(&[0x34, 0x12]), 0x1234);
        assert_eq!(to_usize(&[0x01, 0x00, 0x00, 0x01]), 0x0100_0001);
        assert_eq!(to_f64(&1.5f64.to_le_bytes()), 1.5);
        assert_eq!(to_u64(&u64::MAX.to_le_bytes()), u64::MAX);
    }

    #[test]
    fn usize_iter_drops_partial_chunk() {
        let values: Vec<usize> = to_usize_iter(&[1, 0, 0, 0, 2, 0, 0, 0, 9]).collect();
        assert_eq!(values, vec![1, 2]);
    }
}
