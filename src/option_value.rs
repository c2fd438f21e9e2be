//! Uint option values.
//!
//! CoAP encodes unsigned integer option values (and this client's tokens) as
//! the shortest big-endian byte sequence that holds the value, where zero is
//! the empty sequence.

/// Encodes an integer as a minimal-length big-endian byte sequence.
pub(crate) fn encode_uint(value: u64) -> Vec<u8> {
    // Fast path: zero has no bytes at all.
    if value == 0 {
        return Vec::new();
    }

    let bytes = value.to_be_bytes();
    let skip = value.leading_zeros() as usize / 8;
    bytes[skip..].to_vec()
}

/// Decodes a big-endian unsigned integer of up to eight bytes.
///
/// Returns `None` when the input is longer than eight bytes.
pub(crate) fn decode_uint(bytes: &[u8]) -> Option<u64> {
    if bytes.len() > 8 {
        return None;
    }

    Some(bytes.iter().fold(0, |acc, &b| acc << 8 | u64::from(b)))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn encode_minimal_length() {
        assert_eq!(encode_uint(0), Vec::<u8>::new());
        assert_eq!(encode_uint(1), vec![0x01]);
        assert_eq!(encode_uint(0xFF), vec![0xFF]);
        assert_eq!(encode_uint(0x100), vec![0x01, 0x00]);
        assert_eq!(encode_uint(5683), vec![0x16, 0x33]);
        assert_eq!(encode_uint(0x0001_0000), vec![0x01, 0x00, 0x00]);
        assert_eq!(encode_uint(u64::MAX), vec![0xFF; 8]);
    }

    #[test]
    fn encoded_length_is_logarithmic() {
        for value in [0u64, 1, 0xFF, 0x100, 0xFFFF, 0x0001_0000, u64::MAX] {
            let expected = (64 - value.leading_zeros() as usize).div_ceil(8);
            assert_eq!(encode_uint(value).len(), expected);
        }
    }

    #[test]
    fn round_trip() {
        for value in [0u64, 1, 12, 255, 256, 5683, 1 << 32, u64::MAX] {
            assert_eq!(decode_uint(&encode_uint(value)), Some(value));
        }
    }

    #[test]
    fn decode_zero_padded() {
        assert_eq!(decode_uint(&[0x00, 0x00, 0x50]), Some(0x50));
    }

    #[test]
    fn decode_overlong() {
        assert_eq!(decode_uint(&[0x01; 9]), None);
    }
}
