//! Hex and base64 helpers matching the wire conventions
//!
//! Base64 is the standard alphabet. We always emit `=` padding but accept
//! input with or without it, which is what peer implementations produce.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

const ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode bytes as standard base64 with padding.
pub fn base64_encode(data: &[u8]) -> String {
    ENGINE.encode(data)
}

/// Decode standard base64, padded or not.
pub fn base64_decode(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    ENGINE.decode(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trip() {
        for len in [0usize, 1, 2, 3, 4, 31, 32, 33, 256] {
            let data: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
            let encoded = base64_encode(&data);
            assert_eq!(base64_decode(&encoded).unwrap(), data);
        }
    }

    #[test]
    fn encode_pads() {
        assert_eq!(base64_encode(b"a"), "YQ==");
        assert_eq!(base64_encode(b"ab"), "YWI=");
        assert_eq!(base64_encode(b"abc"), "YWJj");
    }

    #[test]
    fn decode_accepts_missing_padding() {
        assert_eq!(base64_decode("YQ").unwrap(), b"a");
        assert_eq!(base64_decode("YQ==").unwrap(), b"a");
        assert_eq!(base64_decode("YWI").unwrap(), b"ab");
    }

    #[test]
    fn hex_round_trip() {
        let data: Vec<u8> = (0..=255).collect();
        assert_eq!(hex::decode(hex::encode(&data)).unwrap(), data);
    }
}
