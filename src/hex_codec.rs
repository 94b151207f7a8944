//! Uppercase hex-text encoding used by the inbound clip framing.

use crate::error::{LinkError, Result};

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Encode bytes as uppercase hex, two characters per byte, no separators.
pub fn encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    encode_into(bytes, &mut out);
    out
}

/// Append the hex text of `bytes` to `out`.
pub fn encode_into(bytes: &[u8], out: &mut String) {
    out.reserve(bytes.len() * 2);
    for &b in bytes {
        out.push(HEX_DIGITS[(b >> 4) as usize] as char);
        out.push(HEX_DIGITS[(b & 0x0F) as usize] as char);
    }
}

/// Decode hex text (either case) back to bytes.
///
/// Fails with [`LinkError::MalformedHexInput`] when the length is odd or a
/// character is not a hex digit; `index` points at the offending character.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    let raw = text.as_bytes();
    if raw.len() % 2 != 0 {
        return Err(LinkError::MalformedHexInput {
            index: raw.len() - 1,
            reason: format!("odd length {}", raw.len()),
        });
    }

    let mut out = Vec::with_capacity(raw.len() / 2);
    for (pair_idx, pair) in raw.chunks_exact(2).enumerate() {
        let hi = digit(pair[0], pair_idx * 2)?;
        let lo = digit(pair[1], pair_idx * 2 + 1)?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

fn digit(c: u8, index: usize) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(LinkError::MalformedHexInput {
            index,
            reason: format!("{:?} is not a hex digit", c as char),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_uppercase_without_separators() {
        assert_eq!(encode(&[0x00, 0x0A, 0xAB, 0xFF]), "000AABFF");
        assert_eq!(encode(&[]), "");
    }

    #[test]
    fn encode_into_appends() {
        let mut text = String::from("F0");
        encode_into(&[0xF1, 0x02], &mut text);
        assert_eq!(text, "F0F102");
    }

    #[test]
    fn decode_accepts_both_cases() {
        assert_eq!(decode("aAbB0f").unwrap(), vec![0xAA, 0xBB, 0x0F]);
        assert!(decode("").unwrap().is_empty());
    }

    #[test]
    fn every_byte_value_survives_encoding() {
        let all: Vec<u8> = (0..=255u8).collect();
        let text = encode(&all);
        assert_eq!(text.len(), 512);
        assert_eq!(decode(&text).unwrap(), all);
    }

    #[test]
    fn odd_length_is_rejected() {
        match decode("ABC") {
            Err(LinkError::MalformedHexInput { index, .. }) => assert_eq!(index, 2),
            other => panic!("Expected MalformedHexInput, got {other:?}"),
        }
    }

    #[test]
    fn non_hex_digit_reports_its_index() {
        match decode("00AG11") {
            Err(LinkError::MalformedHexInput { index, reason }) => {
                assert_eq!(index, 3);
                assert!(reason.contains('G'));
            }
            other => panic!("Expected MalformedHexInput, got {other:?}"),
        }
    }

    #[test]
    fn non_ascii_input_is_rejected() {
        assert!(matches!(
            decode("0é"),
            Err(LinkError::MalformedHexInput { .. })
        ));
    }
}
