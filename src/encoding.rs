//! Text encoding of ciphertexts.
//!
//! Ciphertexts are standard padded base64. The wrapped layout breaks the text
//! into 76-character lines, each terminated by `\n`, which is how blobs written
//! by earlier clients look on disk. Decoding accepts either layout, with or
//! without the trailing `=` padding.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::{DecodePaddingMode, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

const LINE_WIDTH: usize = 76;

/// Standard alphabet that accepts input with or without trailing `=`.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Base64Layout {
    /// 76-character lines, every line ending in `\n`.
    #[default]
    Wrapped,
    SingleLine,
}

pub fn encode(bytes: &[u8], layout: Base64Layout) -> String {
    let encoded = STANDARD.encode(bytes);
    match layout {
        Base64Layout::SingleLine => encoded,
        Base64Layout::Wrapped => {
            let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / LINE_WIDTH + 1);
            // base64 output is ASCII, so byte chunks are char boundaries
            for line in encoded.as_bytes().chunks(LINE_WIDTH) {
                wrapped.push_str(&String::from_utf8_lossy(line));
                wrapped.push('\n');
            }
            wrapped
        }
    }
}

pub fn decode(text: &str) -> Result<Vec<u8>, CryptoError> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    LENIENT
        .decode(compact.as_bytes())
        .map_err(|e| CryptoError::Encoding(format!("invalid base64 ciphertext: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn short_input_is_one_terminated_line() {
        assert_eq!(encode(b"hello", Base64Layout::Wrapped), "aGVsbG8=\n");
        assert_eq!(encode(b"hello", Base64Layout::SingleLine), "aGVsbG8=");
        assert_eq!(encode(b"", Base64Layout::Wrapped), "");
    }

    #[test]
    fn long_input_wraps_at_76() {
        let text = encode(&[0xA5; 100], Base64Layout::Wrapped);
        let lines: Vec<&str> = text.split_terminator('\n').collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 76);
        assert_eq!(lines[1].len(), 136 - 76);
        assert!(text.ends_with('\n'));

        // exactly one full line gets exactly one newline
        let full = encode(&[1; 57], Base64Layout::Wrapped);
        assert_eq!(full.len(), 77);
        assert_eq!(full.matches('\n').count(), 1);
    }

    #[test]
    fn decode_ignores_whitespace() {
        let data: Vec<u8> = (0..=255).collect();
        let wrapped = encode(&data, Base64Layout::Wrapped);
        assert_eq!(decode(&wrapped).unwrap(), data);
        assert_eq!(decode(" aGVs\r\nbG8= ").unwrap(), b"hello");
    }

    #[test]
    fn missing_padding_is_tolerated() {
        assert_eq!(decode("aGVsbG8").unwrap(), b"hello");
        assert_eq!(decode("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(
            decode("FCS58LYGSngoYD++ITdcjQ").unwrap(),
            decode("FCS58LYGSngoYD++ITdcjQ==\n").unwrap()
        );
    }

    #[test]
    fn garbage_is_an_encoding_error() {
        let err = decode("not base64 at all!").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EncodingError);
    }
}
