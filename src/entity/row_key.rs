//! Row key codec
//!
//! The table service indexes rows by two string fields: a partition key
//! and a row key. Raw entity keys are arbitrary bytes, so they are base64
//! encoded and then percent-escaped (`+`, `/` and `=` are not allowed
//! verbatim in row keys). The partition id is its decimal string.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::{Result, StoreError};

/// Everything except the unreserved URI characters gets escaped
const ROW_KEY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Encode a raw key into a table service row key
pub fn encode_row_key(key: &[u8]) -> String {
    let b64 = STANDARD.encode(key);
    utf8_percent_encode(&b64, ROW_KEY_ESCAPE).to_string()
}

/// Decode a table service row key back into the raw key
pub fn decode_row_key(row_key: &str) -> Result<Vec<u8>> {
    let b64 = percent_decode_str(row_key)
        .decode_utf8()
        .map_err(|e| StoreError::Encoding(format!("row key is not valid UTF-8: {}", e)))?;
    STANDARD
        .decode(b64.as_bytes())
        .map_err(|e| StoreError::Encoding(format!("row key '{}' is not base64: {}", row_key, e)))
}

/// Partition id as the table service partition key
pub fn partition_key(partition: u64) -> String {
    partition.to_string()
}

/// Parse a table service partition key
pub fn parse_partition_key(partition_key: &str) -> Result<u64> {
    partition_key.parse().map_err(|_| {
        StoreError::Encoding(format!("invalid partition key '{}'", partition_key))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_key_reverses() {
        let key: Vec<u8> = (0u8..=255).collect();
        let encoded = encode_row_key(&key);
        assert_eq!(decode_row_key(&encoded).unwrap(), key);
    }

    #[test]
    fn test_row_key_escapes_base64_specials() {
        // 0xfb 0xff encodes to "+/8=" in standard base64
        let encoded = encode_row_key(&[0xfb, 0xff]);
        assert_eq!(encoded, "%2B%2F8%3D");
    }

    #[test]
    fn test_empty_key() {
        assert_eq!(encode_row_key(b""), "");
        assert_eq!(decode_row_key("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_malformed_row_key() {
        assert!(matches!(decode_row_key("%%%"), Err(StoreError::Encoding(_))));
        assert!(matches!(decode_row_key("a"), Err(StoreError::Encoding(_))));
    }

    #[test]
    fn test_partition_key() {
        assert_eq!(partition_key(42), "42");
        assert_eq!(parse_partition_key("42").unwrap(), 42);
        assert!(parse_partition_key("x").is_err());
    }
}
