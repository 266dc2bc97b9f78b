//! Decoders for the value encodings found in registry exports.
//!
//! `reged` and `regedit` write binary values as comma-separated byte lists
//! and integers as fixed-width hex. BlueZ wants keys as a single uppercase
//! hex string and the LTK parameters as decimal text, so every decoder here
//! produces the BlueZ form.
//!
//! | Export encoding | Example | Decoder |
//! |---|---|---|
//! | `hex:` | `hex:aa,bb,cc` | [`decode_hex_blob`] → `AABBCC` |
//! | `hex(b):` | `hex(b):aa,bb,cc` | [`decode_reversed_hex_blob`] → `CCBBAA` |
//! | `dword:` | `dword:0000001a` | [`decode_dword`] → `26` |
//! | `hex(b):` as integer | `hex(b):01,00,00,00` | [`decode_reversed_hex_as_decimal`] → `1` |

use crate::error::{Result, SyncError};
use crate::mac::MacAddress;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Prefix of a REG_BINARY value.
pub const HEX_PREFIX: &str = "hex:";

/// Prefix of a REG_QWORD value, bytes stored least significant first.
pub const HEX_B_PREFIX: &str = "hex(b):";

/// Prefix of a REG_DWORD value.
pub const DWORD_PREFIX: &str = "dword:";

/// Widest integer a reversed blob may decode to.
const MAX_INTEGER_BYTES: usize = 16;

fn strip_prefix<'a>(raw: &'a str, prefix: &str) -> Result<&'a str> {
    let raw = raw.trim();
    match raw.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => Ok(&raw[prefix.len()..]),
        _ => Err(SyncError::malformed_value(
            raw,
            format!("expected {prefix:?} prefix"),
        )),
    }
}

/// Decodes a `hex:` blob into an uppercase hex string, byte order kept.
///
/// # Errors
///
/// Returns `SyncError::MalformedValue` if the prefix is missing or the body
/// is not a whole number of hex bytes.
///
/// # Examples
///
/// ```rust
/// use bt_keysync::codec::decode_hex_blob;
///
/// assert_eq!(decode_hex_blob("hex:aa,bb,cc").unwrap(), "AABBCC");
/// ```
pub fn decode_hex_blob(raw: &str) -> Result<String> {
    let body = strip_prefix(raw, HEX_PREFIX)?;
    let digits: String = body.chars().filter(|&c| c != ',').collect();
    let bytes = hex::decode(&digits)
        .map_err(|e| SyncError::malformed_value(raw, e.to_string()))?;
    Ok(hex::encode_upper(bytes))
}

/// Splits a `hex(b):` blob into bytes in stored (least significant first)
/// order.
fn reversed_blob_bytes(raw: &str) -> Result<Vec<u8>> {
    let body = strip_prefix(raw, HEX_B_PREFIX)?;
    if body.is_empty() {
        return Ok(Vec::new());
    }

    body.split(',')
        .map(|token| {
            let token = token.trim();
            if token.len() != 2 {
                return Err(SyncError::malformed_value(
                    raw,
                    format!("byte token {token:?} is not two hex digits"),
                ));
            }
            let mut byte = [0u8; 1];
            hex::decode_to_slice(token, &mut byte)
                .map_err(|e| SyncError::malformed_value(raw, e.to_string()))?;
            Ok(byte[0])
        })
        .collect()
}

/// Decodes a `hex(b):` blob into an uppercase hex string with the byte
/// order reversed, giving the big-endian form.
///
/// # Examples
///
/// ```rust
/// use bt_keysync::codec::decode_reversed_hex_blob;
///
/// assert_eq!(decode_reversed_hex_blob("hex(b):aa,bb,cc").unwrap(), "CCBBAA");
/// ```
pub fn decode_reversed_hex_blob(raw: &str) -> Result<String> {
    let mut bytes = reversed_blob_bytes(raw)?;
    bytes.reverse();
    Ok(hex::encode_upper(bytes))
}

/// Decodes a `dword:` value into decimal text.
///
/// # Examples
///
/// ```rust
/// use bt_keysync::codec::decode_dword;
///
/// assert_eq!(decode_dword("dword:0000001a").unwrap(), "26");
/// ```
pub fn decode_dword(raw: &str) -> Result<String> {
    decode_dword_value(raw).map(|value| value.to_string())
}

/// Decodes a `dword:` value into an integer.
pub fn decode_dword_value(raw: &str) -> Result<u32> {
    let body = strip_prefix(raw, DWORD_PREFIX)?;
    if body.is_empty() || body.len() > 8 {
        return Err(SyncError::malformed_value(
            raw,
            format!("expected 1 to 8 hex digits, got {}", body.len()),
        ));
    }
    if !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SyncError::malformed_value(raw, "non-hex character"));
    }
    u32::from_str_radix(body, 16).map_err(|e| SyncError::malformed_value(raw, e.to_string()))
}

/// Decodes a `hex(b):` blob as a little-endian integer rendered in decimal.
///
/// BlueZ stores the LTK `Rand` as decimal text even though Windows keeps
/// `ERand` as a byte blob.
///
/// # Errors
///
/// Returns `SyncError::MalformedValue` for an empty blob or one wider than
/// 16 bytes.
///
/// # Examples
///
/// ```rust
/// use bt_keysync::codec::decode_reversed_hex_as_decimal;
///
/// assert_eq!(decode_reversed_hex_as_decimal("hex(b):01,00,00,00").unwrap(), "1");
/// ```
pub fn decode_reversed_hex_as_decimal(raw: &str) -> Result<String> {
    let bytes = reversed_blob_bytes(raw)?;
    if bytes.is_empty() || bytes.len() > MAX_INTEGER_BYTES {
        return Err(SyncError::malformed_value(
            raw,
            format!("expected 1 to {MAX_INTEGER_BYTES} bytes, got {}", bytes.len()),
        ));
    }

    let mut cursor = Cursor::new(bytes.as_slice());
    let value = cursor.read_uint128::<LittleEndian>(bytes.len())?;
    Ok(value.to_string())
}

/// Formats 12 bare hex digits as a colon-separated uppercase MAC address.
///
/// # Examples
///
/// ```rust
/// use bt_keysync::codec::format_mac_address;
///
/// assert_eq!(format_mac_address("aabbccddeeff").unwrap(), "AA:BB:CC:DD:EE:FF");
/// ```
pub fn format_mac_address(hex12: &str) -> Result<String> {
    MacAddress::from_compact(hex12)
        .map(|mac| mac.to_string())
        .map_err(|_| SyncError::malformed_value(hex12, "expected 12 hex digits"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_blob() {
        assert_eq!(decode_hex_blob("hex:aa,bb,cc").unwrap(), "AABBCC");
        assert_eq!(decode_hex_blob("hex:").unwrap(), "");
        assert_eq!(decode_hex_blob("  hex:0a,1B  ").unwrap(), "0A1B");
    }

    #[test]
    fn test_hex_blob_rejects_garbage() {
        assert!(matches!(
            decode_hex_blob("hex:aa,zz"),
            Err(SyncError::MalformedValue { .. })
        ));
        assert!(decode_hex_blob("hex:a,bb").is_err());
        assert!(decode_hex_blob("aa,bb").is_err());
        assert!(decode_hex_blob("hex(b):aa").is_err());
    }

    #[test]
    fn test_reversed_blob() {
        assert_eq!(decode_reversed_hex_blob("hex(b):aa,bb,cc").unwrap(), "CCBBAA");
        assert_eq!(decode_reversed_hex_blob("hex(b):").unwrap(), "");
        assert!(decode_reversed_hex_blob("hex(b):aab,cc").is_err());
        assert!(decode_reversed_hex_blob("hex(b):aa,,cc").is_err());
    }

    #[test]
    fn test_dword() {
        assert_eq!(decode_dword("dword:0000001a").unwrap(), "26");
        assert_eq!(decode_dword("dword:00000010").unwrap(), "16");
        assert_eq!(decode_dword("dword:ffffffff").unwrap(), "4294967295");
        assert!(decode_dword("dword:").is_err());
        assert!(decode_dword("dword:100000000").is_err());
        assert!(decode_dword("dword:+1").is_err());
        assert!(decode_dword("hex:01").is_err());
    }

    #[test]
    fn test_reversed_decimal() {
        assert_eq!(decode_reversed_hex_as_decimal("hex(b):01,00,00,00").unwrap(), "1");
        assert_eq!(
            decode_reversed_hex_as_decimal("hex(b):00,01,00,00,00,00,00,00").unwrap(),
            "256"
        );
        assert_eq!(
            decode_reversed_hex_as_decimal("hex(b):ff,ff,ff,ff,ff,ff,ff,ff").unwrap(),
            u64::MAX.to_string()
        );
        assert!(decode_reversed_hex_as_decimal("hex(b):").is_err());
    }

    #[test]
    fn test_format_mac() {
        assert_eq!(format_mac_address("AABBCCDDEEFF").unwrap(), "AA:BB:CC:DD:EE:FF");
        assert!(matches!(
            format_mac_address("AABBCC"),
            Err(SyncError::MalformedValue { .. })
        ));
    }
}
