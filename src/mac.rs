//! Bluetooth MAC addresses.
//!
//! The registry stores addresses as 12 bare hex digits (`aabbccddeeff`),
//! BlueZ names its directories with the colon form (`AA:BB:CC:DD:EE:FF`).

use crate::error::{Result, SyncError};
use std::fmt;
use std::str::FromStr;

/// Number of bytes in a Bluetooth device address.
pub const MAC_LEN: usize = 6;

/// A 6-byte Bluetooth device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddress([u8; MAC_LEN]);

impl MacAddress {
    /// Creates an address from raw bytes, most significant first.
    pub const fn new(bytes: [u8; MAC_LEN]) -> Self {
        Self(bytes)
    }

    /// Parses the registry form: exactly 12 hex digits, no separators.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidMacAddress` for any other length or a
    /// non-hex character.
    pub fn from_compact(text: &str) -> Result<Self> {
        if text.len() != MAC_LEN * 2 {
            return Err(SyncError::InvalidMacAddress(text.to_string()));
        }
        let mut bytes = [0u8; MAC_LEN];
        hex::decode_to_slice(text, &mut bytes)
            .map_err(|_| SyncError::InvalidMacAddress(text.to_string()))?;
        Ok(Self(bytes))
    }

    /// Returns the address bytes, most significant first.
    pub fn bytes(&self) -> [u8; MAC_LEN] {
        self.0
    }

    /// Returns the registry form: 12 lowercase hex digits.
    pub fn to_compact(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for MacAddress {
    type Err = SyncError;

    /// Accepts either the compact registry form or the colon form.
    fn from_str(s: &str) -> Result<Self> {
        if s.contains(':') {
            let compact: String = s.split(':').collect();
            if s.split(':').count() != MAC_LEN || s.split(':').any(|part| part.len() != 2) {
                return Err(SyncError::InvalidMacAddress(s.to_string()));
            }
            Self::from_compact(&compact).map_err(|_| SyncError::InvalidMacAddress(s.to_string()))
        } else {
            Self::from_compact(s)
        }
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}
