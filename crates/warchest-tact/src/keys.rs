//! Content and encoding key newtypes.
//!
//! A content key (CKey) is the MD5 of a file's decoded contents; an encoding
//! key (EKey) identifies the encoded blob that decodes to those contents.
//! Both are 16 bytes and usually travel as lowercase hex.

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

fn parse_hash(s: &str) -> Result<[u8; 16]> {
    let bytes = hex::decode(s)?;
    let actual = bytes.len();
    <[u8; 16]>::try_from(bytes).map_err(|_| Error::InvalidKeyLength {
        expected: 16,
        actual,
    })
}

/// MD5 of a file's decoded contents.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentKey([u8; 16]);

impl ContentKey {
    /// Wrap raw key bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Parse a 32-character hex string.
    pub fn parse(s: &str) -> Result<Self> {
        parse_hash(s).map(Self)
    }
}

impl FromStr for ContentKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey({})", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for ContentKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Key of an encoded blob as stored on CDNs and in local archives.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EncodingKey([u8; 16]);

impl EncodingKey {
    /// Wrap raw key bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Parse a 32-character hex string.
    pub fn parse(s: &str) -> Result<Self> {
        parse_hash(s).map(Self)
    }

    /// First nine bytes, the width local `.idx` files store.
    pub fn truncated(&self) -> [u8; 9] {
        let mut out = [0u8; 9];
        out.copy_from_slice(&self.0[..9]);
        out
    }

    /// Whether every byte is zero (used as a sentinel in archive indexes).
    pub fn is_zeroed(&self) -> bool {
        self.0 == [0u8; 16]
    }
}

impl FromStr for EncodingKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for EncodingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for EncodingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncodingKey({})", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for EncodingKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hex_round_trip() {
        let hex = "0052ea9a56fd7b3b6fe7d1d906e6cdef";
        let key = ContentKey::parse(hex).unwrap();
        assert_eq!(key.to_string(), hex);
        assert_eq!(key.as_bytes()[0], 0x00);
        assert_eq!(key.as_bytes()[15], 0xef);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(matches!(
            EncodingKey::parse("abcd"),
            Err(Error::InvalidKeyLength {
                expected: 16,
                actual: 2
            })
        ));
        assert!(ContentKey::parse("zz52ea9a56fd7b3b6fe7d1d906e6cdef").is_err());
    }

    #[test]
    fn truncated_takes_first_nine() {
        let key = EncodingKey::parse("000102030405060708090a0b0c0d0e0f").unwrap();
        assert_eq!(key.truncated(), [0, 1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn zero_sentinel_detected() {
        assert!(EncodingKey::from_bytes([0u8; 16]).is_zeroed());
        assert!(!EncodingKey::from_bytes([1u8; 16]).is_zeroed());
    }
}
