//! Chunked container codec for content blobs.
//!
//! Every retrievable content blob is wrapped in this container format: a
//! `BLTE` magic, an optional block table, and a sequence of blocks each
//! carrying a one-byte type flag (plain, zlib-deflated, encrypted, or the
//! unimplemented recursive frame). Encrypted blocks decrypt and then re-enter
//! the same dispatch, since the plaintext is itself a typed block.
//!
//! Two consumption modes:
//! - [`BlteReader`]: eager, owns the raw blob, decodes blocks on demand as a
//!   cursor advances (or all at once via [`BlteReader::into_decoded`])
//! - [`BlteStream`]: lazy, pulls raw block bytes through an async
//!   [`BlockSource`] (file range, cached blob, or network byte-range) and
//!   memoizes decoded blocks in a small recency cache

pub mod block;
pub mod error;
pub mod header;
pub mod reader;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_util;

pub use block::decode_block;
pub use error::{Error, Result};
pub use header::{BlteHeader, ContainerBlock};
pub use reader::BlteReader;
pub use stream::{BlockSource, BlteStream};

/// Container magic, `"BLTE"` read as little-endian u32.
pub const BLTE_MAGIC: u32 = 0x45544C42;

/// MD5 digest bytes.
pub type Md5Hash = [u8; 16];

/// All-zero block checksum meaning "unverified".
pub const SENTINEL_CHECKSUM: Md5Hash = [0u8; 16];

/// `true` if the buffer starts with the container magic.
pub fn is_container(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == BLTE_MAGIC.to_le_bytes()
}

/// Header size field of a container prefix, if the first eight bytes are
/// present. Streams probe blobs with a fixed-size prefix and refetch when
/// the declared header turns out larger than the probe.
pub fn declared_header_size(data: &[u8]) -> Option<u32> {
    if !is_container(data) {
        return None;
    }
    let bytes: [u8; 4] = data.get(4..8)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_magic_detected() {
        assert!(is_container(b"BLTE\x00\x00\x00\x00"));
        assert!(!is_container(b"ZLTE\x00\x00\x00\x00"));
        assert!(!is_container(b"BL"));
    }

    #[test]
    fn header_size_read_from_prefix() {
        assert_eq!(declared_header_size(b"BLTE\x00\x00\x01\x2c"), Some(300));
        assert_eq!(declared_header_size(b"BLTE\x00\x00"), None);
        assert_eq!(declared_header_size(b"XXXX\x00\x00\x01\x2c"), None);
    }
}
