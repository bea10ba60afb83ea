//! Remote archive index (`.index`) parser.
//!
//! Each CDN archive ships a sibling index listing the encoding keys packed
//! inside it, with the byte range each blob occupies. The entry count sits a
//! fixed twelve bytes from the end of the file; entries are 24 bytes each
//! from the start.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use tracing::debug;

use crate::keys::EncodingKey;
use crate::{Error, Result};

/// Location of one encoded blob inside an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveIndexEntry {
    pub key: EncodingKey,
    /// Stored (encoded) size in bytes.
    pub size: u32,
    /// Offset of the blob from the start of the archive.
    pub offset: u32,
}

/// Parsed archive index.
#[derive(Debug, Clone, Default)]
pub struct ArchiveIndex {
    entries: Vec<ArchiveIndexEntry>,
}

impl ArchiveIndex {
    /// Parse an archive index from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let total = data.len() as u64;
        if total < 12 {
            return Err(Error::TruncatedIndex {
                expected: 12,
                actual: total,
            });
        }

        let mut cursor = Cursor::new(data);
        cursor.set_position(total - 12);
        let count = cursor.read_i32::<LittleEndian>()?;

        let needed = i64::from(count).saturating_mul(24);
        if count < 0 || needed > data.len() as i64 {
            return Err(Error::TruncatedIndex {
                expected: needed.max(0) as u64,
                actual: total,
            });
        }

        cursor.set_position(0);
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut key = [0u8; 16];
            cursor.read_exact(&mut key)?;

            // Some indexes pad with an all-zero key before the real one.
            if key == [0u8; 16] {
                cursor.read_exact(&mut key)?;
            }

            let size = cursor.read_u32::<BigEndian>()?;
            let offset = cursor.read_u32::<BigEndian>()?;
            entries.push(ArchiveIndexEntry {
                key: EncodingKey::from_bytes(key),
                size,
                offset,
            });
        }

        debug!("Parsed archive index: {} entries", entries.len());
        Ok(Self { entries })
    }

    /// Entries in file order.
    pub fn entries(&self) -> &[ArchiveIndexEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index listed no blobs.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
