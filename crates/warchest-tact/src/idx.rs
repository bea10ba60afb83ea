//! Local install `.idx` file parser.
//!
//! Installed storages keep their lookup tables as `.idx` files next to the
//! packed `data.###` files. Keys are truncated to nine bytes; each 18-byte
//! record packs the data file number and offset into a byte and a big-endian
//! word (two high bits of the word extend the file number, the low thirty
//! bits are the offset).

use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use tracing::debug;

use crate::keys::EncodingKey;
use crate::{Error, Result};

const RECORD_LEN: usize = 18;
const OFFSET_MASK: u32 = 0x3FFF_FFFF;

/// Location of one blob inside the local `data.###` files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdxEntry {
    /// Number of the `data.###` file holding the blob.
    pub data_file: u16,
    /// Offset of the blob's storage header within that file.
    pub offset: u32,
    /// Stored size in bytes, including the storage header.
    pub size: u32,
}

/// Parsed `.idx` lookup table.
#[derive(Debug, Clone, Default)]
pub struct IdxFile {
    entries: HashMap<[u8; 9], IdxEntry>,
}

impl IdxFile {
    /// Parse a `.idx` file from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::TruncatedIndex {
                expected: 8,
                actual: data.len() as u64,
            });
        }

        let header_hash_size = LittleEndian::read_u32(&data[0..4]) as usize;

        // The entry block starts at the next 16-byte boundary past the header.
        let aligned = (8 + header_hash_size + 0x0F) & !0x0F;
        if aligned + 8 > data.len() {
            return Err(Error::TruncatedIndex {
                expected: (aligned + 8) as u64,
                actual: data.len() as u64,
            });
        }

        let data_length = LittleEndian::read_u32(&data[aligned..aligned + 4]) as usize;
        let records_start = aligned + 8; // length word + block hash
        if records_start + data_length > data.len() {
            return Err(Error::TruncatedIndex {
                expected: (records_start + data_length) as u64,
                actual: data.len() as u64,
            });
        }

        let mut entries = HashMap::new();
        for record in data[records_start..records_start + data_length].chunks_exact(RECORD_LEN) {
            let mut key = [0u8; 9];
            key.copy_from_slice(&record[0..9]);

            let high = record[9];
            let low = BigEndian::read_u32(&record[10..14]);
            let size = LittleEndian::read_u32(&record[14..18]);

            let entry = IdxEntry {
                data_file: (u16::from(high) << 2) | ((low >> 30) as u16),
                offset: low & OFFSET_MASK,
                size,
            };

            // Duplicate keys keep their first record.
            entries.entry(key).or_insert(entry);
        }

        debug!("Parsed .idx: {} entries", entries.len());
        Ok(Self { entries })
    }

    /// Entry for an encoding key, matched on its truncated prefix.
    pub fn lookup(&self, key: &EncodingKey) -> Option<&IdxEntry> {
        self.entries.get(&key.truncated())
    }

    /// Merge another table into this one. Existing keys win, matching the
    /// first-record rule within a single file.
    pub fn merge(&mut self, other: IdxFile) {
        for (key, entry) in other.entries {
            self.entries.entry(key).or_insert(entry);
        }
    }

    /// Number of distinct truncated keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
