//! Encoding table parser.
//!
//! The encoding table maps content keys to the encoding keys their blobs are
//! stored under, plus the decoded size. Multi-byte header fields are
//! big-endian, unlike most other formats in the pipeline. Entries sit in
//! fixed-stride pages; a zero key count ends a page early, the remainder
//! being padding.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use tracing::debug;

use crate::keys::{ContentKey, EncodingKey};
use crate::{Error, Result};

/// "EN" read as a little-endian u16.
const ENCODING_MAGIC: u16 = 0x4E45;

/// Where a content key's blob lives and how large it decodes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingEntry {
    /// First listed encoding key. Entries can carry several; later ones are
    /// alternate encodings and are not retained.
    pub key: EncodingKey,
    /// Decoded size in bytes (stored as a 40-bit big-endian integer).
    pub size: u64,
}

/// Parsed content-key half of an encoding table.
#[derive(Debug, Clone, Default)]
pub struct EncodingTable {
    entries: HashMap<ContentKey, EncodingEntry>,
}

impl EncodingTable {
    /// Parse an encoding table from decoded bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let magic = cursor.read_u16::<LittleEndian>()?;
        if magic != ENCODING_MAGIC {
            return Err(Error::BadMagic("encoding"));
        }

        cursor.set_position(cursor.position() + 1); // version
        let ckey_width = cursor.read_u8()?;
        let ekey_width = cursor.read_u8()?;
        if ckey_width != 16 || ekey_width != 16 {
            return Err(Error::UnsupportedKeyWidth {
                ckey: ckey_width,
                ekey: ekey_width,
            });
        }

        let page_size = u64::from(cursor.read_u16::<BigEndian>()?) * 1024;
        cursor.set_position(cursor.position() + 2); // ekey page size
        let page_count = u64::from(cursor.read_u32::<BigEndian>()?);
        cursor.set_position(cursor.position() + 5); // ekey page count + unknown byte
        let spec_block_size = u64::from(cursor.read_u32::<BigEndian>()?);

        // Skip the espec string block and the page digest table.
        let pages_start = cursor.position() + spec_block_size + page_count * (16 + 16);
        let total = data.len() as u64;
        if pages_start > total {
            return Err(Error::TruncatedIndex {
                expected: pages_start,
                actual: total,
            });
        }

        let mut entries = HashMap::new();
        for page in 0..page_count {
            let start = pages_start + page * page_size;
            if start >= total {
                break;
            }
            let end = (start + page_size).min(total);
            Self::parse_page(&data[start as usize..end as usize], &mut entries)?;
        }

        debug!(
            "Parsed encoding table: {} entries across {page_count} pages",
            entries.len()
        );
        Ok(Self { entries })
    }

    fn parse_page(page: &[u8], entries: &mut HashMap<ContentKey, EncodingEntry>) -> Result<()> {
        let mut cursor = Cursor::new(page);

        while (cursor.position() as usize) < page.len() {
            let keys_count = cursor.read_u8()?;
            if keys_count == 0 {
                break;
            }

            let size = cursor.read_uint::<BigEndian>(5)?;
            let mut ckey = [0u8; 16];
            cursor.read_exact(&mut ckey)?;
            let mut first_ekey = [0u8; 16];
            cursor.read_exact(&mut first_ekey)?;
            cursor.set_position(cursor.position() + u64::from(keys_count - 1) * 16);

            entries.insert(
                ContentKey::from_bytes(ckey),
                EncodingEntry {
                    key: EncodingKey::from_bytes(first_ekey),
                    size,
                },
            );
        }

        Ok(())
    }

    /// Entry for a content key, if the table knows it.
    pub fn lookup(&self, ckey: &ContentKey) -> Option<&EncodingEntry> {
        self.entries.get(ckey)
    }

    /// Number of content keys in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct TestEntry {
        ckey: [u8; 16],
        ekeys: Vec<[u8; 16]>,
        size: u64,
    }

    fn encoding_blob(pages: &[Vec<TestEntry>]) -> Vec<u8> {
        const PAGE: usize = 1024;

        let mut out = Vec::new();
        out.extend_from_slice(b"EN");
        out.push(1); // version
        out.push(16); // ckey width
        out.push(16); // ekey width
        out.extend_from_slice(&1u16.to_be_bytes()); // ckey page size in KiB
        out.extend_from_slice(&1u16.to_be_bytes()); // ekey page size
        out.extend_from_slice(&(pages.len() as u32).to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // ekey page count
        out.push(0); // unknown
        out.extend_from_slice(&4u32.to_be_bytes()); // espec block size
        out.extend_from_slice(&[0u8; 4]); // espec block
        for _ in pages {
            out.extend_from_slice(&[0u8; 32]); // first key + page digest
        }
        for page in pages {
            let start = out.len();
            for entry in page {
                out.push(entry.ekeys.len() as u8);
                out.push((entry.size >> 32) as u8);
                out.extend_from_slice(&((entry.size & 0xFFFF_FFFF) as u32).to_be_bytes());
                out.extend_from_slice(&entry.ckey);
                for ekey in &entry.ekeys {
                    out.extend_from_slice(ekey);
                }
            }
            out.resize(start + PAGE, 0);
        }
        out
    }

    #[test]
    fn first_encoding_key_retained() {
        let blob = encoding_blob(&[
            vec![
                TestEntry {
                    ckey: [0xAA; 16],
                    ekeys: vec![[0x01; 16], [0x02; 16]],
                    size: 0x01_0203_0405,
                },
                TestEntry {
                    ckey: [0xBB; 16],
                    ekeys: vec![[0x03; 16]],
                    size: 512,
                },
            ],
            vec![TestEntry {
                ckey: [0xCC; 16],
                ekeys: vec![[0x04; 16]],
                size: 7,
            }],
        ]);

        let table = EncodingTable::parse(&blob).unwrap();
        assert_eq!(table.len(), 3);

        let entry = table.lookup(&ContentKey::from_bytes([0xAA; 16])).unwrap();
        assert_eq!(entry.key, EncodingKey::from_bytes([0x01; 16]));
        assert_eq!(entry.size, 0x01_0203_0405);

        // Entries after page padding still land.
        let last = table.lookup(&ContentKey::from_bytes([0xCC; 16])).unwrap();
        assert_eq!(last.size, 7);

        assert!(table.lookup(&ContentKey::from_bytes([0xDD; 16])).is_none());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut blob = encoding_blob(&[vec![]]);
        blob[0] = b'X';
        assert!(matches!(
            EncodingTable::parse(&blob),
            Err(Error::BadMagic("encoding"))
        ));
    }

    #[test]
    fn rejects_non_md5_widths() {
        let mut blob = encoding_blob(&[vec![]]);
        blob[3] = 9;
        assert!(matches!(
            EncodingTable::parse(&blob),
            Err(Error::UnsupportedKeyWidth { ckey: 9, ekey: 16 })
        ));
    }

    #[test]
    fn rejects_page_table_past_end() {
        let mut blob = encoding_blob(&[vec![]]);
        blob[9..13].copy_from_slice(&0xFFFFu32.to_be_bytes());
        assert!(matches!(
            EncodingTable::parse(&blob),
            Err(Error::TruncatedIndex { .. })
        ));
    }
}
