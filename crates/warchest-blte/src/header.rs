//! Container header and block table parsing.

use std::io::Cursor;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};

use crate::{BLTE_MAGIC, Error, Md5Hash, Result, SENTINEL_CHECKSUM};

/// One block of the chunked container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerBlock {
    /// Size of the encoded block, including its type flag.
    pub compressed_size: u32,
    /// Decoded size recorded in the block table.
    pub decompressed_size: u32,
    /// MD5 of the encoded block bytes; all zeros means unverified.
    pub checksum: Md5Hash,
    /// Offset of this block's encoded bytes, relative to the data start.
    pub compressed_offset: u64,
    /// Offset of this block's decoded bytes within the decoded object.
    pub decompressed_offset: u64,
}

impl ContainerBlock {
    /// `true` if the table carries a real checksum for this block.
    pub fn is_verified(&self) -> bool {
        self.checksum != SENTINEL_CHECKSUM
    }
}

/// Parsed container header.
///
/// `headerSize == 0` blobs have no block table; a single synthetic block is
/// recorded covering the whole payload (`compressedSize = total - 8`,
/// `decompressedSize = total - 9`, sentinel checksum).
#[derive(Debug, Clone)]
pub struct BlteHeader {
    /// Raw header size field (0 for single-block blobs).
    pub header_size: u32,
    /// Offset of the first block's bytes within the blob.
    pub data_start: u64,
    /// Block table in blob order.
    pub blocks: Vec<ContainerBlock>,
    /// Sum of all blocks' decompressed sizes.
    pub decoded_size: u64,
}

impl BlteHeader {
    /// Parse a container header from a buffer.
    ///
    /// `data` may be a prefix of the blob (streams probe with the first
    /// 4 KiB) as long as it covers the whole header; `total_size` is the full
    /// blob length, needed to size the single-block case.
    pub fn parse(data: &[u8], total_size: u64) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::TruncatedData {
                expected: 8,
                actual: data.len() as u64,
            });
        }

        let mut cursor = Cursor::new(data);
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != BLTE_MAGIC {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&data[..4]);
            return Err(Error::InvalidMagic(raw));
        }

        let header_size = cursor.read_u32::<BigEndian>()?;
        if header_size == 0 {
            if total_size < 9 {
                return Err(Error::TruncatedData {
                    expected: 9,
                    actual: total_size,
                });
            }

            // Single unnamed block: payload is everything after the 8-byte
            // prefix, decoded size excludes the type flag.
            let block = ContainerBlock {
                compressed_size: (total_size - 8) as u32,
                decompressed_size: (total_size - 9) as u32,
                checksum: SENTINEL_CHECKSUM,
                compressed_offset: 0,
                decompressed_offset: 0,
            };

            return Ok(Self {
                header_size,
                data_start: 8,
                decoded_size: u64::from(block.decompressed_size),
                blocks: vec![block],
            });
        }

        if data.len() < 12 {
            return Err(Error::TruncatedData {
                expected: 12,
                actual: data.len() as u64,
            });
        }

        let flag = cursor.read_u8()?;
        let block_count = cursor.read_u24::<BigEndian>()?;
        if flag != 0x0F || block_count == 0 {
            return Err(Error::InvalidBlockTable {
                flag,
                blocks: block_count,
            });
        }

        let table_size = 24 * block_count + 12;
        if header_size != table_size {
            return Err(Error::InvalidHeaderSize {
                expected: table_size,
                actual: header_size,
            });
        }
        if (data.len() as u64) < u64::from(table_size) {
            return Err(Error::TruncatedData {
                expected: u64::from(table_size),
                actual: data.len() as u64,
            });
        }

        let mut blocks = Vec::with_capacity(block_count as usize);
        let mut compressed_offset = 0u64;
        let mut decompressed_offset = 0u64;

        for _ in 0..block_count {
            let compressed_size = cursor.read_i32::<BigEndian>()? as u32;
            let decompressed_size = cursor.read_i32::<BigEndian>()? as u32;
            let mut checksum = [0u8; 16];
            std::io::Read::read_exact(&mut cursor, &mut checksum)?;

            blocks.push(ContainerBlock {
                compressed_size,
                decompressed_size,
                checksum,
                compressed_offset,
                decompressed_offset,
            });

            compressed_offset += u64::from(compressed_size);
            decompressed_offset += u64::from(decompressed_size);
        }

        Ok(Self {
            header_size,
            data_start: u64::from(header_size),
            blocks,
            decoded_size: decompressed_offset,
        })
    }

    /// Verify the blob against its expected encoding key: MD5 of the header
    /// bytes when a block table is present, of the entire blob otherwise.
    ///
    /// `data` must cover the header (table case) or be the whole blob.
    pub fn verify_checksum(&self, data: &[u8], expected: &Md5Hash) -> Result<()> {
        let hashed = if self.header_size > 0 {
            let end = self.header_size as usize;
            if data.len() < end {
                return Err(Error::TruncatedData {
                    expected: u64::from(self.header_size),
                    actual: data.len() as u64,
                });
            }
            &data[..end]
        } else {
            data
        };

        let actual: Md5Hash = md5::compute(hashed).0;
        if &actual != expected {
            return Err(Error::BlobChecksumMismatch {
                expected: *expected,
                actual,
            });
        }

        Ok(())
    }

    /// Number of blocks in the table.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}
