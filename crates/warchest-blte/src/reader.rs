//! Eager container reader with on-demand block decoding.

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use tracing::trace;
use warchest_crypto::KeyRing;

use crate::block::{decode_block, verify_block};
use crate::{BlteHeader, Error, Md5Hash, Result};

/// Reader over a fully buffered container blob.
///
/// Blocks are decoded lazily as the cursor advances: reading at offset `O`
/// forces decoding of the blocks covering bytes up to `O + len`, leaving the
/// rest untouched. [`into_decoded`](Self::into_decoded) forces the whole
/// object, which callers must do before persisting it anywhere.
///
/// With `partial_decrypt`, blocks whose decryption key is absent are
/// zero-filled (their table size is trusted) and recorded in
/// [`missing_keys`](Self::missing_keys); integrity failures are still fatal.
pub struct BlteReader {
    raw: Vec<u8>,
    header: BlteHeader,
    out: Vec<u8>,
    next_block: usize,
    pos: u64,
    partial_decrypt: bool,
    keys: Arc<KeyRing>,
    missing_keys: Vec<u64>,
}

impl BlteReader {
    /// Parse the header and, when `expected` is given, verify the blob
    /// against its encoding key. No blocks are decoded yet.
    pub fn new(
        raw: Vec<u8>,
        expected: Option<&Md5Hash>,
        keys: Arc<KeyRing>,
        partial_decrypt: bool,
    ) -> Result<Self> {
        let header = BlteHeader::parse(&raw, raw.len() as u64)?;
        if let Some(expected) = expected {
            header.verify_checksum(&raw, expected)?;
        }

        let capacity = header.decoded_size as usize;
        Ok(Self {
            raw,
            header,
            out: Vec::with_capacity(capacity),
            next_block: 0,
            pos: 0,
            partial_decrypt,
            keys,
            missing_keys: Vec::new(),
        })
    }

    /// Parsed header.
    pub fn header(&self) -> &BlteHeader {
        &self.header
    }

    /// Decoded length according to the block table.
    pub fn decoded_len(&self) -> u64 {
        self.header.decoded_size
    }

    /// Number of blocks decoded so far.
    pub fn blocks_decoded(&self) -> usize {
        self.next_block
    }

    /// Key names that were missing during partial decryption, in block order.
    pub fn missing_keys(&self) -> &[u64] {
        &self.missing_keys
    }

    /// Decode blocks until the decoded buffer covers `end` bytes (or the
    /// table is exhausted).
    pub fn decode_to(&mut self, end: u64) -> Result<()> {
        while (self.out.len() as u64) < end && self.next_block < self.header.blocks.len() {
            self.process_next_block()?;
        }
        Ok(())
    }

    /// Decode every remaining block.
    pub fn decode_all(&mut self) -> Result<()> {
        while self.next_block < self.header.blocks.len() {
            self.process_next_block()?;
        }
        Ok(())
    }

    /// Fully materialize the decoded object.
    pub fn into_decoded(mut self) -> Result<Vec<u8>> {
        self.decode_all()?;
        Ok(self.out)
    }

    fn process_next_block(&mut self) -> Result<()> {
        let index = self.next_block;
        let block = &self.header.blocks[index];

        let start = self.header.data_start + block.compressed_offset;
        let end = start + u64::from(block.compressed_size);
        if end > self.raw.len() as u64 {
            return Err(Error::TruncatedData {
                expected: end,
                actual: self.raw.len() as u64,
            });
        }

        let raw_block = &self.raw[start as usize..end as usize];
        verify_block(block, raw_block, index)?;

        match decode_block(raw_block, index, &self.keys) {
            Ok(decoded) => self.out.extend_from_slice(&decoded),
            Err(Error::KeyNotFound(key_name)) if self.partial_decrypt => {
                trace!("Zero-filling block {index}, missing key {key_name:016x}");
                self.missing_keys.push(key_name);
                let new_len = self.out.len() + block.decompressed_size as usize;
                self.out.resize(new_len, 0);
            }
            Err(e) => return Err(e),
        }

        self.next_block += 1;
        Ok(())
    }
}

impl Read for BlteReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let end = self.pos + buf.len() as u64;
        self.decode_to(end).map_err(std::io::Error::other)?;

        let available = self.out.len() as u64;
        if self.pos >= available {
            return Ok(0);
        }

        let start = self.pos as usize;
        let take = ((available - self.pos) as usize).min(buf.len());
        buf[..take].copy_from_slice(&self.out[start..start + take]);
        self.pos += take as u64;
        Ok(take)
    }
}

impl Seek for BlteReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => self.header.decoded_size as i64 + delta,
        };

        if target < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }

        self.pos = target as u64;
        Ok(self.pos)
    }
}
