//! Lazy container reader backed by an async block source.

use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use lru::LruCache;
use tracing::trace;
use warchest_crypto::KeyRing;

use crate::block::{decode_block, verify_block};
use crate::{BlteHeader, Error, Result};

/// Decoded blocks memoized per stream.
const BLOCK_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(10) {
    Some(capacity) => capacity,
    None => NonZeroUsize::MIN,
};

/// Supplies raw byte ranges of an encoded blob.
///
/// Implementations read from wherever the blob physically lives: a local
/// data-file range, a cached blob, or a network byte-range request. Offsets
/// are relative to the start of the blob.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn read_range(&self, offset: u64, len: u32) -> Result<Vec<u8>>;
}

#[async_trait]
impl<S: BlockSource + ?Sized> BlockSource for Box<S> {
    async fn read_range(&self, offset: u64, len: u32) -> Result<Vec<u8>> {
        (**self).read_range(offset, len).await
    }
}

#[async_trait]
impl<S: BlockSource + ?Sized> BlockSource for Arc<S> {
    async fn read_range(&self, offset: u64, len: u32) -> Result<Vec<u8>> {
        (**self).read_range(offset, len).await
    }
}

/// Lazy reader: decodes blocks on demand through a [`BlockSource`], keeping
/// the most recently used decoded blocks in a small cache.
///
/// The block sequence is finite and its length is known up front from the
/// header, so [`blocks`](Self::blocks) yields a restartable, bounded stream.
pub struct BlteStream<S> {
    header: BlteHeader,
    source: S,
    keys: Arc<KeyRing>,
    partial_decrypt: bool,
    cache: LruCache<usize, Arc<Vec<u8>>>,
    missing_keys: Vec<u64>,
}

impl<S: BlockSource> BlteStream<S> {
    /// Build a stream over `source` from an already parsed header (streams
    /// probe headers from a blob prefix and skip whole-blob verification).
    pub fn new(header: BlteHeader, source: S, keys: Arc<KeyRing>, partial_decrypt: bool) -> Self {
        Self {
            header,
            source,
            keys,
            partial_decrypt,
            cache: LruCache::new(BLOCK_CACHE_CAPACITY),
            missing_keys: Vec::new(),
        }
    }

    /// Parsed header.
    pub fn header(&self) -> &BlteHeader {
        &self.header
    }

    /// Number of blocks in the table.
    pub fn block_count(&self) -> usize {
        self.header.blocks.len()
    }

    /// Decoded length according to the block table.
    pub fn decoded_len(&self) -> u64 {
        self.header.decoded_size
    }

    /// Key names that were missing during partial decryption.
    pub fn missing_keys(&self) -> &[u64] {
        &self.missing_keys
    }

    /// Fetch, verify, and decode one block, memoizing the result.
    pub async fn block(&mut self, index: usize) -> Result<Arc<Vec<u8>>> {
        if index >= self.header.blocks.len() {
            return Err(Error::BlockIndexOutOfRange(
                index,
                self.header.blocks.len(),
            ));
        }

        if let Some(cached) = self.cache.get(&index) {
            return Ok(Arc::clone(cached));
        }

        let (offset, compressed_size, decompressed_size) = {
            let block = &self.header.blocks[index];
            (
                self.header.data_start + block.compressed_offset,
                block.compressed_size,
                block.decompressed_size,
            )
        };

        let raw = self.source.read_range(offset, compressed_size).await?;
        verify_block(&self.header.blocks[index], &raw, index)?;

        let decoded = match decode_block(&raw, index, &self.keys) {
            Ok(decoded) => decoded,
            Err(Error::KeyNotFound(key_name)) if self.partial_decrypt => {
                trace!("Zero-filling streamed block {index}, missing key {key_name:016x}");
                self.missing_keys.push(key_name);
                vec![0u8; decompressed_size as usize]
            }
            Err(e) => return Err(e),
        };

        let decoded = Arc::new(decoded);
        self.cache.put(index, Arc::clone(&decoded));
        Ok(decoded)
    }

    /// Read a decoded byte range, decoding only the blocks it touches.
    pub async fn read_range(&mut self, start: u64, len: usize) -> Result<Vec<u8>> {
        let end = start + len as u64;
        let mut out = Vec::with_capacity(len);

        for index in 0..self.header.blocks.len() {
            let (block_start, block_len) = {
                let block = &self.header.blocks[index];
                (
                    block.decompressed_offset,
                    u64::from(block.decompressed_size),
                )
            };
            let block_end = block_start + block_len;

            if block_end <= start {
                continue;
            }
            if block_start >= end {
                break;
            }

            let decoded = self.block(index).await?;
            let from = start.saturating_sub(block_start) as usize;
            let to = ((end.min(block_end) - block_start) as usize).min(decoded.len());
            if from < to {
                out.extend_from_slice(&decoded[from..to]);
            }
        }

        Ok(out)
    }

    /// Decoded blocks from `start` onward, in order.
    pub fn blocks_from(
        &mut self,
        start: usize,
    ) -> impl Stream<Item = Result<Arc<Vec<u8>>>> + '_ {
        futures::stream::try_unfold((self, start), |(this, index)| async move {
            if index >= this.header.blocks.len() {
                return Ok(None);
            }
            let block = this.block(index).await?;
            Ok(Some((block, (this, index + 1))))
        })
    }

    /// All decoded blocks, in order. Calling again restarts at block zero.
    pub fn blocks(&mut self) -> impl Stream<Item = Result<Arc<Vec<u8>>>> + '_ {
        self.blocks_from(0)
    }
}
