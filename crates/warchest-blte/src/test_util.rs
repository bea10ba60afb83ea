//! Builders for synthetic container blobs used across the unit tests.

use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use warchest_crypto::salsa20::encrypt_salsa20;

use crate::BLTE_MAGIC;

/// Blob with `headerSize == 0`: magic, zero size field, one raw block
/// (type flag included in `block`).
pub fn unchunked_blob(block: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(8 + block.len());
    blob.extend_from_slice(&BLTE_MAGIC.to_le_bytes());
    blob.extend_from_slice(&0u32.to_be_bytes());
    blob.extend_from_slice(block);
    blob
}

/// Blob with a block table. Each entry is `(raw block bytes including the
/// type flag, table decompressedSize, whether to record a real checksum)`.
pub fn chunked_blob(blocks: &[(Vec<u8>, u32, bool)]) -> Vec<u8> {
    let header_size = 24 * blocks.len() as u32 + 12;
    let mut blob = Vec::new();

    blob.extend_from_slice(&BLTE_MAGIC.to_le_bytes());
    blob.extend_from_slice(&header_size.to_be_bytes());
    blob.push(0x0F);
    blob.extend_from_slice(&(blocks.len() as u32).to_be_bytes()[1..]);

    for (raw, decompressed_size, hashed) in blocks {
        blob.extend_from_slice(&(raw.len() as u32).to_be_bytes());
        blob.extend_from_slice(&decompressed_size.to_be_bytes());
        if *hashed {
            blob.extend_from_slice(&md5::compute(raw).0);
        } else {
            blob.extend_from_slice(&[0u8; 16]);
        }
    }

    for (raw, _, _) in blocks {
        blob.extend_from_slice(raw);
    }

    blob
}

/// Zlib-compress a payload.
pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Build a raw `E` block around `inner` (itself a typed block).
pub fn encrypted_block(
    key_name: u64,
    key: [u8; 16],
    iv: &[u8],
    block_index: usize,
    inner: &[u8],
) -> Vec<u8> {
    let mut ciphertext = inner.to_vec();
    encrypt_salsa20(&mut ciphertext, &key, iv, block_index).unwrap();

    let mut raw = vec![b'E', 8];
    raw.extend_from_slice(&key_name.to_le_bytes());
    raw.push(iv.len() as u8);
    raw.extend_from_slice(iv);
    raw.push(0x53);
    raw.extend_from_slice(&ciphertext);
    raw
}
