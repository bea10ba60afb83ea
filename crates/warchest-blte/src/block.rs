//! Block-type dispatch and per-block decoding.

use std::io::Read;

use flate2::read::ZlibDecoder;
use warchest_crypto::KeyRing;
use warchest_crypto::salsa20::decrypt_salsa20;

use crate::{ContainerBlock, Error, Md5Hash, Result};

const CIPHER_SALSA20: u8 = 0x53;

/// Block payload kinds, keyed by the leading type flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockType {
    /// `N`: bytes are copied through unmodified.
    Plain,
    /// `Z`: bytes are a zlib stream.
    Deflate,
    /// `E`: bytes are encrypted; the plaintext is itself a typed block.
    Encrypted,
    /// `F`: nested frame, no decoder exists.
    RecursiveFrame,
}

impl BlockType {
    fn from_flag(flag: u8) -> Result<Self> {
        match flag {
            b'N' => Ok(Self::Plain),
            b'Z' => Ok(Self::Deflate),
            b'E' => Ok(Self::Encrypted),
            b'F' => Ok(Self::RecursiveFrame),
            other => Err(Error::UnknownBlockType(other)),
        }
    }
}

/// Check a block's raw bytes against its table checksum.
///
/// Sentinel (all-zero) checksums are not verified. A mismatch is fatal
/// regardless of decrypt policy: it means corruption, not missing keys.
pub fn verify_block(block: &ContainerBlock, raw: &[u8], index: usize) -> Result<()> {
    if !block.is_verified() {
        return Ok(());
    }

    let actual: Md5Hash = md5::compute(raw).0;
    if actual != block.checksum {
        return Err(Error::BlockChecksumMismatch {
            index,
            expected: block.checksum,
            actual,
        });
    }

    Ok(())
}

/// Decode one raw block (type flag included) into its plaintext bytes.
///
/// Encrypted blocks decrypt and recurse, since the plaintext carries its own
/// type flag. A missing ring key surfaces as [`Error::KeyNotFound`] so the
/// caller can apply its zero-fill policy.
pub fn decode_block(raw: &[u8], block_index: usize, keys: &KeyRing) -> Result<Vec<u8>> {
    let (&flag, payload) = raw.split_first().ok_or(Error::TruncatedData {
        expected: 1,
        actual: 0,
    })?;

    match BlockType::from_flag(flag)? {
        BlockType::Plain => Ok(payload.to_vec()),
        BlockType::Deflate => inflate(payload),
        BlockType::Encrypted => {
            let plaintext = decrypt_payload(payload, block_index, keys)?;
            decode_block(&plaintext, block_index, keys)
        }
        BlockType::RecursiveFrame => Err(Error::RecursiveFrame),
    }
}

fn inflate(payload: &[u8]) -> Result<Vec<u8>> {
    let mut decoded = Vec::new();
    ZlibDecoder::new(payload)
        .read_to_end(&mut decoded)
        .map_err(|e| Error::DecompressionFailed(e.to_string()))?;
    Ok(decoded)
}

/// Parse the encrypted-block envelope and decrypt the remainder.
///
/// Layout: `keyNameSize(1, must be 8)`, key name (8 bytes, stored reversed),
/// `ivSize(1, 4 or 8)`, IV, `cipherId(1, Salsa20)`, ciphertext. Structural
/// checks come before the key lookup so malformed blocks are format errors
/// even when the key is also missing.
fn decrypt_payload(payload: &[u8], block_index: usize, keys: &KeyRing) -> Result<Vec<u8>> {
    let mut offset = 0usize;

    let key_name_size = *payload.get(offset).ok_or_else(truncated_envelope)?;
    offset += 1;
    if key_name_size != 8 {
        return Err(Error::InvalidEncryptedBlock(format!(
            "unexpected keyNameSize: {key_name_size}"
        )));
    }

    let raw_name = payload
        .get(offset..offset + 8)
        .ok_or_else(truncated_envelope)?;
    offset += 8;
    // The name is stored byte-reversed; canonical form is the little-endian
    // u64 rendered as 16 hex digits.
    let mut name_bytes = [0u8; 8];
    name_bytes.copy_from_slice(raw_name);
    let key_name = u64::from_le_bytes(name_bytes);

    let iv_size = *payload.get(offset).ok_or_else(truncated_envelope)?;
    offset += 1;
    if iv_size != 4 && iv_size != 8 {
        return Err(Error::InvalidEncryptedBlock(format!(
            "unexpected ivSize: {iv_size}"
        )));
    }

    let iv = payload
        .get(offset..offset + iv_size as usize)
        .ok_or_else(truncated_envelope)?;
    offset += iv_size as usize;

    let cipher_id = *payload.get(offset).ok_or_else(truncated_envelope)?;
    offset += 1;
    if cipher_id != CIPHER_SALSA20 {
        return Err(Error::UnsupportedCipher(cipher_id));
    }

    let key = keys.key(key_name).ok_or(Error::KeyNotFound(key_name))?;

    let mut plaintext = payload[offset..].to_vec();
    decrypt_salsa20(&mut plaintext, key, iv, block_index)?;
    Ok(plaintext)
}

fn truncated_envelope() -> Error {
    Error::InvalidEncryptedBlock("unexpected end of data".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SENTINEL_CHECKSUM;
    use crate::test_util::{deflate, encrypted_block};
    use pretty_assertions::assert_eq;

    fn test_ring() -> KeyRing {
        let mut ring = KeyRing::new();
        ring.add_key(0xfa505078126acb3e, [0x42u8; 16]);
        ring
    }

    #[test]
    fn plain_block_copies_through() {
        let decoded = decode_block(b"Nhello", 0, &KeyRing::new()).unwrap();
        assert_eq!(decoded, b"hello");
    }

    #[test]
    fn deflate_block_inflates() {
        let mut raw = vec![b'Z'];
        raw.extend_from_slice(&deflate(b"some compressible data, repeated and repeated"));

        let decoded = decode_block(&raw, 0, &KeyRing::new()).unwrap();
        assert_eq!(decoded, b"some compressible data, repeated and repeated");
    }

    #[test]
    fn encrypted_block_decrypts_and_recurses() {
        let ring = test_ring();
        let mut inner = vec![b'Z'];
        inner.extend_from_slice(&deflate(b"nested payload"));

        let raw = encrypted_block(0xfa505078126acb3e, [0x42u8; 16], &[9, 8, 7, 6], 3, &inner);
        let decoded = decode_block(&raw, 3, &ring).unwrap();
        assert_eq!(decoded, b"nested payload");
    }

    #[test]
    fn encrypted_block_wrong_index_garbles() {
        let ring = test_ring();
        let raw = encrypted_block(0xfa505078126acb3e, [0x42u8; 16], &[9, 8, 7, 6], 3, b"Nabc");

        // A different block index salts the nonce differently, so the
        // plaintext cannot come back intact.
        if let Ok(decoded) = decode_block(&raw, 4, &ring) {
            assert_ne!(decoded, b"abc");
        }
    }

    #[test]
    fn missing_key_is_keyed_error() {
        let raw = encrypted_block(0xdeadbeefcafef00d, [0u8; 16], &[1, 2, 3, 4], 0, b"Nx");
        match decode_block(&raw, 0, &KeyRing::new()) {
            Err(Error::KeyNotFound(name)) => assert_eq!(name, 0xdeadbeefcafef00d),
            other => panic!("expected KeyNotFound, got {other:?}"),
        }
    }

    #[test]
    fn bad_key_name_size_rejected() {
        let raw = [b'E', 7, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            decode_block(&raw, 0, &KeyRing::new()),
            Err(Error::InvalidEncryptedBlock(_))
        ));
    }

    #[test]
    fn bad_iv_size_rejected() {
        let mut raw = vec![b'E', 8];
        raw.extend_from_slice(&[0u8; 8]);
        raw.push(5);
        raw.extend_from_slice(&[0u8; 5]);
        raw.push(CIPHER_SALSA20);

        assert!(matches!(
            decode_block(&raw, 0, &KeyRing::new()),
            Err(Error::InvalidEncryptedBlock(_))
        ));
    }

    #[test]
    fn unknown_cipher_rejected() {
        let mut raw = vec![b'E', 8];
        raw.extend_from_slice(&[0u8; 8]);
        raw.push(4);
        raw.extend_from_slice(&[0u8; 4]);
        raw.push(0x41);

        // Format checks precede the key lookup, so this must not be a
        // KeyNotFound even though the ring is empty.
        assert!(matches!(
            decode_block(&raw, 0, &KeyRing::new()),
            Err(Error::UnsupportedCipher(0x41))
        ));
    }

    #[test]
    fn recursive_frame_is_fatal() {
        assert!(matches!(
            decode_block(b"Fanything", 0, &KeyRing::new()),
            Err(Error::RecursiveFrame)
        ));
    }

    #[test]
    fn unknown_type_is_fatal() {
        assert!(matches!(
            decode_block(b"Xanything", 0, &KeyRing::new()),
            Err(Error::UnknownBlockType(0x58))
        ));
    }

    #[test]
    fn verify_skips_sentinel() {
        let block = ContainerBlock {
            compressed_size: 4,
            decompressed_size: 3,
            checksum: SENTINEL_CHECKSUM,
            compressed_offset: 0,
            decompressed_offset: 0,
        };
        verify_block(&block, b"Nabc", 0).unwrap();
    }

    #[test]
    fn verify_catches_tampering() {
        let raw = b"Nabc";
        let block = ContainerBlock {
            compressed_size: 4,
            decompressed_size: 3,
            checksum: md5::compute(raw).0,
            compressed_offset: 0,
            decompressed_offset: 0,
        };

        verify_block(&block, raw, 0).unwrap();
        assert!(matches!(
            verify_block(&block, b"Nabd", 0),
            Err(Error::BlockChecksumMismatch { index: 0, .. })
        ));
    }
}
