//! Salsa20 stream cipher setup for encrypted container blocks.

use cipher::{KeyIvInit, StreamCipher};
use salsa20::Salsa20;

use crate::{Error, Result};

/// Create the Salsa20 cipher used by encrypted container blocks.
///
/// The on-disk format carries a 16-byte key and a 4- or 8-byte IV:
/// - the key is extended to 32 bytes by duplication (the `salsa20` crate
///   implements the 256-bit core only)
/// - the IV is zero-padded to the 8-byte nonce
/// - the first 4 nonce bytes are XORed with the little-endian block index,
///   so every block of a blob gets a distinct keystream
pub fn init_salsa20(key: &[u8; 16], iv: &[u8], block_index: usize) -> Result<Salsa20> {
    if iv.len() > 8 {
        return Err(Error::InvalidIvSize(iv.len()));
    }

    let mut extended_key = [0u8; 32];
    extended_key[..16].copy_from_slice(key);
    extended_key[16..].copy_from_slice(key);

    let mut nonce = [0u8; 8];
    nonce[..iv.len()].copy_from_slice(iv);

    let index_bytes = (block_index as u32).to_le_bytes();
    for (n, b) in nonce.iter_mut().zip(index_bytes) {
        *n ^= b;
    }

    Ok(Salsa20::new(&extended_key.into(), &nonce.into()))
}

/// Decrypt a buffer in place.
pub fn decrypt_salsa20(data: &mut [u8], key: &[u8; 16], iv: &[u8], block_index: usize) -> Result<()> {
    let mut cipher = init_salsa20(key, iv, block_index)?;
    cipher
        .try_apply_keystream(data)
        .map_err(|e| Error::DecryptFailed(e.to_string()))?;

    Ok(())
}

/// Encrypt a buffer in place. Stream ciphers are symmetric, so this is the
/// same keystream application as [`decrypt_salsa20`].
pub fn encrypt_salsa20(data: &mut [u8], key: &[u8; 16], iv: &[u8], block_index: usize) -> Result<()> {
    decrypt_salsa20(data, key, iv, block_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = [0x01u8; 16];
        let iv = [0x02, 0x03, 0x04, 0x05];
        let plaintext = b"a small test payload";

        let mut buf = *plaintext;
        encrypt_salsa20(&mut buf, &key, &iv, 0).unwrap();
        assert_ne!(&buf, plaintext);

        decrypt_salsa20(&mut buf, &key, &iv, 0).unwrap();
        assert_eq!(&buf, plaintext);
    }

    #[test]
    fn block_index_salts_the_nonce() {
        let key = [0x01u8; 16];
        let iv = [0x02, 0x03, 0x04, 0x05];
        let plaintext = b"same bytes";

        let mut first = *plaintext;
        encrypt_salsa20(&mut first, &key, &iv, 0).unwrap();
        let mut second = *plaintext;
        encrypt_salsa20(&mut second, &key, &iv, 1).unwrap();
        assert_ne!(first, second);

        decrypt_salsa20(&mut first, &key, &iv, 0).unwrap();
        decrypt_salsa20(&mut second, &key, &iv, 1).unwrap();
        assert_eq!(&first, plaintext);
        assert_eq!(&second, plaintext);
    }

    #[test]
    fn eight_byte_iv_accepted() {
        let key = [0xAAu8; 16];
        let iv = [1, 2, 3, 4, 5, 6, 7, 8];
        let mut buf = [0x55u8; 32];

        encrypt_salsa20(&mut buf, &key, &iv, 3).unwrap();
        decrypt_salsa20(&mut buf, &key, &iv, 3).unwrap();
        assert_eq!(buf, [0x55u8; 32]);
    }

    #[test]
    fn oversized_iv_rejected() {
        let key = [0u8; 16];
        let iv = [0u8; 9];
        assert!(matches!(
            init_salsa20(&key, &iv, 0),
            Err(Error::InvalidIvSize(9))
        ));
    }
}
