//! Error types for crypto operations.

use thiserror::Error;

/// Errors that can occur during key management and block decryption.
#[derive(Error, Debug)]
pub enum Error {
    /// No key with this name is present in the ring. Recoverable by policy:
    /// callers may zero-fill the affected region instead of aborting.
    #[error("decryption key not found: {0:016x}")]
    KeyNotFound(u64),

    /// Key name is not a 16-digit hex string.
    #[error("invalid key name: {0}")]
    InvalidKeyName(String),

    /// Key material is not a 32-digit hex string.
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// IV longer than the 8-byte Salsa20 nonce.
    #[error("invalid IV size: expected at most 8 bytes, got {0}")]
    InvalidIvSize(usize),

    /// Keystream application failed.
    #[error("decryption failed: {0}")]
    DecryptFailed(String),

    /// Key file is not one of the recognised shapes.
    #[error("invalid key file: {0}")]
    InvalidKeyFile(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
