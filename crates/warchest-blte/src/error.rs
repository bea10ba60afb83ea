//! Error types for container parsing and decoding.

use thiserror::Error;

use crate::Md5Hash;

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Container error types.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Buffer does not start with the container magic.
    #[error("invalid container magic: {0:?}")]
    InvalidMagic([u8; 4]),

    /// Header size field disagrees with the block table (`24 * blocks + 12`).
    #[error("invalid header size: expected {expected}, got {actual}")]
    InvalidHeaderSize { expected: u32, actual: u32 },

    /// Block table flag byte is not `0x0F`, or the block count is zero.
    #[error("invalid block table: flag {flag:#04x}, {blocks} blocks")]
    InvalidBlockTable { flag: u8, blocks: u32 },

    /// Fewer bytes available than the structure requires.
    #[error("truncated data: expected {expected} bytes, got {actual}")]
    TruncatedData { expected: u64, actual: u64 },

    /// Whole-blob or header hash does not match the expected encoding key.
    #[error("blob checksum mismatch: expected {}, got {}", hex::encode(expected), hex::encode(actual))]
    BlobChecksumMismatch { expected: Md5Hash, actual: Md5Hash },

    /// A verified block's compressed bytes do not match its table hash.
    /// Always fatal, including under partial decryption.
    #[error("block {index} checksum mismatch: expected {}, got {}", hex::encode(expected), hex::encode(actual))]
    BlockChecksumMismatch {
        index: usize,
        expected: Md5Hash,
        actual: Md5Hash,
    },

    /// Block type flag is not one of `N`, `Z`, `E`, `F`.
    #[error("unknown block type: {0:#04x}")]
    UnknownBlockType(u8),

    /// `F` blocks (recursive frames) have no decoder.
    #[error("recursive frame blocks are not implemented")]
    RecursiveFrame,

    /// Encrypted block structure is malformed.
    #[error("invalid encrypted block: {0}")]
    InvalidEncryptedBlock(String),

    /// Cipher id other than Salsa20 (0x53).
    #[error("unsupported cipher: {0:#04x}")]
    UnsupportedCipher(u8),

    /// No key with this name in the ring. Recoverable: partial-decrypt mode
    /// zero-fills the block instead of failing.
    #[error("missing decryption key: {0:016x}")]
    KeyNotFound(u64),

    /// Inflation of a `Z` block failed.
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    /// Error from the crypto layer.
    #[error("crypto error: {0}")]
    Crypto(#[from] warchest_crypto::Error),

    /// Requested block index is past the end of the table.
    #[error("block index {0} out of range, table has {1} blocks")]
    BlockIndexOutOfRange(usize, usize),

    /// A lazy block source failed to produce raw bytes.
    #[error("block fetch failed: {0}")]
    BlockFetch(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wrap a source-specific failure from a [`crate::BlockSource`].
    pub fn fetch(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::BlockFetch(Box::new(err))
    }
}
