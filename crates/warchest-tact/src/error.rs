//! Error types for TACT parsing and lookups.

use thiserror::Error;

/// Errors produced while parsing TACT data or resolving keys through it.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error while reading structured data.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A format-identifying magic value did not match.
    #[error("invalid {0} magic")]
    BadMagic(&'static str),

    /// A hex string was not valid hex.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// A key had the wrong byte length.
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// An index declared more entries than its data can hold.
    #[error("truncated index: {expected} bytes of entries, {actual} available")]
    TruncatedIndex { expected: u64, actual: u64 },

    /// Encoding tables with non-MD5 key widths are not supported.
    #[error("unsupported key widths in encoding table: ckey={ckey}, ekey={ekey}")]
    UnsupportedKeyWidth { ckey: u8, ekey: u8 },

    /// Root manifest version outside the known range.
    #[error("unsupported root manifest version: {0}")]
    UnsupportedRootVersion(u32),

    /// Delta-encoded file id sequence left the u32 range.
    #[error("file id sequence overflows u32")]
    FileIdOverflow,

    /// The root manifest has no entry for this file id.
    #[error("unknown file id: {0}")]
    UnknownFileId(u32),

    /// The file id exists but no variant matches the active locales.
    #[error("no variant of file id {0} matches the active locales")]
    NoLocaleVariant(u32),

    /// A pipe-separated manifest was malformed.
    #[error("malformed manifest: {0}")]
    InvalidManifest(String),

    /// A configuration file lacks a required key.
    #[error("missing configuration key: {0}")]
    MissingConfigKey(&'static str),
}
