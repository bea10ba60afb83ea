//! Error types for store opening and file retrieval.

use thiserror::Error;

use warchest_tact::{ContentKey, EncodingKey};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Storage error types.
#[derive(Error, Debug)]
pub enum Error {
    /// No matching row in the local `.build.info` manifest.
    #[error("no build found for {0}")]
    BuildNotFound(String),

    /// The versions or cdns manifest has no row for the requested region.
    #[error("region {0} missing from the patch manifests")]
    RegionNotFound(String),

    /// The encoding table has no entry for this content key.
    #[error("no encoding entry for content key {0}")]
    UnknownContentKey(ContentKey),

    /// The caller-supplied name index does not know this name.
    #[error("{0} is not in the name index")]
    NameNotIndexed(String),

    /// The local `.idx` tables have no entry for this encoding key.
    #[error("{0} is not in local data")]
    NotInLocalData(EncodingKey),

    /// The local data range for this key is all zeros, a hole left by a
    /// partial install.
    #[error("local data for {0} is zeroed")]
    EmptyLocalData(EncodingKey),

    /// The local data range does not start with the container magic.
    #[error("local data for {0} is not a container")]
    NotContainer(EncodingKey),

    /// Metadata parse error from the manifest and index layer.
    #[error("metadata error: {0}")]
    Tact(#[from] warchest_tact::Error),

    /// Network error from the patch service or CDN layer.
    #[error("network error: {0}")]
    Cdn(#[from] warchest_cdn::Error),

    /// Container decode error.
    #[error("container error: {0}")]
    Blte(#[from] warchest_blte::Error),

    /// Disk cache error.
    #[error("cache error: {0}")]
    Cache(#[from] warchest_cache::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A fetched config document was not valid UTF-8.
    #[error("config is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}
