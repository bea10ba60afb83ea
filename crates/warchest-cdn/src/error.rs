//! Error types for patch service and CDN operations.

use thiserror::Error;

/// Errors raised while talking to the patch service or CDN mirrors.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A fetched manifest could not be parsed.
    #[error("manifest error: {0}")]
    Tact(#[from] warchest_tact::Error),

    /// The content exists on no mirror (a mirror answered 404).
    #[error("content not found: {hash}")]
    ContentNotFound {
        /// Hash the content was requested by.
        hash: String,
    },

    /// Every ranked mirror failed for this request.
    #[error("all CDN hosts exhausted for {resource}")]
    HostsExhausted {
        /// Resource being requested.
        resource: String,
    },

    /// No candidate mirror answered the latency probe.
    #[error("no reachable CDN hosts for region {region}")]
    NoReachableHosts {
        /// Region the ranking was requested for.
        region: String,
    },

    /// A content hash was not hex of a usable length.
    #[error("invalid content hash: {hash}")]
    InvalidHash {
        /// The offending hash string.
        hash: String,
    },
}

/// Result type for CDN operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a content not found error.
    pub fn content_not_found(hash: impl Into<String>) -> Self {
        Self::ContentNotFound { hash: hash.into() }
    }

    /// Create a hosts exhausted error.
    pub fn hosts_exhausted(resource: impl Into<String>) -> Self {
        Self::HostsExhausted {
            resource: resource.into(),
        }
    }

    /// Create a no reachable hosts error.
    pub fn no_reachable_hosts(region: impl Into<String>) -> Self {
        Self::NoReachableHosts {
            region: region.into(),
        }
    }

    /// Create an invalid hash error.
    pub fn invalid_hash(hash: impl Into<String>) -> Self {
        Self::InvalidHash { hash: hash.into() }
    }
}
