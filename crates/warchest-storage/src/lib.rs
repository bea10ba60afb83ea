//! High-level stores over the retrieval pipeline.
//!
//! A store resolves a file data id through the key chain (root manifest to
//! content key, encoding table to encoding key) and produces decoded bytes.
//! [`RemoteStorage`] works entirely off a CDN through the disk cache;
//! [`LocalStorage`] mounts an installed game directory and falls back to
//! the CDN only for entries the install is missing. Both hand out whole
//! files or lazy [`FileStream`]s that fetch blocks on demand.

pub mod error;
pub mod local;
pub mod remote;
pub mod session;

#[cfg(test)]
pub(crate) mod test_util;

pub use error::{Error, Result};
pub use local::{LocalConfig, LocalStorage};
pub use remote::{ArchiveLocation, RemoteConfig, RemoteStorage};
pub use session::{FetchOptions, NameIndex, Session};

use std::time::Duration;

use warchest_blte::{BlockSource, BlteStream};

/// Stable cache name of the encoding table.
pub(crate) const ENCODING_FILE: &str = "encoding";

/// Stable cache name of the root manifest.
pub(crate) const ROOT_FILE: &str = "root";

/// Bytes fetched up front when probing a container header; almost every
/// header fits, and the rare oversized one is refetched at its declared
/// size.
pub(crate) const HEADER_PROBE: u64 = 4096;

/// Default age after which cached CDN objects are swept.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Lazy block stream over a stored file.
pub type FileStream = BlteStream<Box<dyn BlockSource>>;
