//! Parsers for the TACT content distribution formats.
//!
//! This crate covers the metadata side of content retrieval: version and CDN
//! manifests, build and CDN configuration files, the encoding table that maps
//! content keys to encoding keys, the root manifest that maps file ids to
//! content keys, and the archive indexes (remote `.index` and local `.idx`)
//! that locate encoded blobs inside packed archives.
//!
//! Everything here is a pure parser over in-memory bytes or text. Fetching,
//! caching, and decoding live in the companion crates.

pub mod archive;
pub mod config;
pub mod encoding;
pub mod error;
pub mod idx;
pub mod keys;
pub mod manifest;
pub mod root;

pub use archive::{ArchiveIndex, ArchiveIndexEntry};
pub use config::{BuildConfig, CdnConfig, ConfigFile};
pub use encoding::{EncodingEntry, EncodingTable};
pub use error::Error;
pub use idx::{IdxEntry, IdxFile};
pub use keys::{ContentKey, EncodingKey};
pub use manifest::{BuildInfoRow, CdnsRow, PipeTable, VersionsRow};
pub use root::{ContentFlags, LocaleFlags, RootFile, RootVariant};

/// Result type for TACT parsing operations.
pub type Result<T> = std::result::Result<T, Error>;
