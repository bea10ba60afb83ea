//! Disk cache for retrieved content.
//!
//! Cached bytes live under one cache root: per-build directories keyed by
//! build-config hash, a `data/` store for content blobs, and an `indices/`
//! store for archive indices. Every stored file is tracked in a SHA-1
//! integrity ledger; a read whose bytes no longer match the ledger is a
//! cache miss, never an error, so callers fall through to slower sources.
//! Builds untouched for longer than a TTL are swept away wholesale.

use std::path::{Path, PathBuf};

pub mod build;
pub mod error;
mod expire;
pub mod ledger;

pub use build::{BuildCache, BuildManifest, CacheRoot};
pub use error::{Error, Result};
pub use ledger::IntegrityLedger;

/// Get the default cache root directory
///
/// Returns a path like:
/// - Linux: `~/.cache/warchest`
/// - macOS: `~/Library/Caches/warchest`
/// - Windows: `C:\Users\{user}\AppData\Local\warchest`
pub fn default_cache_dir() -> Result<PathBuf> {
    dirs::cache_dir()
        .ok_or(Error::CacheDirectoryNotFound)
        .map(|dir| dir.join("warchest"))
}

/// Ensure a directory exists, creating it if necessary
pub(crate) async fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if tokio::fs::metadata(path).await.is_err() {
        tokio::fs::create_dir_all(path).await?;
    }
    Ok(())
}
