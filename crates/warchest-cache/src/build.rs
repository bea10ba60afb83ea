//! Cache root and per-build cache directories.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{debug, trace};

use crate::ledger::IntegrityLedger;
use crate::{Result, ensure_dir, expire};

const INTEGRITY_FILE: &str = "cacheintegrity";
const BUILDS_DIR: &str = "builds";
const DATA_DIR: &str = "data";
const INDEXES_DIR: &str = "indices";
pub(crate) const MANIFEST_FILE: &str = "manifest.json";

/// Per-build bookkeeping stored as `manifest.json` inside the build
/// directory. `lastAccess` drives the stale-build sweep.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildManifest {
    #[serde(default)]
    pub last_access: u64,
}

/// One on-disk cache: a ledger, a running size counter, and the build,
/// data, and index stores underneath a single directory.
///
/// Handles are cheap to clone and share the ledger and counter.
#[derive(Clone)]
pub struct CacheRoot {
    dir: PathBuf,
    ledger: Arc<IntegrityLedger>,
    size: Arc<AtomicU64>,
}

impl CacheRoot {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let ledger = Arc::new(IntegrityLedger::new(dir.join(INTEGRITY_FILE)));
        Self {
            dir,
            ledger,
            size: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cache under the platform cache directory (`~/.cache/warchest` on
    /// Linux).
    pub fn default_location() -> Result<Self> {
        crate::default_cache_dir().map(Self::new)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn builds_dir(&self) -> PathBuf {
        self.dir.join(BUILDS_DIR)
    }

    /// Cross-build store for content blobs, keyed by encoding key.
    pub fn data_dir(&self) -> PathBuf {
        self.dir.join(DATA_DIR)
    }

    /// Cross-build store for downloaded archive indices.
    pub fn indexes_dir(&self) -> PathBuf {
        self.dir.join(INDEXES_DIR)
    }

    /// Bytes written through this handle, minus bytes reclaimed by the
    /// stale-build sweep.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    /// Suspend until the integrity ledger has been loaded.
    pub async fn ready(&self) {
        self.ledger.ready().await;
    }

    /// Open (creating if necessary) the cache directory for one build
    /// and refresh its access time.
    pub async fn open_build(&self, key: &str) -> Result<BuildCache> {
        BuildCache::open(self.clone(), key).await
    }

    /// Integrity-checked read. Any failure, a missing file, a missing
    /// ledger entry, or a hash mismatch, is a miss rather than an error.
    pub async fn read_verified(&self, path: &Path) -> Option<Vec<u8>> {
        let recorded = self.ledger.recorded_hash(path).await;
        let Some(recorded) = recorded else {
            trace!("No integrity entry for {}, rejecting cache", path.display());
            return None;
        };

        let data = tokio::fs::read(path).await.ok()?;
        let actual = hex::encode(Sha1::digest(&data));
        if actual != recorded {
            debug!(
                "Bad integrity for {} ({actual} != {recorded}), rejecting cache",
                path.display()
            );
            return None;
        }
        Some(data)
    }

    /// Hash, record, and write bytes, then persist the ledger
    /// best-effort and bump the size counter.
    pub async fn write_tracked(&self, path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            ensure_dir(parent).await?;
        }

        self.ledger.record(path, data).await;
        trace!("Writing {} bytes to {}", data.len(), path.display());
        tokio::fs::write(path, data).await?;
        self.size.fetch_add(data.len() as u64, Ordering::Relaxed);

        self.ledger.persist().await;
        Ok(())
    }

    /// Delete build directories whose `lastAccess` is older than `ttl`
    /// and subtract their size from the counter. A zero TTL disables
    /// the sweep. Returns the bytes reclaimed.
    pub async fn expire_stale(&self, ttl: Duration) -> Result<u64> {
        let reclaimed = expire::sweep(&self.builds_dir(), ttl).await?;
        if reclaimed > 0 {
            let _ = self
                .size
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |size| {
                    Some(size.saturating_sub(reclaimed))
                });
        }
        Ok(reclaimed)
    }
}

/// Cache directory for a single build, keyed by its build-config hash.
#[derive(Clone)]
pub struct BuildCache {
    key: String,
    dir: PathBuf,
    root: CacheRoot,
}

impl BuildCache {
    pub(crate) async fn open(root: CacheRoot, key: &str) -> Result<Self> {
        let dir = root.builds_dir().join(key);
        ensure_dir(&dir).await?;

        let cache = Self {
            key: key.to_string(),
            dir,
            root,
        };
        cache.refresh_manifest().await?;
        Ok(cache)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The cache root this build directory lives under.
    pub fn cache_root(&self) -> &CacheRoot {
        &self.root
    }

    pub fn file_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Integrity-checked read of a named blob; misses on any failure.
    pub async fn get_file(&self, name: &str) -> Option<Vec<u8>> {
        self.root.read_verified(&self.file_path(name)).await
    }

    /// Store a named blob and record it in the ledger.
    pub async fn store_file(&self, name: &str, data: &[u8]) -> Result<()> {
        self.root.write_tracked(&self.file_path(name), data).await
    }

    async fn refresh_manifest(&self) -> Result<()> {
        let path = self.dir.join(MANIFEST_FILE);

        let mut manifest = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_default(),
            Err(_) => {
                debug!("No cache manifest found for {}", self.key);
                BuildManifest::default()
            }
        };
        manifest.last_access = unix_millis();

        tokio::fs::write(&path, serde_json::to_vec(&manifest)?).await?;
        Ok(())
    }
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}
