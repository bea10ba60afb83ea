//! Stale build sweep.
//!
//! Build directories are named by 32-hex-char build keys; anything else
//! under `builds/` is left alone. A build whose manifest is unreadable
//! or whose `lastAccess` is older than the TTL is deleted wholesale.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

use crate::Result;
use crate::build::{BuildManifest, MANIFEST_FILE, unix_millis};

pub(crate) async fn sweep(builds_dir: &Path, ttl: Duration) -> Result<u64> {
    if ttl.is_zero() {
        warn!("Stale build cleanup skipped: cache expiry is disabled");
        return Ok(0);
    }

    let mut entries = match tokio::fs::read_dir(builds_dir).await {
        Ok(entries) => entries,
        Err(_) => return Ok(0),
    };

    let now = unix_millis();
    let mut reclaimed = 0u64;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_build_key(name) || !entry.file_type().await?.is_dir() {
            continue;
        }

        let dir = entry.path();
        let mut manifest_len = 0u64;

        let stale = match tokio::fs::read(dir.join(MANIFEST_FILE)).await {
            Ok(raw) => {
                manifest_len = raw.len() as u64;
                match serde_json::from_slice::<BuildManifest>(&raw) {
                    Ok(manifest) => {
                        let age = now.saturating_sub(manifest.last_access);
                        u128::from(age) > ttl.as_millis()
                    }
                    Err(_) => {
                        debug!("Unreadable manifest for {name}, marking for deletion");
                        true
                    }
                }
            }
            Err(_) => {
                debug!("No manifest for {name}, marking for deletion");
                true
            }
        };
        if !stale {
            continue;
        }

        debug!("Build cache {name} has expired, deleting");
        let dir_size = directory_size(&dir);
        tokio::fs::remove_dir_all(&dir).await?;
        // Manifests never enter the size counter, so they do not leave it.
        reclaimed += dir_size.saturating_sub(manifest_len);
    }

    Ok(reclaimed)
}

fn is_build_key(name: &str) -> bool {
    name.len() == 32 && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn directory_size(dir: &Path) -> u64 {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .flatten()
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}
