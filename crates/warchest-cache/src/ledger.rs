//! SHA-1 integrity ledger.
//!
//! One JSON file maps every cached file path to the SHA-1 of the bytes
//! that were stored there. The ledger is loaded once per cache root;
//! callers arriving before the load finishes suspend on the same load
//! instead of issuing their own. A missing or malformed ledger file
//! starts empty, which invalidates the entire cache by making every
//! lookup miss.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::ensure_dir;

type Entries = Mutex<HashMap<String, String>>;

pub struct IntegrityLedger {
    path: PathBuf,
    entries: OnceCell<Entries>,
}

impl IntegrityLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: OnceCell::new(),
        }
    }

    async fn entries(&self) -> &Entries {
        self.entries
            .get_or_init(|| async {
                let entries = match tokio::fs::read(&self.path).await {
                    Ok(raw) => match serde_json::from_slice(&raw) {
                        Ok(map) => map,
                        Err(e) => {
                            warn!(
                                "Malformed integrity ledger at {}, invalidating cache: {e}",
                                self.path.display()
                            );
                            HashMap::new()
                        }
                    },
                    Err(e) => {
                        debug!("No integrity ledger at {} ({e})", self.path.display());
                        HashMap::new()
                    }
                };
                Mutex::new(entries)
            })
            .await
    }

    /// Suspend until the ledger has been loaded.
    pub async fn ready(&self) {
        self.entries().await;
    }

    /// The hash recorded for a path at store time, if any.
    pub async fn recorded_hash(&self, path: &Path) -> Option<String> {
        self.entries().await.lock().get(&ledger_key(path)).cloned()
    }

    /// Record the hash of bytes about to be stored at `path`.
    pub async fn record(&self, path: &Path, data: &[u8]) {
        let digest = hex::encode(Sha1::digest(data));
        self.entries().await.lock().insert(ledger_key(path), digest);
    }

    /// Write the ledger back to disk. Failures are logged, not
    /// propagated; the worst outcome is a wider cache miss later.
    pub async fn persist(&self) {
        let serialized = {
            let entries = self.entries().await.lock();
            serde_json::to_vec(&*entries)
        };
        match serialized {
            Ok(raw) => {
                if let Some(parent) = self.path.parent() {
                    if let Err(e) = ensure_dir(parent).await {
                        warn!("Could not create ledger directory: {e}");
                        return;
                    }
                }
                if let Err(e) = tokio::fs::write(&self.path, raw).await {
                    warn!("Could not persist integrity ledger: {e}");
                }
            }
            Err(e) => warn!("Could not serialize integrity ledger: {e}"),
        }
    }
}

fn ledger_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
