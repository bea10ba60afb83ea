//! Patch service and CDN mirror access.
//!
//! Three pieces cooperate here: [`PatchServer`] asks the regional patch
//! service which build is current and which CDN mirrors carry it,
//! [`MirrorResolver`] latency-ranks those mirrors (memoizing both the
//! ranking and permanent host failures), and [`CdnClient`] downloads
//! configs, indexes, and data blobs through the ranked list with failover.

pub mod client;
pub mod error;
pub mod patch;
pub mod resolver;

pub use client::CdnClient;
pub use error::Error;
pub use patch::PatchServer;
pub use resolver::{MirrorResolver, RankedHost};

/// Result type for CDN operations.
pub type Result<T> = std::result::Result<T, Error>;

use std::time::Duration;

/// Shared HTTP client defaults: generous transfer timeout, compressed
/// transfer encodings enabled.
pub(crate) fn build_http_client() -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(300))
        .pool_max_idle_per_host(20)
        .gzip(true)
        .deflate(true)
        .build()?;
    Ok(client)
}
