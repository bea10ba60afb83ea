//! Regional patch service client.
//!
//! The patch service publishes, per product, a `versions` manifest naming
//! the current build and CDN configs and a `cdns` manifest listing mirror
//! hosts. Both are pipe-separated tables.

use reqwest::Client;
use tracing::debug;

use warchest_tact::manifest::{self, CdnsRow, VersionsRow};

use crate::{Result, build_http_client};

/// Client for a regional patch service.
#[derive(Debug, Clone)]
pub struct PatchServer {
    client: Client,
    base_url: Option<String>,
}

impl PatchServer {
    /// Client against the production patch service. The endpoint host is
    /// derived from the region per request.
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_http_client()?,
            base_url: None,
        })
    }

    /// Route every request to a fixed base URL instead of the per-region
    /// production host. Used for custom or mirrored patch services.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    fn endpoint_url(&self, region: &str, product: &str, endpoint: &str) -> String {
        match &self.base_url {
            Some(base) => format!("{}/{product}/{endpoint}", base.trim_end_matches('/')),
            None => format!("https://{region}.version.battle.net/{product}/{endpoint}"),
        }
    }

    async fn fetch_manifest(&self, region: &str, product: &str, endpoint: &str) -> Result<String> {
        let url = self.endpoint_url(region, product, endpoint);
        debug!("Fetching {endpoint} manifest from {url}");

        let response = self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    /// Current `versions` manifest rows for a product.
    pub async fn versions(&self, region: &str, product: &str) -> Result<Vec<VersionsRow>> {
        let text = self.fetch_manifest(region, product, "versions").await?;
        Ok(manifest::parse_versions(&text)?)
    }

    /// Current `cdns` manifest rows for a product.
    pub async fn cdns(&self, region: &str, product: &str) -> Result<Vec<CdnsRow>> {
        let text = self.fetch_manifest(region, product, "cdns").await?;
        Ok(manifest::parse_cdns(&text)?)
    }
}
