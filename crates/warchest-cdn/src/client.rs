//! Content fetches against a ranked mirror list.
//!
//! URLs follow the CDN fan-out layout: the first two byte pairs of the
//! hash become directory levels, so `abcdef...` lives at
//! `{host}/{path}/{namespace}/ab/cd/abcdef...`. Requests walk the ranking
//! fastest-first; hosts that fail at the transport level are reported back
//! to the resolver and skipped from then on.

use std::sync::Arc;

use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use warchest_tact::EncodingKey;

use crate::resolver::{MirrorResolver, RankedHost};
use crate::{Error, Result, build_http_client};

/// HTTP client bound to one ranked mirror list and CDN path prefix.
#[derive(Clone)]
pub struct CdnClient {
    client: Client,
    resolver: Arc<MirrorResolver>,
    hosts: Arc<Vec<RankedHost>>,
    path: String,
}

impl CdnClient {
    pub fn new(
        resolver: Arc<MirrorResolver>,
        hosts: Arc<Vec<RankedHost>>,
        path: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self::with_client(build_http_client()?, resolver, hosts, path))
    }

    pub fn with_client(
        client: Client,
        resolver: Arc<MirrorResolver>,
        hosts: Arc<Vec<RankedHost>>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            client,
            resolver,
            hosts,
            path: path.into(),
        }
    }

    /// Fetch a configuration file (build config, CDN config) by hex hash.
    pub async fn fetch_config(&self, hash: &str) -> Result<Vec<u8>> {
        self.get("config", hash, "", None).await
    }

    /// Fetch a full data object by encoding key.
    pub async fn fetch_data(&self, key: &EncodingKey) -> Result<Vec<u8>> {
        self.get("data", &key.to_string(), "", None).await
    }

    /// Fetch `len` bytes of a data object starting at `offset`.
    pub async fn fetch_data_range(
        &self,
        key: &EncodingKey,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>> {
        self.get("data", &key.to_string(), "", Some((offset, len)))
            .await
    }

    /// Fetch the `.index` companion of an archive.
    pub async fn fetch_index(&self, key: &EncodingKey) -> Result<Vec<u8>> {
        self.get("data", &key.to_string(), ".index", None).await
    }

    async fn get(
        &self,
        namespace: &str,
        hash: &str,
        suffix: &str,
        range: Option<(u64, u64)>,
    ) -> Result<Vec<u8>> {
        validate_hash(hash)?;

        for ranked in self.hosts.iter() {
            if self.resolver.is_failed(&ranked.host) {
                continue;
            }
            let url = format!(
                "{}/{}/{namespace}/{}/{}/{hash}{suffix}",
                ranked.host,
                self.path,
                &hash[0..2],
                &hash[2..4]
            );
            debug!("Fetching {url}");

            let mut request = self.client.get(&url);
            if let Some((offset, len)) = range {
                request = request.header(RANGE, format!("bytes={}-{}", offset, offset + len - 1));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::NOT_FOUND {
                        // The object is absent from the whole CDN, not
                        // just this mirror; rotating would only repeat it.
                        return Err(Error::content_not_found(hash));
                    }
                    if !status.is_success() {
                        warn!("{} answered {status} for {namespace}/{hash}", ranked.host);
                        continue;
                    }
                    match response.bytes().await {
                        Ok(body) => return Ok(body.to_vec()),
                        Err(e) => {
                            warn!("Body read from {} failed: {e}", ranked.host);
                            self.resolver.mark_failed(&ranked.host);
                        }
                    }
                }
                Err(e) => {
                    warn!("Request to {} failed: {e}", ranked.host);
                    self.resolver.mark_failed(&ranked.host);
                }
            }
        }

        Err(Error::hosts_exhausted(format!("{namespace}/{hash}{suffix}")))
    }
}

fn validate_hash(hash: &str) -> Result<()> {
    if hash.len() < 4 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::invalid_hash(hash));
    }
    Ok(())
}
