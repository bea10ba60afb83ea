//! Latency ranking of CDN mirrors.
//!
//! Mirror lists come from the `cdns` manifest plus any locally configured
//! fallbacks. Every candidate is probed once, concurrently; a host is alive
//! if it answers at all (any HTTP status), and dead only on transport
//! failure. Rankings are memoized per region and host list, and a host
//! reported failed stays excluded for the life of the resolver.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use reqwest::Client;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{Error, Result, build_http_client};

/// A probed mirror and its observed round-trip latency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedHost {
    /// Normalized base URL, scheme included, no trailing slash.
    pub host: String,
    pub latency: Duration,
}

type CacheKey = (String, Vec<String>);
type Ranking = Arc<Vec<RankedHost>>;

/// Probes, ranks, and memoizes CDN mirrors.
pub struct MirrorResolver {
    client: Client,
    failed: RwLock<HashSet<String>>,
    cache: Mutex<HashMap<CacheKey, Arc<OnceCell<Ranking>>>>,
}

impl MirrorResolver {
    pub fn new() -> Result<Self> {
        Ok(Self::with_client(build_http_client()?))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            failed: RwLock::new(HashSet::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Rank the merged mirror list for a region, slowest last.
    ///
    /// `hosts` and `fallbacks` are merged in order and deduplicated;
    /// concurrent calls for the same region and list share one probe run.
    /// Fails only when no candidate answers.
    pub async fn resolve(
        &self,
        region: &str,
        hosts: &[String],
        fallbacks: &[String],
    ) -> Result<Ranking> {
        let mut merged: Vec<String> = Vec::new();
        for host in hosts.iter().chain(fallbacks) {
            let normalized = normalize_host(host);
            if !merged.contains(&normalized) {
                merged.push(normalized);
            }
        }

        let cell = {
            let mut cache = self.cache.lock();
            Arc::clone(
                cache
                    .entry((region.to_string(), merged.clone()))
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let ranking = cell
            .get_or_try_init(|| self.rank(region, &merged))
            .await?;
        Ok(Arc::clone(ranking))
    }

    async fn rank(&self, region: &str, candidates: &[String]) -> Result<Ranking> {
        let live_candidates: Vec<String> = {
            let failed = self.failed.read();
            candidates
                .iter()
                .filter(|host| !failed.contains(*host))
                .cloned()
                .collect()
        };

        let probes = live_candidates
            .into_iter()
            .map(|host| probe(&self.client, host));
        let mut survivors: Vec<RankedHost> =
            join_all(probes).await.into_iter().flatten().collect();

        if survivors.is_empty() {
            return Err(Error::no_reachable_hosts(region));
        }

        survivors.sort_by_key(|ranked| ranked.latency);
        info!(
            "Ranked {} mirrors for {region}; fastest is {} ({:?})",
            survivors.len(),
            survivors[0].host,
            survivors[0].latency
        );
        Ok(Arc::new(survivors))
    }

    /// Permanently exclude a host and drop any memoized ranking that
    /// includes it, so the next resolve re-probes without it.
    pub fn mark_failed(&self, host: &str) {
        let normalized = normalize_host(host);
        debug!("Marking CDN host failed: {normalized}");
        self.failed.write().insert(normalized.clone());

        let mut cache = self.cache.lock();
        cache.retain(|_, cell| match cell.get() {
            Some(ranking) => !ranking.iter().any(|ranked| ranked.host == normalized),
            None => true,
        });
    }

    /// Whether the host has been reported failed.
    pub fn is_failed(&self, host: &str) -> bool {
        self.failed.read().contains(&normalize_host(host))
    }
}

/// Default scheme for bare manifest hostnames, trailing slashes stripped.
fn normalize_host(host: &str) -> String {
    let trimmed = host.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

async fn probe(client: &Client, host: String) -> Option<RankedHost> {
    let started = Instant::now();
    match client.get(&host).send().await {
        Ok(_) => {
            let latency = started.elapsed();
            debug!("Probed {host} in {latency:?}");
            Some(RankedHost { host, latency })
        }
        Err(e) => {
            debug!("Probe of {host} failed: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn server_with_delay(delay_ms: u64, expected_probes: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(Duration::from_millis(delay_ms)),
            )
            .expect(expected_probes)
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn normalizes_bare_hosts_to_https() {
        assert_eq!(
            normalize_host("level3.blizzard.com/"),
            "https://level3.blizzard.com"
        );
        assert_eq!(
            normalize_host("http://127.0.0.1:8080"),
            "http://127.0.0.1:8080"
        );
    }

    #[tokio::test]
    async fn ranks_hosts_by_latency() {
        let slow = server_with_delay(120, 1).await;
        let fast = server_with_delay(0, 1).await;
        let medium = server_with_delay(60, 1).await;

        let resolver = MirrorResolver::with_client(reqwest::Client::new());
        let ranking = resolver
            .resolve(
                "us",
                &[slow.uri(), fast.uri(), medium.uri()],
                &[],
            )
            .await
            .unwrap();

        let order: Vec<&str> = ranking.iter().map(|r| r.host.as_str()).collect();
        assert_eq!(order, vec![fast.uri(), medium.uri(), slow.uri()]);
    }

    #[tokio::test]
    async fn error_statuses_still_count_as_alive() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = MirrorResolver::with_client(reqwest::Client::new());
        let ranking = resolver.resolve("us", &[server.uri()], &[]).await.unwrap();
        assert_eq!(ranking.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_resolves_share_one_probe_run() {
        let server = server_with_delay(20, 1).await;
        let resolver = MirrorResolver::with_client(reqwest::Client::new());

        let hosts = vec![server.uri()];
        let (a, b) = tokio::join!(
            resolver.resolve("us", &hosts, &[]),
            resolver.resolve("us", &hosts, &[]),
        );
        assert_eq!(*a.unwrap(), *b.unwrap());

        // A later resolve reuses the memoized ranking too.
        resolver.resolve("us", &hosts, &[]).await.unwrap();
    }

    #[tokio::test]
    async fn failed_host_excluded_after_eviction() {
        let doomed = server_with_delay(0, 1).await;
        let healthy = server_with_delay(0, 2).await;

        let resolver = MirrorResolver::with_client(reqwest::Client::new());
        let hosts = vec![doomed.uri(), healthy.uri()];

        let first = resolver.resolve("us", &hosts, &[]).await.unwrap();
        assert_eq!(first.len(), 2);

        resolver.mark_failed(&doomed.uri());
        assert!(resolver.is_failed(&doomed.uri()));

        let second = resolver.resolve("us", &hosts, &[]).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].host, healthy.uri());
    }

    #[tokio::test]
    async fn merges_and_dedupes_fallbacks() {
        let primary = server_with_delay(0, 1).await;
        let fallback = server_with_delay(40, 1).await;

        let resolver = MirrorResolver::with_client(reqwest::Client::new());
        let ranking = resolver
            .resolve(
                "eu",
                &[primary.uri()],
                &[primary.uri(), fallback.uri()],
            )
            .await
            .unwrap();

        assert_eq!(ranking.len(), 2);
        assert_eq!(ranking[0].host, primary.uri());
    }

    #[tokio::test]
    async fn no_survivors_is_an_error() {
        let resolver = MirrorResolver::with_client(reqwest::Client::new());
        let result = resolver
            .resolve("us", &["http://127.0.0.1:9".to_string()], &[])
            .await;
        assert!(matches!(result, Err(Error::NoReachableHosts { .. })));
    }
}
