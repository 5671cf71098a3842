//! Descriptor and version caches.
//!
//! Two-tier storage: a bounded in-memory LRU in front of JSON files under
//! the cache directory. Schema entries (the reflection service listing an
//! endpoint exposes) are keyed by gRPC endpoint and gated on the chain's
//! application version; version probes are keyed by chain-id and aggregated
//! into a single `versions.json`.
//!
//! Concurrent reads are allowed; refreshes of the same endpoint are
//! serialized through a single-flight guard. Missing directories are
//! created on demand and unparseable files count as cache misses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::Result;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const SCHEMA_CACHE_CAPACITY: usize = 256;
const VERSION_CACHE_CAPACITY: usize = 1024;

/// Memory residency for version probes; disk remains authoritative after.
const VERSION_MEMORY_TTL: Duration = Duration::from_secs(6 * 60 * 60);

const VERSIONS_FILE: &str = "versions.json";
const DESCRIPTORS_DIR: &str = "descriptors";

// ============================================================================
// Entries
// ============================================================================

/// Cached schema metadata for one gRPC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorCacheEntry {
    pub endpoint: String,
    /// Application version the schema was fetched under.
    pub chain_app_version: String,
    pub fetched_at: DateTime<Utc>,
    /// Fully-qualified service names the endpoint reflects. Empty means the
    /// endpoint exposed no usable reflection and is text-only.
    pub services: Vec<String>,
}

/// Cached application version for one chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionProbe {
    pub chain_id: String,
    pub app_version: String,
    pub last_checked_at: DateTime<Utc>,
}

/// Outcome of a version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionVerdict {
    pub needs_update: bool,
    pub current: Option<String>,
    pub cached: Option<String>,
}

// ============================================================================
// Probe and Fetch Seams
// ============================================================================

/// Fetches the live application version from a tendermint RPC endpoint.
#[async_trait]
pub trait VersionProber: Send + Sync {
    async fn app_version(&self, rpc_endpoint: &str) -> Result<String>;
}

/// Production prober: `abci_info` over the node's RPC interface.
pub struct AbciVersionProber;

#[async_trait]
impl VersionProber for AbciVersionProber {
    async fn app_version(&self, rpc_endpoint: &str) -> Result<String> {
        use tendermint_rpc::Client;
        let client = tendermint_rpc::HttpClient::new(rpc_endpoint)?;
        let info = client.abci_info().await?;
        Ok(info.app_version.to_string())
    }
}

/// Fetches the reflection service listing from a gRPC endpoint.
#[async_trait]
pub trait SchemaFetcher: Send + Sync {
    async fn fetch_services(&self, endpoint: &str) -> Result<Vec<String>>;
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug, Clone)]
pub struct MetadataCacheConfig {
    /// Cache directory root.
    pub dir: PathBuf,
    /// Max age of a schema entry before refetch.
    pub schema_ttl: Duration,
    /// Min interval between live version probes per chain.
    pub version_check_interval: Duration,
}

impl Default for MetadataCacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/cache"),
            schema_ttl: Duration::from_millis(86_400_000),
            version_check_interval: Duration::from_millis(86_400_000),
        }
    }
}

/// Process-wide schema and version cache.
pub struct MetadataCache {
    cfg: MetadataCacheConfig,
    schemas: Mutex<LruCache<String, DescriptorCacheEntry>>,
    versions: Mutex<LruCache<String, (VersionProbe, DateTime<Utc>)>>,
    /// Per-endpoint refresh guards (single flight).
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MetadataCache {
    pub fn new(cfg: MetadataCacheConfig) -> Self {
        Self {
            cfg,
            schemas: Mutex::new(LruCache::new(
                NonZeroUsize::new(SCHEMA_CACHE_CAPACITY).expect("capacity must be > 0"),
            )),
            versions: Mutex::new(LruCache::new(
                NonZeroUsize::new(VERSION_CACHE_CAPACITY).expect("capacity must be > 0"),
            )),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    // ========================================================================
    // Version Cache
    // ========================================================================

    /// Decide whether an endpoint's schema needs refetching because the
    /// chain upgraded.
    ///
    /// Within the check interval the cached verdict stands. Outside it the
    /// live version is probed: a missing cache is pessimistically stale, a
    /// changed version is stale, and a failed probe falls back to the cached
    /// version when one exists.
    pub async fn check_needs_update(
        &self,
        chain_id: &str,
        rpc_endpoint: &str,
        prober: &dyn VersionProber,
    ) -> VersionVerdict {
        let cached = self.version(chain_id).await;

        if let Some(probe) = &cached {
            let age = Utc::now().signed_duration_since(probe.last_checked_at);
            if age.to_std().map_or(false, |age| age < self.cfg.version_check_interval) {
                return VersionVerdict {
                    needs_update: false,
                    current: None,
                    cached: Some(probe.app_version.clone()),
                };
            }
        }

        match prober.app_version(rpc_endpoint).await {
            Ok(live) => {
                let verdict = match &cached {
                    None => VersionVerdict {
                        needs_update: true,
                        current: Some(live.clone()),
                        cached: None,
                    },
                    Some(probe) if probe.app_version != live => VersionVerdict {
                        needs_update: true,
                        current: Some(live.clone()),
                        cached: Some(probe.app_version.clone()),
                    },
                    Some(probe) => VersionVerdict {
                        needs_update: false,
                        current: Some(live.clone()),
                        cached: Some(probe.app_version.clone()),
                    },
                };
                self.store_version(VersionProbe {
                    chain_id: chain_id.to_string(),
                    app_version: live,
                    last_checked_at: Utc::now(),
                })
                .await;
                verdict
            }
            Err(e) => {
                tracing::warn!(chain_id, rpc_endpoint, error = %e, "Version probe failed");
                match cached {
                    // No cache: refetch pessimistically.
                    None => VersionVerdict {
                        needs_update: true,
                        current: None,
                        cached: None,
                    },
                    // Cache present: keep using the stale schema.
                    Some(probe) => VersionVerdict {
                        needs_update: false,
                        current: None,
                        cached: Some(probe.app_version),
                    },
                }
            }
        }
    }

    /// The cached version probe for a chain, memory first then disk.
    pub async fn version(&self, chain_id: &str) -> Option<VersionProbe> {
        {
            let mut versions = self.versions.lock().await;
            if let Some((probe, inserted_at)) = versions.get(chain_id) {
                let resident = Utc::now().signed_duration_since(*inserted_at);
                if resident.to_std().map_or(false, |age| age < VERSION_MEMORY_TTL) {
                    return Some(probe.clone());
                }
                versions.pop(chain_id);
            }
        }

        let all = self.load_versions_file().await;
        let probe = all.get(chain_id).cloned()?;
        self.versions
            .lock()
            .await
            .put(chain_id.to_string(), (probe.clone(), Utc::now()));
        Some(probe)
    }

    async fn store_version(&self, probe: VersionProbe) {
        self.versions
            .lock()
            .await
            .put(probe.chain_id.clone(), (probe.clone(), Utc::now()));

        let mut all = self.load_versions_file().await;
        all.insert(probe.chain_id.clone(), probe);
        if let Err(e) = self.write_versions_file(&all).await {
            tracing::warn!(error = %e, "Failed to persist version cache");
        }
    }

    async fn load_versions_file(&self) -> HashMap<String, VersionProbe> {
        let path = self.cfg.dir.join(VERSIONS_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(file = %path.display(), error = %e, "Version cache unparseable, treating as empty");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        }
    }

    async fn write_versions_file(&self, all: &HashMap<String, VersionProbe>) -> Result<()> {
        tokio::fs::create_dir_all(&self.cfg.dir).await?;
        let path = self.cfg.dir.join(VERSIONS_FILE);
        tokio::fs::write(&path, serde_json::to_vec_pretty(all)?).await?;
        Ok(())
    }

    // ========================================================================
    // Schema Cache
    // ========================================================================

    /// The service listing for a gRPC endpoint, fetching through `fetcher`
    /// when absent or stale. Version-gated: when the chain's application
    /// version changed since the schema was cached, the entry is discarded
    /// and refetched.
    ///
    /// Returns `None` when no listing could be obtained right now.
    pub async fn schema_services(
        &self,
        chain_id: &str,
        endpoint: &str,
        rpc_endpoint: Option<&str>,
        fetcher: &dyn SchemaFetcher,
    ) -> Option<Vec<String>> {
        self.schema_services_with(chain_id, endpoint, rpc_endpoint, fetcher, &AbciVersionProber)
            .await
    }

    /// As [`Self::schema_services`] with an injectable version prober.
    pub async fn schema_services_with(
        &self,
        chain_id: &str,
        endpoint: &str,
        rpc_endpoint: Option<&str>,
        fetcher: &dyn SchemaFetcher,
        prober: &dyn VersionProber,
    ) -> Option<Vec<String>> {
        let mut current_version = None;
        if let Some(rpc) = rpc_endpoint {
            let verdict = self.check_needs_update(chain_id, rpc, prober).await;
            current_version = verdict.current.or(verdict.cached);
            if verdict.needs_update {
                tracing::info!(
                    chain_id,
                    endpoint,
                    "Application version changed, invalidating schema"
                );
                self.invalidate_schema(endpoint).await;
            }
        }

        if let Some(entry) = self.fresh_schema(endpoint).await {
            return Some(entry.services);
        }

        // Single flight: only one task refreshes a given endpoint.
        let guard = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(endpoint.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _held = guard.lock().await;

        // A concurrent refresh may have landed while we waited.
        if let Some(entry) = self.fresh_schema(endpoint).await {
            return Some(entry.services);
        }

        match fetcher.fetch_services(endpoint).await {
            Ok(services) => {
                let entry = DescriptorCacheEntry {
                    endpoint: endpoint.to_string(),
                    chain_app_version: current_version.unwrap_or_default(),
                    fetched_at: Utc::now(),
                    services: services.clone(),
                };
                self.store_schema(entry).await;
                Some(services)
            }
            Err(e) => {
                tracing::debug!(endpoint, error = %e, "Reflection fetch failed; endpoint treated as text-only");
                // Negative-cache an empty listing so a dead reflection
                // service is not re-probed on every query.
                self.store_schema(DescriptorCacheEntry {
                    endpoint: endpoint.to_string(),
                    chain_app_version: current_version.unwrap_or_default(),
                    fetched_at: Utc::now(),
                    services: Vec::new(),
                })
                .await;
                None
            }
        }
    }

    /// A schema entry younger than the TTL, memory first then disk.
    async fn fresh_schema(&self, endpoint: &str) -> Option<DescriptorCacheEntry> {
        let check_fresh = |entry: &DescriptorCacheEntry| {
            Utc::now()
                .signed_duration_since(entry.fetched_at)
                .to_std()
                .map_or(false, |age| age < self.cfg.schema_ttl)
        };

        {
            let mut schemas = self.schemas.lock().await;
            if let Some(entry) = schemas.get(endpoint) {
                if check_fresh(entry) {
                    return Some(entry.clone());
                }
                schemas.pop(endpoint);
            }
        }

        let path = self.descriptor_path(endpoint);
        let raw = tokio::fs::read_to_string(&path).await.ok()?;
        let entry: DescriptorCacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Descriptor cache unparseable, treating as miss");
                return None;
            }
        };
        if !check_fresh(&entry) {
            return None;
        }
        self.schemas
            .lock()
            .await
            .put(endpoint.to_string(), entry.clone());
        Some(entry)
    }

    async fn store_schema(&self, entry: DescriptorCacheEntry) {
        self.schemas
            .lock()
            .await
            .put(entry.endpoint.clone(), entry.clone());

        let path = self.descriptor_path(&entry.endpoint);
        let write = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, serde_json::to_vec_pretty(&entry)?).await?;
            Ok::<_, eyre::Report>(())
        };
        if let Err(e) = write.await {
            tracing::warn!(file = %path.display(), error = %e, "Failed to persist descriptor cache");
        }
    }

    /// Drop an endpoint's schema from both tiers.
    pub async fn invalidate_schema(&self, endpoint: &str) {
        self.schemas.lock().await.pop(endpoint);
        let _ = tokio::fs::remove_file(self.descriptor_path(endpoint)).await;
    }

    fn descriptor_path(&self, endpoint: &str) -> PathBuf {
        self.cfg
            .dir
            .join(DESCRIPTORS_DIR)
            .join(format!("{}.json", endpoint_slug(endpoint)))
    }

    /// All persisted version probes (for the status surface).
    pub async fn all_versions(&self) -> HashMap<String, VersionProbe> {
        self.load_versions_file().await
    }
}

/// Filesystem-safe slug for an endpoint URL.
fn endpoint_slug(endpoint: &str) -> String {
    endpoint
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct FixedProber {
        version: Option<String>,
        calls: AtomicU32,
    }

    impl FixedProber {
        fn returning(version: &str) -> Self {
            Self {
                version: Some(version.to_string()),
                calls: AtomicU32::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                version: None,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl VersionProber for FixedProber {
        async fn app_version(&self, _rpc_endpoint: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.version
                .clone()
                .ok_or_else(|| eyre::eyre!("probe down"))
        }
    }

    struct CountingFetcher {
        services: Vec<String>,
        calls: AtomicU32,
        fail: bool,
    }

    impl CountingFetcher {
        fn new(services: &[&str]) -> Self {
            Self {
                services: services.iter().map(|s| s.to_string()).collect(),
                calls: AtomicU32::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                services: vec![],
                calls: AtomicU32::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl SchemaFetcher for CountingFetcher {
        async fn fetch_services(&self, _endpoint: &str) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                Err(eyre::eyre!("no reflection"))
            } else {
                Ok(self.services.clone())
            }
        }
    }

    fn cache_in(dir: &TempDir) -> MetadataCache {
        MetadataCache::new(MetadataCacheConfig {
            dir: dir.path().to_path_buf(),
            schema_ttl: Duration::from_secs(3600),
            version_check_interval: Duration::from_secs(3600),
        })
    }

    #[tokio::test]
    async fn test_first_check_needs_update() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        let prober = FixedProber::returning("8");

        let verdict = cache.check_needs_update("cosmoshub-4", "https://rpc", &prober).await;
        assert!(verdict.needs_update);
        assert_eq!(verdict.current.as_deref(), Some("8"));
        assert_eq!(verdict.cached, None);
    }

    #[tokio::test]
    async fn test_version_change_detected() {
        let tmp = TempDir::new().unwrap();

        {
            let cache = cache_in(&tmp);
            let prober = FixedProber::returning("1");
            cache.check_needs_update("cosmoshub-4", "https://rpc", &prober).await;
        }

        // Fresh cache instance with an expired interval: force a re-probe by
        // backdating the persisted probe.
        let path = tmp.path().join(VERSIONS_FILE);
        let raw = std::fs::read_to_string(&path).unwrap();
        let mut all: HashMap<String, VersionProbe> = serde_json::from_str(&raw).unwrap();
        all.get_mut("cosmoshub-4").unwrap().last_checked_at =
            Utc::now() - chrono::Duration::hours(48);
        std::fs::write(&path, serde_json::to_vec(&all).unwrap()).unwrap();

        let cache = cache_in(&tmp);
        let prober = FixedProber::returning("2");
        let verdict = cache.check_needs_update("cosmoshub-4", "https://rpc", &prober).await;
        assert!(verdict.needs_update);
        assert_eq!(verdict.current.as_deref(), Some("2"));
        assert_eq!(verdict.cached.as_deref(), Some("1"));

        // The new version is now stored.
        let probe = cache.version("cosmoshub-4").await.unwrap();
        assert_eq!(probe.app_version, "2");
    }

    #[tokio::test]
    async fn test_interval_gate_skips_probe() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        let prober = FixedProber::returning("5");

        cache.check_needs_update("osmosis-1", "https://rpc", &prober).await;
        let verdict = cache.check_needs_update("osmosis-1", "https://rpc", &prober).await;
        assert!(!verdict.needs_update);
        assert_eq!(verdict.cached.as_deref(), Some("5"));
        // Only the first check hit the network.
        assert_eq!(prober.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_probe_failure_without_cache_is_pessimistic() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        let prober = FixedProber::failing();

        let verdict = cache.check_needs_update("juno-1", "https://rpc", &prober).await;
        assert!(verdict.needs_update);
        assert_eq!(verdict.current, None);
    }

    #[tokio::test]
    async fn test_probe_failure_with_cache_uses_stale() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        cache
            .store_version(VersionProbe {
                chain_id: "juno-1".to_string(),
                app_version: "3".to_string(),
                last_checked_at: Utc::now() - chrono::Duration::hours(48),
            })
            .await;

        let prober = FixedProber::failing();
        let verdict = cache.check_needs_update("juno-1", "https://rpc", &prober).await;
        assert!(!verdict.needs_update);
        assert_eq!(verdict.cached.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_schema_fetched_once_while_version_stable() {
        // Stable version + populated schema cache => no refetch.
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        let fetcher = CountingFetcher::new(&["cosmos.bank.v1beta1.Query"]);
        let prober = FixedProber::returning("8");

        for _ in 0..3 {
            let services = cache
                .schema_services_with("cosmoshub-4", "grpc.example.com:9090", Some("https://rpc"), &fetcher, &prober)
                .await
                .unwrap();
            assert_eq!(services, vec!["cosmos.bank.v1beta1.Query"]);
        }
        assert_eq!(fetcher.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_schema_survives_cache_restart_via_disk() {
        let tmp = TempDir::new().unwrap();
        let fetcher = CountingFetcher::new(&["ibc.core.channel.v1.Query"]);
        let prober = FixedProber::returning("8");

        {
            let cache = cache_in(&tmp);
            cache
                .schema_services_with("cosmoshub-4", "grpc.example.com:9090", Some("https://rpc"), &fetcher, &prober)
                .await
                .unwrap();
        }

        let cache = cache_in(&tmp);
        let services = cache
            .schema_services_with("cosmoshub-4", "grpc.example.com:9090", Some("https://rpc"), &fetcher, &prober)
            .await
            .unwrap();
        assert_eq!(services, vec!["ibc.core.channel.v1.Query"]);
        // Disk tier satisfied the second instance.
        assert_eq!(fetcher.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_reflection_failure_negative_cached() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        let fetcher = CountingFetcher::failing();
        let prober = FixedProber::returning("8");

        let out = cache
            .schema_services_with("cosmoshub-4", "grpc.example.com:9090", Some("https://rpc"), &fetcher, &prober)
            .await;
        assert!(out.is_none());

        // The empty listing is cached: the dead endpoint is not re-probed.
        let out = cache
            .schema_services_with("cosmoshub-4", "grpc.example.com:9090", Some("https://rpc"), &fetcher, &prober)
            .await;
        assert_eq!(out, Some(vec![]));
        assert_eq!(fetcher.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_unparseable_descriptor_is_miss() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join(DESCRIPTORS_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("grpc-example-com-9090.json"), "{ nope").unwrap();

        let cache = cache_in(&tmp);
        let fetcher = CountingFetcher::new(&["cosmos.bank.v1beta1.Query"]);
        let prober = FixedProber::returning("8");
        let services = cache
            .schema_services_with("cosmoshub-4", "grpc.example.com:9090", Some("https://rpc"), &fetcher, &prober)
            .await
            .unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(fetcher.calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_endpoint_slug() {
        assert_eq!(endpoint_slug("grpc.example.com:9090"), "grpc-example-com-9090");
        assert_eq!(endpoint_slug("https://lcd.osmosis.zone/"), "https---lcd-osmosis-zone");
    }
}
