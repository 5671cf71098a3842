//! Auditor configuration.
//!
//! Loaded from environment variables (with an optional `.env` file) and
//! validated before use. CLI flags override individual fields after load.

use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ibctrace_rs::client::TransportPreference;
use ibctrace_rs::{MetadataCacheConfig, QueryClientConfig};

use crate::orchestrator::AuditMode;

/// Main configuration for the auditor.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub audit: AuditConfig,
    pub cache: CacheConfig,
    /// Root of the registry data store.
    pub data_dir: PathBuf,
    /// Host fragments whose REST responses are passed through verbatim.
    pub family_hosts: Vec<String>,
}

/// Query client tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Audit behavior.
#[derive(Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_mode")]
    pub default_mode: String,
    #[serde(default = "default_escrow_port")]
    pub escrow_port: String,
    #[serde(default = "default_use_binary_transport")]
    pub use_binary_transport: bool,
}

/// Summarized Debug: mode and port matter, the transport bool is noise in
/// most logs but kept for parity with the config surface.
impl fmt::Debug for AuditConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditConfig")
            .field("default_mode", &self.default_mode)
            .field("escrow_port", &self.escrow_port)
            .field("use_binary_transport", &self.use_binary_transport)
            .finish()
    }
}

/// Cache tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_version_check_interval_ms")]
    pub version_check_interval_ms: u64,
    #[serde(default = "default_schema_ttl_ms")]
    pub schema_ttl_ms: u64,
    /// Cache root; defaults to `<data>/cache`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_retries() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    250
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_mode() -> String {
    "quick".to_string()
}

fn default_escrow_port() -> String {
    "transfer".to_string()
}

fn default_use_binary_transport() -> bool {
    true
}

fn default_version_check_interval_ms() -> u64 {
    86_400_000
}

fn default_schema_ttl_ms() -> u64 {
    86_400_000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Config {
    /// Load configuration: `.env` if present, then the environment.
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env").or_else(|_| Self::load_from_env())
    }

    /// Load from a specific .env file path, then the environment.
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    fn load_from_env() -> Result<Self> {
        let api = ApiConfig {
            retries: env_parsed("API_RETRIES").unwrap_or_else(default_retries),
            delay_ms: env_parsed("API_DELAY_MS").unwrap_or_else(default_delay_ms),
            timeout_ms: env_parsed("API_TIMEOUT_MS").unwrap_or_else(default_timeout_ms),
        };

        let audit = AuditConfig {
            default_mode: env::var("AUDIT_DEFAULT_MODE").unwrap_or_else(|_| default_mode()),
            escrow_port: env::var("AUDIT_ESCROW_PORT").unwrap_or_else(|_| default_escrow_port()),
            use_binary_transport: env_parsed("AUDIT_USE_BINARY_TRANSPORT")
                .unwrap_or_else(default_use_binary_transport),
        };

        let cache = CacheConfig {
            version_check_interval_ms: env_parsed("CACHE_VERSION_CHECK_INTERVAL_MS")
                .unwrap_or_else(default_version_check_interval_ms),
            schema_ttl_ms: env_parsed("CACHE_SCHEMA_TTL_MS").unwrap_or_else(default_schema_ttl_ms),
            dir: env::var("CACHE_DIR").ok().map(PathBuf::from),
        };

        let data_dir = env::var("AUDITOR_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let family_hosts = env::var("SEI_FAMILY_HOSTS")
            .unwrap_or_else(|_| "sei".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let config = Config {
            api,
            audit,
            cache,
            data_dir,
            family_hosts,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.api.retries == 0 {
            return Err(eyre!("api.retries must be at least 1"));
        }
        if self.api.timeout_ms == 0 {
            return Err(eyre!("api.timeout_ms must be positive"));
        }
        if self.audit.escrow_port.is_empty() {
            return Err(eyre!("audit.escrow_port cannot be empty"));
        }
        self.audit
            .default_mode
            .parse::<AuditMode>()
            .map_err(|e| eyre!("audit.default_mode: {}", e))?;
        if self.cache.version_check_interval_ms == 0 {
            return Err(eyre!("cache.version_check_interval_ms must be positive"));
        }
        Ok(())
    }

    /// Cache directory, defaulting under the data root.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache
            .dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("cache"))
    }

    /// The default audit mode (validated at load).
    pub fn default_mode(&self) -> AuditMode {
        self.audit
            .default_mode
            .parse()
            .unwrap_or(AuditMode::Quick)
    }

    /// Query client configuration derived from this config.
    pub fn query_client_config(&self, transport: Option<TransportPreference>) -> QueryClientConfig {
        let preference = transport.unwrap_or(if self.audit.use_binary_transport {
            TransportPreference::Auto
        } else {
            TransportPreference::Text
        });
        QueryClientConfig {
            retries: self.api.retries,
            base_delay: Duration::from_millis(self.api.delay_ms),
            timeout: Duration::from_millis(self.api.timeout_ms),
            transport: preference,
            family_hosts: self.family_hosts.clone(),
        }
    }

    /// Metadata cache configuration derived from this config.
    pub fn metadata_cache_config(&self) -> MetadataCacheConfig {
        MetadataCacheConfig {
            dir: self.cache_dir(),
            schema_ttl: Duration::from_millis(self.cache.schema_ttl_ms),
            version_check_interval: Duration::from_millis(self.cache.version_check_interval_ms),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            api: ApiConfig {
                retries: default_retries(),
                delay_ms: default_delay_ms(),
                timeout_ms: default_timeout_ms(),
            },
            audit: AuditConfig {
                default_mode: default_mode(),
                escrow_port: default_escrow_port(),
                use_binary_transport: default_use_binary_transport(),
            },
            cache: CacheConfig {
                version_check_interval_ms: default_version_check_interval_ms(),
                schema_ttl_ms: default_schema_ttl_ms(),
                dir: None,
            },
            data_dir: default_data_dir(),
            family_hosts: vec!["sei".to_string()],
        }
    }

    #[test]
    fn test_defaults() {
        assert_eq!(default_retries(), 3);
        assert_eq!(default_delay_ms(), 250);
        assert_eq!(default_timeout_ms(), 30_000);
        assert_eq!(default_escrow_port(), "transfer");
        assert_eq!(default_version_check_interval_ms(), 86_400_000);
        assert!(default_use_binary_transport());
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_zero_retries_rejected() {
        let mut config = base_config();
        config.api.retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let mut config = base_config();
        config.audit.default_mode = "exhaustive".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_escrow_port_rejected() {
        let mut config = base_config();
        config.audit.escrow_port.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_dir_defaults_under_data() {
        let config = base_config();
        assert_eq!(config.cache_dir(), PathBuf::from("data/cache"));

        let mut config = base_config();
        config.cache.dir = Some(PathBuf::from("/var/cache/auditor"));
        assert_eq!(config.cache_dir(), PathBuf::from("/var/cache/auditor"));
    }

    #[test]
    fn test_text_only_transport_from_config() {
        let mut config = base_config();
        config.audit.use_binary_transport = false;
        let client_cfg = config.query_client_config(None);
        assert_eq!(client_cfg.transport, TransportPreference::Text);

        // Explicit CLI choice wins over the config default.
        let client_cfg = config.query_client_config(Some(TransportPreference::Binary));
        assert_eq!(client_cfg.transport, TransportPreference::Binary);
    }
}
