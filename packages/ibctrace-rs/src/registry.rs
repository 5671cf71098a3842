//! Local chain-registry store.
//!
//! The registry mirror (an external collaborator) populates a directory with
//! one `<chain>.json` per chain and `ibc/<a>-<b>.json` channel-pair bundles.
//! This loader validates and indexes those records; it never fetches.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::AuditError;
use crate::types::{ChainInfo, IbcData};

/// Filename of the registry sync timestamp.
const LAST_UPDATE_FILE: &str = ".last-update";

/// Validated, indexed view of the on-disk registry store.
///
/// Created once per process and read-only during an audit.
pub struct ChainRegistry {
    dir: PathBuf,
    chains: HashMap<String, ChainInfo>,
    /// chain_id -> chain_name index for topology resolution.
    by_chain_id: HashMap<String, String>,
    /// Channel-pair bundles keyed by sorted chain-name pair.
    pairs: HashMap<(String, String), IbcData>,
}

fn pair_key(chain_a: &str, chain_b: &str) -> (String, String) {
    let mut names = [chain_a, chain_b];
    names.sort_unstable();
    (names[0].to_string(), names[1].to_string())
}

impl ChainRegistry {
    /// Load every chain record under `dir`, skipping records that fail
    /// validation (missing name, bech32 prefix, or any queryable endpoint).
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, AuditError> {
        let dir = dir.as_ref().to_path_buf();
        let mut chains = HashMap::new();
        let mut by_chain_id = HashMap::new();

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(dir = %dir.display(), "Registry directory missing; starting empty");
                return Ok(Self {
                    dir,
                    chains,
                    by_chain_id,
                    pairs: HashMap::new(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") || !path.is_file() {
                continue;
            }

            let raw = std::fs::read_to_string(&path)?;
            let chain: ChainInfo = match serde_json::from_str(&raw) {
                Ok(chain) => chain,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Skipping unparseable chain record");
                    continue;
                }
            };

            if !chain.is_valid() {
                tracing::warn!(
                    file = %path.display(),
                    chain = %chain.chain_name,
                    "Skipping chain record without name, prefix, or endpoints"
                );
                continue;
            }

            if !chain.chain_id.is_empty() {
                by_chain_id.insert(chain.chain_id.clone(), chain.chain_name.clone());
            }
            chains.insert(chain.chain_name.clone(), chain);
        }

        let pairs = Self::load_channel_pairs(&dir);

        tracing::debug!(
            dir = %dir.display(),
            chains = chains.len(),
            pairs = pairs.len(),
            "Registry loaded"
        );
        Ok(Self {
            dir,
            chains,
            by_chain_id,
            pairs,
        })
    }

    fn load_channel_pairs(dir: &Path) -> HashMap<(String, String), IbcData> {
        let mut pairs = HashMap::new();
        let Ok(entries) = std::fs::read_dir(dir.join("ibc")) else {
            return pairs;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(raw) = std::fs::read_to_string(&path) else {
                continue;
            };
            match serde_json::from_str::<IbcData>(&raw) {
                Ok(data) => {
                    let key = pair_key(&data.chain_1.chain_name, &data.chain_2.chain_name);
                    pairs.insert(key, data);
                }
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Skipping unparseable IBC data file");
                }
            }
        }
        pairs
    }

    /// Build a registry from in-memory records (tests, synthetic setups).
    /// Invalid records are rejected exactly as on-disk ones are.
    pub fn from_chains(chains: impl IntoIterator<Item = ChainInfo>) -> Self {
        let mut map = HashMap::new();
        let mut by_chain_id = HashMap::new();
        for chain in chains {
            if !chain.is_valid() {
                continue;
            }
            if !chain.chain_id.is_empty() {
                by_chain_id.insert(chain.chain_id.clone(), chain.chain_name.clone());
            }
            map.insert(chain.chain_name.clone(), chain);
        }
        Self {
            dir: PathBuf::new(),
            chains: map,
            by_chain_id,
            pairs: HashMap::new(),
        }
    }

    /// Register a channel-pair bundle in memory (tests, synthetic setups).
    pub fn insert_channel_pair(&mut self, data: IbcData) {
        let key = pair_key(&data.chain_1.chain_name, &data.chain_2.chain_name);
        self.pairs.insert(key, data);
    }

    /// Look up a chain by registry name.
    pub fn get(&self, chain_name: &str) -> Result<&ChainInfo, AuditError> {
        self.chains
            .get(chain_name)
            .ok_or_else(|| AuditError::ChainUnknown(chain_name.to_string()))
    }

    /// Map a live chain-id (e.g. `cosmoshub-4`) to a registry chain name.
    ///
    /// Uses the index built at load time, falling back to a linear scan for
    /// records whose index entry was clobbered by a duplicate chain-id.
    pub fn chain_name_for_id(&self, chain_id: &str) -> Option<&str> {
        if let Some(name) = self.by_chain_id.get(chain_id) {
            return Some(name.as_str());
        }
        self.chains
            .values()
            .find(|c| c.chain_id == chain_id)
            .map(|c| c.chain_name.as_str())
    }

    /// All loaded chains, unordered.
    pub fn chains(&self) -> impl Iterator<Item = &ChainInfo> {
        self.chains.values()
    }

    /// Number of loaded chains.
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// The root directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // ========================================================================
    // Channel-Pair Bundles
    // ========================================================================

    /// The channel-pair bundle for two chains, if one was loaded. Lookup
    /// order does not matter; bundles are keyed by the alphabetically
    /// sorted chain-name pair (mirroring the on-disk `<a>-<b>.json` naming).
    pub fn channel_pairs(&self, chain_a: &str, chain_b: &str) -> Option<&IbcData> {
        self.pairs.get(&pair_key(chain_a, chain_b))
    }

    /// Count of loaded channel-pair bundles.
    pub fn channel_pair_count(&self) -> usize {
        self.pairs.len()
    }

    // ========================================================================
    // Sync Timestamp
    // ========================================================================

    /// When the registry mirror last synced, if recorded.
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        let raw = std::fs::read_to_string(self.dir.join(LAST_UPDATE_FILE)).ok()?;
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|t| t.with_timezone(&Utc))
            .ok()
    }

    /// Record a registry sync at `now`.
    pub fn touch_last_update(&self, now: DateTime<Utc>) -> Result<(), AuditError> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.dir.join(LAST_UPDATE_FILE), now.to_rfc3339())?;
        Ok(())
    }
}
