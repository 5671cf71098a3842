//! Core data types shared across the audit library.
//!
//! `ChainInfo` mirrors the cosmos/chain-registry `chain.json` layout and the
//! IBC data file mirrors the registry's `_IBC/<a>-<b>.json` layout, so a
//! pre-populated local mirror can be read without any translation step.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Chain Registry Records
// ============================================================================

/// Per-chain metadata loaded from the local registry store.
///
/// Immutable for the duration of an audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainInfo {
    pub chain_name: String,
    #[serde(default)]
    pub chain_id: String,
    pub bech32_prefix: String,
    #[serde(default)]
    pub staking: Option<StakingInfo>,
    #[serde(default)]
    pub fees: Option<FeeInfo>,
    #[serde(default)]
    pub apis: ApiSet,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StakingInfo {
    #[serde(default)]
    pub staking_tokens: Vec<DenomRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeeInfo {
    #[serde(default)]
    pub fee_tokens: Vec<DenomRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenomRecord {
    pub denom: String,
}

/// Transport descriptor sets, in preference order within each transport.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ApiSet {
    #[serde(default)]
    pub rpc: Vec<ApiEndpoint>,
    #[serde(default)]
    pub rest: Vec<ApiEndpoint>,
    #[serde(default)]
    pub grpc: Vec<ApiEndpoint>,
}

/// Custom Debug that summarizes endpoint lists to per-transport counts;
/// registry records can carry dozens of provider URLs and dumping them
/// makes config logging unreadable.
impl fmt::Debug for ApiSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSet")
            .field("rpc", &self.rpc.len())
            .field("rest", &self.rest.len())
            .field("grpc", &self.grpc.len())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEndpoint {
    pub address: String,
    #[serde(default)]
    pub provider: Option<String>,
}

impl ChainInfo {
    /// The chain's native staking denom, falling back to the first fee token.
    pub fn native_denom(&self) -> Option<&str> {
        self.staking
            .as_ref()
            .and_then(|s| s.staking_tokens.first())
            .or_else(|| self.fees.as_ref().and_then(|f| f.fee_tokens.first()))
            .map(|t| t.denom.as_str())
    }

    /// REST endpoint addresses in configured order.
    pub fn rest_endpoints(&self) -> Vec<&str> {
        self.apis.rest.iter().map(|e| e.address.as_str()).collect()
    }

    /// gRPC endpoint addresses in configured order.
    pub fn grpc_endpoints(&self) -> Vec<&str> {
        self.apis.grpc.iter().map(|e| e.address.as_str()).collect()
    }

    /// Tendermint RPC endpoint addresses in configured order.
    pub fn rpc_endpoints(&self) -> Vec<&str> {
        self.apis.rpc.iter().map(|e| e.address.as_str()).collect()
    }

    /// Whether the record is usable for auditing: it needs a name, a bech32
    /// prefix, and at least one queryable endpoint.
    pub fn is_valid(&self) -> bool {
        !self.chain_name.is_empty()
            && !self.bech32_prefix.is_empty()
            && (!self.apis.rest.is_empty() || !self.apis.grpc.is_empty())
    }
}

// ============================================================================
// IBC Data Files (channel pairs)
// ============================================================================

/// One side of a channel-pair record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IbcChainMeta {
    pub chain_name: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub connection_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IbcChannelSide {
    pub channel_id: String,
    pub port_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IbcChannelSpec {
    pub chain_1: IbcChannelSide,
    pub chain_2: IbcChannelSide,
    #[serde(default)]
    pub ordering: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub tags: Option<serde_json::Value>,
}

/// A chain-pair bundle as stored in `<data>/ibc/<a>-<b>.json` with the chain
/// names sorted alphabetically in the filename.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IbcData {
    pub chain_1: IbcChainMeta,
    pub chain_2: IbcChainMeta,
    pub channels: Vec<IbcChannelSpec>,
}

impl IbcData {
    /// The transfer channel on `chain_name`'s side of the first recorded
    /// pair, if the record involves that chain.
    pub fn transfer_channel_for(&self, chain_name: &str) -> Option<&IbcChannelSide> {
        let spec = self
            .channels
            .iter()
            .find(|c| c.chain_1.port_id == "transfer" || c.chain_2.port_id == "transfer")?;
        if self.chain_1.chain_name == chain_name {
            Some(&spec.chain_1)
        } else if self.chain_2.chain_name == chain_name {
            Some(&spec.chain_2)
        } else {
            None
        }
    }
}

// ============================================================================
// Wire Values
// ============================================================================

/// A native or wrapped token balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinBalance {
    pub denom: String,
    pub amount: u128,
}

/// The `(path, base_denom)` record describing how a wrapped token reached
/// its current chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenomTrace {
    /// Concatenation of `port/channel` segments separated by `/`.
    pub path: String,
    /// The base denomination at the origin chain.
    pub base_denom: String,
}

impl DenomTrace {
    /// The full string that is hashed to form the `ibc/<hash>` denom.
    pub fn full_path(&self) -> String {
        if self.path.is_empty() {
            self.base_denom.clone()
        } else {
            format!("{}/{}", self.path, self.base_denom)
        }
    }
}

/// Channel end as returned by the channel query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEnd {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub ordering: String,
    pub counterparty: ChannelCounterparty,
    #[serde(default)]
    pub connection_hops: Vec<String>,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelCounterparty {
    #[serde(default)]
    pub port_id: String,
    pub channel_id: String,
}

/// Connection end as returned by the connection query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEnd {
    pub client_id: String,
    pub counterparty: ConnectionCounterparty,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionCounterparty {
    pub client_id: String,
    #[serde(default)]
    pub connection_id: String,
}

/// The subset of a light-client state the auditor needs: which chain the
/// client tracks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientStateInfo {
    pub chain_id: String,
}

/// Node identity as returned by the tendermint node-info query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub network: String,
    #[serde(default)]
    pub moniker: String,
    #[serde(default)]
    pub app_version: String,
}

// ============================================================================
// Trace Results
// ============================================================================

/// One hop of a wrapped token's path, in traversal order from the chain
/// where the `ibc/...` denom was observed back toward its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub chain: String,
    pub port: String,
    pub channel: String,
}

impl fmt::Display for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.chain, self.port, self.channel)
    }
}

/// Why a trace stopped before reaching a base denom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceFailure {
    /// A chain was revisited during the unwrap.
    Cycle { chain: String },
    /// The hop list exceeded the configured limit.
    HopLimit { limit: usize },
    /// The denom-trace lookup itself failed.
    TraceLookup { reason: String },
    /// The trace path was not a sequence of `port/channel` pairs.
    MalformedPath { path: String },
    /// The counterparty chain could not be resolved from on-chain state.
    Topology { reason: String },
}

impl fmt::Display for TraceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceFailure::Cycle { chain } => write!(f, "cycle at {chain}"),
            TraceFailure::HopLimit { limit } => write!(f, "hop limit {limit} exceeded"),
            TraceFailure::TraceLookup { reason } => write!(f, "trace lookup failed: {reason}"),
            TraceFailure::MalformedPath { path } => write!(f, "malformed trace path: {path}"),
            TraceFailure::Topology { reason } => write!(f, "topology resolution failed: {reason}"),
        }
    }
}

/// Result of recursively unwrapping an `ibc/<hash>` denom.
///
/// `complete` is true iff the recursion terminated at a non-IBC base denom
/// with every lookup succeeding. `hops` never lists the same chain twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnwrapResult {
    pub base_denom: String,
    pub origin_chain: String,
    pub hops: Vec<Hop>,
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<TraceFailure>,
}

impl UnwrapResult {
    /// A trivially complete result for a token that is native where observed.
    pub fn native(denom: &str, chain: &str) -> Self {
        Self {
            base_denom: denom.to_string(),
            origin_chain: chain.to_string(),
            hops: Vec::new(),
            complete: true,
            failure: None,
        }
    }
}

/// The other end of a channel, discovered from on-chain state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterpartyInfo {
    pub chain_name: String,
    pub channel_id: String,
    pub connection_id: String,
    pub client_id: String,
}
