//! Escrow-conservation audit primitives for IBC fungible token transfers.
//!
//! For every token locked in a chain's transfer escrow account, the wrapped
//! representation circulating on the counterparty chain must account for the
//! same amount. This crate supplies everything the audit orchestrator needs
//! to check that invariant:
//!
//! - [`registry`]: local chain-registry store (chains, channel pairs)
//! - [`client`]: multi-endpoint query client, binary (gRPC) with text (REST)
//!   fallback, retry/backoff/rotation
//! - [`cache`]: version-gated descriptor and version caches
//! - [`topology`]: on-chain channel -> connection -> client resolution
//! - [`denom`]: ICS-20 denom hashing and escrow address derivation
//! - [`trace`]: recursive unwrap of `ibc/<hash>` denoms to their origin

pub mod cache;
pub mod client;
pub mod denom;
pub mod error;
pub mod registry;
pub mod testing;
pub mod topology;
pub mod trace;
pub mod types;

pub use cache::{MetadataCache, MetadataCacheConfig};
pub use client::{
    ChainQuerier, MultiEndpointClient, QueryClientConfig, QueryOperation, QueryResult,
    TransportPreference,
};
pub use error::AuditError;
pub use registry::ChainRegistry;
pub use trace::{DenomResolver, MAX_HOPS};
pub use types::{
    ChainInfo, CoinBalance, CounterpartyInfo, DenomTrace, Hop, TraceFailure, UnwrapResult,
};
