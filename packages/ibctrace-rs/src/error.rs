//! Error types for the escrow audit library.
//!
//! Per-token failures (cycles, hop limits, topology breaks) are recoverable:
//! the orchestrator records them on the token result and keeps going.
//! Whole-audit failures (unknown chain, cancellation) abort the audit.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    // ========================================================================
    // Registry Errors
    // ========================================================================
    #[error("Unknown chain: {0} (not in local registry or failed validation)")]
    ChainUnknown(String),

    #[error("Chain {0} has no staking or fee token")]
    NoNativeToken(String),

    #[error("Registry store error: {0}")]
    Store(String),

    // ========================================================================
    // Query Client Errors
    // ========================================================================
    #[error("All endpoints exhausted for {operation} after {attempts} attempts")]
    EndpointsExhausted { operation: String, attempts: u32 },

    #[error("Client error from {endpoint}: HTTP {status}")]
    ClientError { endpoint: String, status: u16 },

    #[error("Rate limited by {endpoint}")]
    RateLimited { endpoint: String },

    #[error("Failed to decode response from {endpoint}: {reason}")]
    DecodeError { endpoint: String, reason: String },

    // ========================================================================
    // Trace Errors
    // ========================================================================
    #[error("Topology resolution failed for {chain}/{channel}: {reason}")]
    TopologyResolutionFailed {
        chain: String,
        channel: String,
        reason: String,
    },

    #[error("Cycle detected during unwrap: revisited {chain}")]
    Cycle { chain: String },

    #[error("Hop limit of {limit} exceeded during unwrap")]
    HopLimit { limit: usize },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AuditError {
    /// Whether the error aborts the whole audit rather than a single token.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AuditError::ChainUnknown(_) | AuditError::NoNativeToken(_) | AuditError::Cancelled
        )
    }

    /// Whether the error leaves a trace incomplete rather than errored.
    pub fn is_trace_failure(&self) -> bool {
        matches!(
            self,
            AuditError::TopologyResolutionFailed { .. }
                | AuditError::Cycle { .. }
                | AuditError::HopLimit { .. }
        )
    }
}
