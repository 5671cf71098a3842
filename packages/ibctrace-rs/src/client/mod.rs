//! Multi-endpoint query client.
//!
//! One logical operation fans out over a chain's configured endpoints:
//! every gRPC endpoint is tried in order (binary transport, preferred),
//! then every REST endpoint (text transport, fallback). Per endpoint the
//! client retries with exponential backoff; HTTP 501/502 rotate to the next
//! endpoint immediately, 4xx other than 429 fail the whole operation fast.
//!
//! Defines the [`ChainQuerier`] trait so resolvers and the orchestrator can
//! be driven by a mock in tests.

mod grpc;
mod rest;

pub use grpc::GrpcTransport;
pub use rest::RestTransport;

use async_trait::async_trait;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::cache::MetadataCache;
use crate::error::AuditError;
use crate::types::{
    ChainInfo, ChannelEnd, ClientStateInfo, CoinBalance, ConnectionEnd, DenomTrace, NodeInfo,
};

// ============================================================================
// Operations
// ============================================================================

/// The closed set of query operations the auditor issues.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryOperation {
    BankBalance { address: String, denom: String },
    BankAllBalances { address: String },
    BankSupplyByDenom { denom: String },
    IbcChannel { port_id: String, channel_id: String },
    IbcConnection { connection_id: String },
    IbcClientState { client_id: String },
    IbcDenomTrace { hash: String },
    TendermintNodeInfo,
    IbcEscrowAddress { port_id: String, channel_id: String },
}

impl QueryOperation {
    /// Logical operation name, used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            QueryOperation::BankBalance { .. } => "BankBalance",
            QueryOperation::BankAllBalances { .. } => "BankAllBalances",
            QueryOperation::BankSupplyByDenom { .. } => "BankSupplyByDenom",
            QueryOperation::IbcChannel { .. } => "IbcChannel",
            QueryOperation::IbcConnection { .. } => "IbcConnection",
            QueryOperation::IbcClientState { .. } => "IbcClientState",
            QueryOperation::IbcDenomTrace { .. } => "IbcDenomTrace",
            QueryOperation::TendermintNodeInfo => "TendermintNodeInfo",
            QueryOperation::IbcEscrowAddress { .. } => "IbcEscrowAddress",
        }
    }

    /// Fully-qualified gRPC service that serves this operation.
    pub fn grpc_service(&self) -> &'static str {
        match self {
            QueryOperation::BankBalance { .. }
            | QueryOperation::BankAllBalances { .. }
            | QueryOperation::BankSupplyByDenom { .. } => "cosmos.bank.v1beta1.Query",
            QueryOperation::IbcChannel { .. } => "ibc.core.channel.v1.Query",
            QueryOperation::IbcConnection { .. } => "ibc.core.connection.v1.Query",
            QueryOperation::IbcClientState { .. } => "ibc.core.client.v1.Query",
            QueryOperation::IbcDenomTrace { .. } | QueryOperation::IbcEscrowAddress { .. } => {
                "ibc.applications.transfer.v1.Query"
            }
            QueryOperation::TendermintNodeInfo => "cosmos.base.tendermint.v1beta1.Service",
        }
    }
}

/// Typed result of a query operation.
#[derive(Debug, Clone)]
pub enum QueryResult {
    Balance(CoinBalance),
    AllBalances(Vec<CoinBalance>),
    Supply(CoinBalance),
    Channel(ChannelEnd),
    Connection(ConnectionEnd),
    ClientState(ClientStateInfo),
    DenomTrace(DenomTrace),
    NodeInfo(NodeInfo),
    EscrowAddress(String),
}

fn unexpected_result(op: &QueryOperation, got: &QueryResult) -> AuditError {
    AuditError::DecodeError {
        endpoint: "<client>".to_string(),
        reason: format!("{} returned mismatched result variant {:?}", op.name(), got),
    }
}

// ============================================================================
// Querier Trait
// ============================================================================

/// Uniform query interface over a chain's endpoints.
///
/// Implementations handle endpoint selection, retries, and transport
/// fallback internally. The typed helpers below are thin wrappers over
/// [`ChainQuerier::query`]; mocks only need to implement `query`.
#[async_trait]
pub trait ChainQuerier: Send + Sync {
    async fn query(
        &self,
        chain: &ChainInfo,
        op: QueryOperation,
    ) -> Result<QueryResult, AuditError>;

    async fn bank_balance(
        &self,
        chain: &ChainInfo,
        address: &str,
        denom: &str,
    ) -> Result<CoinBalance, AuditError> {
        let op = QueryOperation::BankBalance {
            address: address.to_string(),
            denom: denom.to_string(),
        };
        match self.query(chain, op.clone()).await? {
            QueryResult::Balance(b) => Ok(b),
            other => Err(unexpected_result(&op, &other)),
        }
    }

    async fn bank_all_balances(
        &self,
        chain: &ChainInfo,
        address: &str,
    ) -> Result<Vec<CoinBalance>, AuditError> {
        let op = QueryOperation::BankAllBalances {
            address: address.to_string(),
        };
        match self.query(chain, op.clone()).await? {
            QueryResult::AllBalances(b) => Ok(b),
            other => Err(unexpected_result(&op, &other)),
        }
    }

    async fn bank_supply_of(
        &self,
        chain: &ChainInfo,
        denom: &str,
    ) -> Result<CoinBalance, AuditError> {
        let op = QueryOperation::BankSupplyByDenom {
            denom: denom.to_string(),
        };
        match self.query(chain, op.clone()).await? {
            QueryResult::Supply(s) => Ok(s),
            other => Err(unexpected_result(&op, &other)),
        }
    }

    async fn ibc_channel(
        &self,
        chain: &ChainInfo,
        port_id: &str,
        channel_id: &str,
    ) -> Result<ChannelEnd, AuditError> {
        let op = QueryOperation::IbcChannel {
            port_id: port_id.to_string(),
            channel_id: channel_id.to_string(),
        };
        match self.query(chain, op.clone()).await? {
            QueryResult::Channel(c) => Ok(c),
            other => Err(unexpected_result(&op, &other)),
        }
    }

    async fn ibc_connection(
        &self,
        chain: &ChainInfo,
        connection_id: &str,
    ) -> Result<ConnectionEnd, AuditError> {
        let op = QueryOperation::IbcConnection {
            connection_id: connection_id.to_string(),
        };
        match self.query(chain, op.clone()).await? {
            QueryResult::Connection(c) => Ok(c),
            other => Err(unexpected_result(&op, &other)),
        }
    }

    async fn ibc_client_state(
        &self,
        chain: &ChainInfo,
        client_id: &str,
    ) -> Result<ClientStateInfo, AuditError> {
        let op = QueryOperation::IbcClientState {
            client_id: client_id.to_string(),
        };
        match self.query(chain, op.clone()).await? {
            QueryResult::ClientState(s) => Ok(s),
            other => Err(unexpected_result(&op, &other)),
        }
    }

    async fn ibc_denom_trace(
        &self,
        chain: &ChainInfo,
        hash: &str,
    ) -> Result<DenomTrace, AuditError> {
        let op = QueryOperation::IbcDenomTrace {
            hash: hash.to_string(),
        };
        match self.query(chain, op.clone()).await? {
            QueryResult::DenomTrace(t) => Ok(t),
            other => Err(unexpected_result(&op, &other)),
        }
    }

    async fn node_info(&self, chain: &ChainInfo) -> Result<NodeInfo, AuditError> {
        let op = QueryOperation::TendermintNodeInfo;
        match self.query(chain, op.clone()).await? {
            QueryResult::NodeInfo(n) => Ok(n),
            other => Err(unexpected_result(&op, &other)),
        }
    }

    async fn ibc_escrow_address(
        &self,
        chain: &ChainInfo,
        port_id: &str,
        channel_id: &str,
    ) -> Result<String, AuditError> {
        let op = QueryOperation::IbcEscrowAddress {
            port_id: port_id.to_string(),
            channel_id: channel_id.to_string(),
        };
        match self.query(chain, op.clone()).await? {
            QueryResult::EscrowAddress(a) => Ok(a),
            other => Err(unexpected_result(&op, &other)),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Which transport passes a query may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportPreference {
    /// Binary first, text fallback.
    #[default]
    Auto,
    /// Binary only.
    Binary,
    /// Text only.
    Text,
}

impl FromStr for TransportPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(TransportPreference::Auto),
            "binary" => Ok(TransportPreference::Binary),
            "text" => Ok(TransportPreference::Text),
            other => Err(format!("unknown transport {other:?} (auto|binary|text)")),
        }
    }
}

/// Tunables for the query client.
#[derive(Debug, Clone)]
pub struct QueryClientConfig {
    /// Max attempts per endpoint.
    pub retries: u32,
    /// Base backoff between attempts; doubles per attempt.
    pub base_delay: Duration,
    /// Per-attempt deadline.
    pub timeout: Duration,
    pub transport: TransportPreference,
    /// Host fragments whose responses are passed through verbatim
    /// (no legacy `result` envelope unwrapping).
    pub family_hosts: Vec<String>,
}

impl Default for QueryClientConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(250),
            timeout: Duration::from_secs(30),
            transport: TransportPreference::Auto,
            family_hosts: vec!["sei".to_string()],
        }
    }
}

// ============================================================================
// Attempt Classification
// ============================================================================

/// What a failed attempt means for the rotation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureClass {
    /// 4xx other than 429: abort the whole operation.
    FailFast,
    /// 501/502 or unimplemented service: next endpoint, no retry here.
    RotateEndpoint,
    /// 429/503/network/decode: backoff and retry this endpoint.
    Retryable,
}

/// A single failed transport attempt.
#[derive(Debug)]
pub(crate) struct AttemptError {
    pub class: FailureClass,
    pub reason: String,
    pub status: Option<u16>,
}

impl AttemptError {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Retryable,
            reason: reason.into(),
            status: None,
        }
    }

    pub fn rotate(reason: impl Into<String>) -> Self {
        Self {
            class: FailureClass::RotateEndpoint,
            reason: reason.into(),
            status: None,
        }
    }

    pub fn fail_fast(status: u16, reason: impl Into<String>) -> Self {
        Self {
            class: FailureClass::FailFast,
            reason: reason.into(),
            status: Some(status),
        }
    }

    /// Map an HTTP status to a failure class per the retry policy.
    pub fn from_http_status(status: u16, body: String) -> Self {
        match status {
            501 | 502 => Self {
                class: FailureClass::RotateEndpoint,
                reason: body,
                status: Some(status),
            },
            429 | 503 => Self {
                class: FailureClass::Retryable,
                reason: body,
                status: Some(status),
            },
            s if (400..500).contains(&s) => Self {
                class: FailureClass::FailFast,
                reason: body,
                status: Some(status),
            },
            s => Self {
                class: FailureClass::Retryable,
                reason: body,
                status: Some(s),
            },
        }
    }
}

/// One transport's attempt surface. The rotation engine is generic over
/// this so the retry policy can be tested without sockets.
#[async_trait]
pub(crate) trait AttemptTransport: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn attempt(
        &self,
        endpoint: &str,
        op: &QueryOperation,
        timeout: Duration,
    ) -> Result<QueryResult, AttemptError>;
}

// ============================================================================
// Rotation Engine
// ============================================================================

/// Run one transport pass over an ordered endpoint list.
///
/// Returns `Ok(Some(result))` on success, `Ok(None)` when every endpoint is
/// exhausted (the caller moves to the fallback transport), and `Err` for
/// fail-fast client errors or cancellation.
pub(crate) async fn run_endpoint_pass(
    transport: &dyn AttemptTransport,
    endpoints: &[String],
    op: &QueryOperation,
    cfg: &QueryClientConfig,
    cancel: &CancellationToken,
    attempts: &AtomicU32,
) -> Result<Option<QueryResult>, AuditError> {
    for endpoint in endpoints {
        for attempt in 1..=cfg.retries {
            if cancel.is_cancelled() {
                return Err(AuditError::Cancelled);
            }
            attempts.fetch_add(1, Ordering::Relaxed);

            let outcome = tokio::select! {
                outcome = transport.attempt(endpoint, op, cfg.timeout) => outcome,
                _ = cancel.cancelled() => return Err(AuditError::Cancelled),
            };

            let err = match outcome {
                Ok(result) => {
                    tracing::debug!(
                        transport = transport.kind(),
                        endpoint = %endpoint,
                        operation = op.name(),
                        attempt,
                        "Query succeeded"
                    );
                    return Ok(Some(result));
                }
                Err(err) => err,
            };

            match err.class {
                FailureClass::FailFast => {
                    tracing::warn!(
                        transport = transport.kind(),
                        endpoint = %endpoint,
                        operation = op.name(),
                        status = err.status,
                        reason = %err.reason,
                        "Client error, not retrying"
                    );
                    return Err(AuditError::ClientError {
                        endpoint: endpoint.clone(),
                        status: err.status.unwrap_or(400),
                    });
                }
                FailureClass::RotateEndpoint => {
                    tracing::debug!(
                        transport = transport.kind(),
                        endpoint = %endpoint,
                        operation = op.name(),
                        status = err.status,
                        reason = %err.reason,
                        "Endpoint cannot serve operation, rotating"
                    );
                    break;
                }
                FailureClass::Retryable => {
                    tracing::debug!(
                        transport = transport.kind(),
                        endpoint = %endpoint,
                        operation = op.name(),
                        attempt,
                        max = cfg.retries,
                        reason = %err.reason,
                        "Attempt failed"
                    );
                    if attempt < cfg.retries {
                        let backoff = cfg.base_delay * 2u32.saturating_pow(attempt - 1);
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = cancel.cancelled() => return Err(AuditError::Cancelled),
                        }
                    }
                }
            }
        }
    }
    Ok(None)
}

// ============================================================================
// Client
// ============================================================================

/// Production querier: binary (gRPC) pass with schema gating, text (REST)
/// fallback, shared metadata cache, cooperative cancellation.
pub struct MultiEndpointClient {
    cfg: QueryClientConfig,
    rest: RestTransport,
    grpc: GrpcTransport,
    cache: Arc<MetadataCache>,
    cancel: CancellationToken,
}

impl MultiEndpointClient {
    pub fn new(
        cfg: QueryClientConfig,
        cache: Arc<MetadataCache>,
        cancel: CancellationToken,
    ) -> eyre::Result<Self> {
        let rest = RestTransport::new(cfg.timeout, cfg.family_hosts.clone())?;
        let grpc = GrpcTransport::new(cfg.timeout);
        Ok(Self {
            cfg,
            rest,
            grpc,
            cache,
            cancel,
        })
    }

    /// Close every pooled transport connection (process shutdown).
    pub async fn shutdown(&self) {
        self.grpc.close_all().await;
    }

    /// gRPC endpoints of `chain` whose cached schema lists the service for
    /// `op`. Endpoints without usable reflection metadata are skipped so
    /// text-only deployments bypass the binary pass entirely.
    async fn usable_grpc_endpoints(&self, chain: &ChainInfo, op: &QueryOperation) -> Vec<String> {
        let mut usable = Vec::new();
        let rpc_endpoint = chain.rpc_endpoints().first().map(|s| s.to_string());

        for endpoint in chain.grpc_endpoints() {
            let services = self
                .cache
                .schema_services(
                    &chain.chain_id,
                    endpoint,
                    rpc_endpoint.as_deref(),
                    &self.grpc,
                )
                .await;
            match services {
                Some(services) if services.iter().any(|s| s == op.grpc_service()) => {
                    usable.push(endpoint.to_string());
                }
                Some(_) => {
                    tracing::debug!(
                        endpoint = %endpoint,
                        service = op.grpc_service(),
                        "Schema lacks service, skipping binary endpoint"
                    );
                }
                None => {
                    tracing::debug!(
                        endpoint = %endpoint,
                        "No usable schema, skipping binary endpoint"
                    );
                }
            }
        }
        usable
    }
}

#[async_trait]
impl ChainQuerier for MultiEndpointClient {
    async fn query(
        &self,
        chain: &ChainInfo,
        op: QueryOperation,
    ) -> Result<QueryResult, AuditError> {
        let attempts = AtomicU32::new(0);

        if self.cfg.transport != TransportPreference::Text {
            let endpoints = self.usable_grpc_endpoints(chain, &op).await;
            if !endpoints.is_empty() {
                if let Some(result) = run_endpoint_pass(
                    &self.grpc,
                    &endpoints,
                    &op,
                    &self.cfg,
                    &self.cancel,
                    &attempts,
                )
                .await?
                {
                    return Ok(result);
                }
            }
        }

        if self.cfg.transport != TransportPreference::Binary {
            let endpoints: Vec<String> = chain
                .rest_endpoints()
                .iter()
                .map(|s| s.to_string())
                .collect();
            if let Some(result) = run_endpoint_pass(
                &self.rest,
                &endpoints,
                &op,
                &self.cfg,
                &self.cancel,
                &attempts,
            )
            .await?
            {
                return Ok(result);
            }
        }

        Err(AuditError::EndpointsExhausted {
            operation: op.name().to_string(),
            attempts: attempts.load(Ordering::Relaxed),
        })
    }
}
