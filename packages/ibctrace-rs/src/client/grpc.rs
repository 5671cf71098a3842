//! Binary transport: typed gRPC queries over pooled tonic channels.
//!
//! One persistent channel per endpoint with keep-alive (30s interval, 5s
//! timeout) and 100 MiB per-message limits. Endpoints without a scheme are
//! assumed https. Server reflection supplies the service listing cached by
//! the metadata cache; operations whose service is absent never reach this
//! transport.

use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use prost::Message;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::Code;

use tonic_reflection::pb::v1::server_reflection_client::ServerReflectionClient;
use tonic_reflection::pb::v1::server_reflection_request::MessageRequest;
use tonic_reflection::pb::v1::server_reflection_response::MessageResponse;
use tonic_reflection::pb::v1::ServerReflectionRequest;

use ibc_proto::cosmos::bank::v1beta1 as bank;
use ibc_proto::cosmos::base::tendermint::v1beta1 as tm_service;
use ibc_proto::ibc::applications::transfer::v1 as transfer;
use ibc_proto::ibc::core::channel::v1 as chan;
use ibc_proto::ibc::core::client::v1 as ibc_client;
use ibc_proto::ibc::core::connection::v1 as connection;
use ibc_proto::ibc::lightclients::tendermint::v1::ClientState as TmClientState;

use super::{AttemptError, AttemptTransport, QueryOperation, QueryResult};
use crate::cache::SchemaFetcher;
use crate::types::{
    ChannelCounterparty, ChannelEnd, ClientStateInfo, CoinBalance, ConnectionCounterparty,
    ConnectionEnd, DenomTrace, NodeInfo,
};

/// Per-message size limit (both directions).
const MAX_MESSAGE_BYTES: usize = 100 * 1024 * 1024;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct GrpcTransport {
    channels: Mutex<HashMap<String, Channel>>,
    connect_timeout: Duration,
}

impl GrpcTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            connect_timeout,
        }
    }

    /// Registry gRPC addresses are frequently bare `host:port`; default the
    /// scheme to https.
    fn normalize_uri(endpoint: &str) -> String {
        if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("https://{endpoint}")
        }
    }

    /// Get or lazily create the pooled channel for an endpoint.
    async fn channel(&self, endpoint: &str) -> Result<Channel> {
        let mut channels = self.channels.lock().await;
        if let Some(channel) = channels.get(endpoint) {
            return Ok(channel.clone());
        }

        let uri = Self::normalize_uri(endpoint);
        let mut builder = Endpoint::from_shared(uri.clone())
            .wrap_err_with(|| format!("Invalid gRPC endpoint: {uri}"))?
            .connect_timeout(self.connect_timeout)
            .http2_keep_alive_interval(KEEPALIVE_INTERVAL)
            .keep_alive_timeout(KEEPALIVE_TIMEOUT)
            .keep_alive_while_idle(true);

        if uri.starts_with("https://") {
            builder = builder
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .wrap_err("Failed to configure TLS")?;
        }

        let channel = builder
            .connect()
            .await
            .wrap_err_with(|| format!("Failed to connect to {uri}"))?;
        channels.insert(endpoint.to_string(), channel.clone());
        Ok(channel)
    }

    /// Drop all pooled channels (process shutdown).
    pub async fn close_all(&self) {
        self.channels.lock().await.clear();
    }

    async fn dispatch(
        &self,
        channel: Channel,
        op: &QueryOperation,
    ) -> Result<QueryResult, tonic::Status> {
        match op {
            QueryOperation::BankBalance { address, denom } => {
                let mut client = bank::query_client::QueryClient::new(channel)
                    .max_decoding_message_size(MAX_MESSAGE_BYTES)
                    .max_encoding_message_size(MAX_MESSAGE_BYTES);
                let response = client
                    .balance(bank::QueryBalanceRequest {
                        address: address.clone(),
                        denom: denom.clone(),
                    })
                    .await?
                    .into_inner();
                let coin = response
                    .balance
                    .map(|c| decode_coin(c.denom, c.amount))
                    .transpose()?
                    .unwrap_or(CoinBalance {
                        denom: denom.clone(),
                        amount: 0,
                    });
                Ok(QueryResult::Balance(coin))
            }
            QueryOperation::BankAllBalances { address } => {
                let mut client = bank::query_client::QueryClient::new(channel)
                    .max_decoding_message_size(MAX_MESSAGE_BYTES)
                    .max_encoding_message_size(MAX_MESSAGE_BYTES);
                let response = client
                    .all_balances(bank::QueryAllBalancesRequest {
                        address: address.clone(),
                        ..Default::default()
                    })
                    .await?
                    .into_inner();
                let balances = response
                    .balances
                    .into_iter()
                    .map(|c| decode_coin(c.denom, c.amount))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(QueryResult::AllBalances(balances))
            }
            QueryOperation::BankSupplyByDenom { denom } => {
                let mut client = bank::query_client::QueryClient::new(channel)
                    .max_decoding_message_size(MAX_MESSAGE_BYTES)
                    .max_encoding_message_size(MAX_MESSAGE_BYTES);
                let response = client
                    .supply_of(bank::QuerySupplyOfRequest {
                        denom: denom.clone(),
                    })
                    .await?
                    .into_inner();
                let coin = response
                    .amount
                    .map(|c| decode_coin(c.denom, c.amount))
                    .transpose()?
                    .ok_or_else(|| tonic::Status::not_found("supply response without amount"))?;
                Ok(QueryResult::Supply(coin))
            }
            QueryOperation::IbcChannel {
                port_id,
                channel_id,
            } => {
                let mut client = chan::query_client::QueryClient::new(channel)
                    .max_decoding_message_size(MAX_MESSAGE_BYTES)
                    .max_encoding_message_size(MAX_MESSAGE_BYTES);
                let response = client
                    .channel(chan::QueryChannelRequest {
                        port_id: port_id.clone(),
                        channel_id: channel_id.clone(),
                    })
                    .await?
                    .into_inner();
                let ch = response
                    .channel
                    .ok_or_else(|| tonic::Status::not_found("channel response without channel"))?;
                let counterparty = ch.counterparty.ok_or_else(|| {
                    tonic::Status::not_found("channel response without counterparty")
                })?;
                Ok(QueryResult::Channel(ChannelEnd {
                    state: chan::State::try_from(ch.state)
                        .map(|s| format!("{s:?}"))
                        .unwrap_or_default(),
                    ordering: chan::Order::try_from(ch.ordering)
                        .map(|o| format!("{o:?}"))
                        .unwrap_or_default(),
                    counterparty: ChannelCounterparty {
                        port_id: counterparty.port_id,
                        channel_id: counterparty.channel_id,
                    },
                    connection_hops: ch.connection_hops,
                    version: ch.version,
                }))
            }
            QueryOperation::IbcConnection { connection_id } => {
                let mut client = connection::query_client::QueryClient::new(channel)
                    .max_decoding_message_size(MAX_MESSAGE_BYTES)
                    .max_encoding_message_size(MAX_MESSAGE_BYTES);
                let response = client
                    .connection(connection::QueryConnectionRequest {
                        connection_id: connection_id.clone(),
                    })
                    .await?
                    .into_inner();
                let conn = response.connection.ok_or_else(|| {
                    tonic::Status::not_found("connection response without connection")
                })?;
                let counterparty = conn.counterparty.ok_or_else(|| {
                    tonic::Status::not_found("connection response without counterparty")
                })?;
                Ok(QueryResult::Connection(ConnectionEnd {
                    client_id: conn.client_id,
                    counterparty: ConnectionCounterparty {
                        client_id: counterparty.client_id,
                        connection_id: counterparty.connection_id,
                    },
                    state: connection::State::try_from(conn.state)
                        .map(|s| format!("{s:?}"))
                        .unwrap_or_default(),
                }))
            }
            QueryOperation::IbcClientState { client_id } => {
                let mut client = ibc_client::query_client::QueryClient::new(channel)
                    .max_decoding_message_size(MAX_MESSAGE_BYTES)
                    .max_encoding_message_size(MAX_MESSAGE_BYTES);
                let response = client
                    .client_state(ibc_client::QueryClientStateRequest {
                        client_id: client_id.clone(),
                    })
                    .await?
                    .into_inner();
                let any = response.client_state.ok_or_else(|| {
                    tonic::Status::not_found("client-state response without state")
                })?;
                if !any.type_url.ends_with("tendermint.v1.ClientState") {
                    return Err(tonic::Status::invalid_argument(format!(
                        "unsupported client type {}",
                        any.type_url
                    )));
                }
                let state = TmClientState::decode(any.value.as_slice()).map_err(|e| {
                    tonic::Status::internal(format!("client state decode failed: {e}"))
                })?;
                Ok(QueryResult::ClientState(ClientStateInfo {
                    chain_id: state.chain_id,
                }))
            }
            QueryOperation::IbcDenomTrace { hash } => {
                let mut client = transfer::query_client::QueryClient::new(channel)
                    .max_decoding_message_size(MAX_MESSAGE_BYTES)
                    .max_encoding_message_size(MAX_MESSAGE_BYTES);
                let response = client
                    .denom_trace(transfer::QueryDenomTraceRequest { hash: hash.clone() })
                    .await?
                    .into_inner();
                let trace = response
                    .denom_trace
                    .ok_or_else(|| tonic::Status::not_found("denom trace not found"))?;
                Ok(QueryResult::DenomTrace(DenomTrace {
                    path: trace.path,
                    base_denom: trace.base_denom,
                }))
            }
            QueryOperation::TendermintNodeInfo => {
                let mut client = tm_service::service_client::ServiceClient::new(channel)
                    .max_decoding_message_size(MAX_MESSAGE_BYTES)
                    .max_encoding_message_size(MAX_MESSAGE_BYTES);
                let response = client
                    .get_node_info(tm_service::GetNodeInfoRequest {})
                    .await?
                    .into_inner();
                let default_info = response
                    .default_node_info
                    .ok_or_else(|| tonic::Status::not_found("node info without identity"))?;
                Ok(QueryResult::NodeInfo(NodeInfo {
                    network: default_info.network,
                    moniker: default_info.moniker,
                    app_version: response
                        .application_version
                        .map(|v| v.version)
                        .unwrap_or_default(),
                }))
            }
            QueryOperation::IbcEscrowAddress {
                port_id,
                channel_id,
            } => {
                let mut client = transfer::query_client::QueryClient::new(channel)
                    .max_decoding_message_size(MAX_MESSAGE_BYTES)
                    .max_encoding_message_size(MAX_MESSAGE_BYTES);
                let response = client
                    .escrow_address(transfer::QueryEscrowAddressRequest {
                        port_id: port_id.clone(),
                        channel_id: channel_id.clone(),
                    })
                    .await?
                    .into_inner();
                Ok(QueryResult::EscrowAddress(response.escrow_address))
            }
        }
    }
}

#[async_trait]
impl AttemptTransport for GrpcTransport {
    fn kind(&self) -> &'static str {
        "grpc"
    }

    async fn attempt(
        &self,
        endpoint: &str,
        op: &QueryOperation,
        timeout: Duration,
    ) -> Result<QueryResult, AttemptError> {
        let channel = self
            .channel(endpoint)
            .await
            .map_err(|e| AttemptError::retryable(format!("connect failed: {e}")))?;

        let result = tokio::time::timeout(timeout, self.dispatch(channel, op)).await;
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(status)) => Err(classify_grpc_status(status)),
            Err(_) => Err(AttemptError::retryable(format!(
                "deadline of {timeout:?} exceeded"
            ))),
        }
    }
}

#[async_trait]
impl SchemaFetcher for GrpcTransport {
    /// List the services an endpoint exposes via gRPC server reflection.
    async fn fetch_services(&self, endpoint: &str) -> Result<Vec<String>> {
        let channel = self.channel(endpoint).await?;
        let mut client = ServerReflectionClient::new(channel);

        let request = ServerReflectionRequest {
            host: String::new(),
            message_request: Some(MessageRequest::ListServices(String::new())),
        };
        let mut stream = client
            .server_reflection_info(tokio_stream::once(request))
            .await
            .map_err(|e| eyre!("Reflection request failed: {}", e))?
            .into_inner();

        while let Some(response) = stream
            .message()
            .await
            .map_err(|e| eyre!("Reflection stream failed: {}", e))?
        {
            if let Some(MessageResponse::ListServicesResponse(list)) = response.message_response {
                return Ok(list.service.into_iter().map(|s| s.name).collect());
            }
        }
        Err(eyre!("Reflection stream ended without a service list"))
    }
}

fn decode_coin(denom: String, amount: String) -> Result<CoinBalance, tonic::Status> {
    let amount = amount
        .parse::<u128>()
        .map_err(|e| tonic::Status::internal(format!("bad coin amount {amount:?}: {e}")))?;
    Ok(CoinBalance { denom, amount })
}

/// Map a gRPC status onto the rotation policy. Unimplemented means the
/// endpoint cannot serve the operation at all; argument-shaped failures
/// match the HTTP fail-fast rule.
fn classify_grpc_status(status: tonic::Status) -> AttemptError {
    let reason = format!("{}: {}", status.code(), status.message());
    match status.code() {
        Code::Unimplemented => AttemptError::rotate(reason),
        Code::NotFound => AttemptError::fail_fast(404, reason),
        Code::InvalidArgument | Code::OutOfRange => AttemptError::fail_fast(400, reason),
        Code::Unauthenticated => AttemptError::fail_fast(401, reason),
        Code::PermissionDenied => AttemptError::fail_fast(403, reason),
        Code::FailedPrecondition => AttemptError::fail_fast(412, reason),
        Code::ResourceExhausted => AttemptError {
            class: super::FailureClass::Retryable,
            reason,
            status: Some(429),
        },
        _ => AttemptError::retryable(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FailureClass;

    #[test]
    fn test_normalize_uri_defaults_to_https() {
        assert_eq!(
            GrpcTransport::normalize_uri("grpc.osmosis.zone:9090"),
            "https://grpc.osmosis.zone:9090"
        );
        assert_eq!(
            GrpcTransport::normalize_uri("http://localhost:9090"),
            "http://localhost:9090"
        );
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(
            classify_grpc_status(tonic::Status::unimplemented("no service")).class,
            FailureClass::RotateEndpoint
        );
        assert_eq!(
            classify_grpc_status(tonic::Status::unavailable("down")).class,
            FailureClass::Retryable
        );
        assert_eq!(
            classify_grpc_status(tonic::Status::resource_exhausted("throttled")).class,
            FailureClass::Retryable
        );
        let not_found = classify_grpc_status(tonic::Status::not_found("no trace"));
        assert_eq!(not_found.class, FailureClass::FailFast);
        assert_eq!(not_found.status, Some(404));
    }

    #[test]
    fn test_decode_coin_rejects_non_numeric() {
        assert!(decode_coin("uatom".into(), "12three".into()).is_err());
        let coin = decode_coin("uatom".into(), "42".into()).unwrap();
        assert_eq!(coin.amount, 42);
    }
}
