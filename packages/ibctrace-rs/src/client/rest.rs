//! Text transport: HTTP GET against the standard Cosmos REST paths.
//!
//! Legacy LCD deployments wrap payloads in a top-level `result` envelope;
//! that envelope is unwrapped unless the endpoint host matches a configured
//! family tag (Sei-family nodes return the payload directly and must be
//! passed through verbatim).

use async_trait::async_trait;
use eyre::{eyre, Result};
use reqwest::Client;
use std::time::Duration;

use super::{AttemptError, AttemptTransport, QueryOperation, QueryResult};
use crate::types::{
    ChannelEnd, ClientStateInfo, CoinBalance, ConnectionEnd, DenomTrace, NodeInfo,
};

pub struct RestTransport {
    client: Client,
    family_hosts: Vec<String>,
}

impl RestTransport {
    pub fn new(timeout: Duration, family_hosts: Vec<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
        Ok(Self {
            client,
            family_hosts,
        })
    }

    /// REST path for an operation, relative to the endpoint root.
    fn path_for(op: &QueryOperation) -> String {
        match op {
            QueryOperation::BankBalance { address, denom } => format!(
                "/cosmos/bank/v1beta1/balances/{address}/by_denom?denom={}",
                urlencode(denom)
            ),
            QueryOperation::BankAllBalances { address } => {
                format!("/cosmos/bank/v1beta1/balances/{address}?pagination.limit=500")
            }
            QueryOperation::BankSupplyByDenom { denom } => format!(
                "/cosmos/bank/v1beta1/supply/by_denom?denom={}",
                urlencode(denom)
            ),
            QueryOperation::IbcChannel {
                port_id,
                channel_id,
            } => format!("/ibc/core/channel/v1/channels/{channel_id}/ports/{port_id}"),
            QueryOperation::IbcConnection { connection_id } => {
                format!("/ibc/core/connection/v1/connections/{connection_id}")
            }
            QueryOperation::IbcClientState { client_id } => {
                format!("/ibc/core/client/v1/client_states/{client_id}")
            }
            QueryOperation::IbcDenomTrace { hash } => {
                format!("/ibc/apps/transfer/v1/denom_traces/{hash}")
            }
            QueryOperation::TendermintNodeInfo => {
                "/cosmos/base/tendermint/v1beta1/node_info".to_string()
            }
            QueryOperation::IbcEscrowAddress {
                port_id,
                channel_id,
            } => format!(
                "/ibc/apps/transfer/v1/channels/{channel_id}/ports/{port_id}/escrow_address"
            ),
        }
    }

    fn is_family_host(&self, endpoint: &str) -> bool {
        let host = endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .split('/')
            .next()
            .unwrap_or("");
        self.family_hosts.iter().any(|tag| host.contains(tag.as_str()))
    }

    fn decode(
        op: &QueryOperation,
        body: serde_json::Value,
    ) -> Result<QueryResult, String> {
        match op {
            QueryOperation::BankBalance { denom, .. } => {
                let coin = body
                    .get("balance")
                    .ok_or("missing 'balance' field")?
                    .clone();
                let coin = parse_coin(&coin)?;
                // Zero balances may echo an empty denom; normalize.
                let coin = if coin.denom.is_empty() {
                    CoinBalance {
                        denom: denom.clone(),
                        amount: coin.amount,
                    }
                } else {
                    coin
                };
                Ok(QueryResult::Balance(coin))
            }
            QueryOperation::BankAllBalances { .. } => {
                let balances = body
                    .get("balances")
                    .and_then(|b| b.as_array())
                    .ok_or("missing 'balances' array")?
                    .iter()
                    .map(parse_coin)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(QueryResult::AllBalances(balances))
            }
            QueryOperation::BankSupplyByDenom { .. } => {
                let coin = body.get("amount").ok_or("missing 'amount' field")?;
                Ok(QueryResult::Supply(parse_coin(coin)?))
            }
            QueryOperation::IbcChannel { .. } => {
                let channel: ChannelEnd = serde_json::from_value(
                    body.get("channel").ok_or("missing 'channel' field")?.clone(),
                )
                .map_err(|e| e.to_string())?;
                Ok(QueryResult::Channel(channel))
            }
            QueryOperation::IbcConnection { .. } => {
                let connection: ConnectionEnd = serde_json::from_value(
                    body.get("connection")
                        .ok_or("missing 'connection' field")?
                        .clone(),
                )
                .map_err(|e| e.to_string())?;
                Ok(QueryResult::Connection(connection))
            }
            QueryOperation::IbcClientState { .. } => {
                let chain_id = body
                    .get("client_state")
                    .and_then(|s| s.get("chain_id"))
                    .and_then(|v| v.as_str())
                    .ok_or("missing 'client_state.chain_id' field")?
                    .to_string();
                Ok(QueryResult::ClientState(ClientStateInfo { chain_id }))
            }
            QueryOperation::IbcDenomTrace { .. } => {
                let trace: DenomTrace = serde_json::from_value(
                    body.get("denom_trace")
                        .ok_or("missing 'denom_trace' field")?
                        .clone(),
                )
                .map_err(|e| e.to_string())?;
                Ok(QueryResult::DenomTrace(trace))
            }
            QueryOperation::TendermintNodeInfo => {
                let network = body
                    .get("default_node_info")
                    .and_then(|n| n.get("network"))
                    .and_then(|v| v.as_str())
                    .ok_or("missing 'default_node_info.network' field")?
                    .to_string();
                let moniker = body
                    .get("default_node_info")
                    .and_then(|n| n.get("moniker"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let app_version = body
                    .get("application_version")
                    .and_then(|a| a.get("version"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Ok(QueryResult::NodeInfo(NodeInfo {
                    network,
                    moniker,
                    app_version,
                }))
            }
            QueryOperation::IbcEscrowAddress { .. } => {
                let address = body
                    .get("escrow_address")
                    .and_then(|v| v.as_str())
                    .ok_or("missing 'escrow_address' field")?
                    .to_string();
                Ok(QueryResult::EscrowAddress(address))
            }
        }
    }
}

#[async_trait]
impl AttemptTransport for RestTransport {
    fn kind(&self) -> &'static str {
        "rest"
    }

    async fn attempt(
        &self,
        endpoint: &str,
        op: &QueryOperation,
        timeout: Duration,
    ) -> Result<QueryResult, AttemptError> {
        let url = format!("{}{}", endpoint.trim_end_matches('/'), Self::path_for(op));

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| AttemptError::retryable(format!("request failed: {e}")))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::from_http_status(status, truncate(&body, 200)));
        }

        let mut body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AttemptError::retryable(format!("invalid JSON: {e}")))?;

        // Legacy envelope: non-family hosts may nest the payload under
        // `result`; family-tagged hosts are passed through verbatim.
        if !self.is_family_host(endpoint) {
            if let Some(inner) = body.get("result").filter(|v| v.is_object()) {
                body = inner.clone();
            }
        }

        Self::decode(op, body)
            .map_err(|reason| AttemptError::retryable(format!("decode failed: {reason}")))
    }
}

fn parse_coin(value: &serde_json::Value) -> Result<CoinBalance, String> {
    let denom = value
        .get("denom")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let amount = value
        .get("amount")
        .and_then(|v| v.as_str())
        .ok_or("missing coin 'amount'")?
        .parse::<u128>()
        .map_err(|e| format!("bad coin amount: {e}"))?;
    Ok(CoinBalance { denom, amount })
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Percent-encode the reserved characters that appear in denoms (`/` in
/// `ibc/<hash>` and factory denoms).
fn urlencode(s: &str) -> String {
    s.replace('%', "%25")
        .replace('/', "%2F")
        .replace('&', "%26")
        .replace('?', "%3F")
        .replace('#', "%23")
        .replace('+', "%2B")
        .replace(' ', "%20")
}
