//! Test fixtures: a scripted querier and synthetic registry builders.
//!
//! Used by this crate's unit tests and by the auditor's orchestrator tests;
//! none of this is reachable from production paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::{ChainQuerier, QueryOperation, QueryResult};
use crate::error::AuditError;
use crate::registry::ChainRegistry;
use crate::types::{
    ApiEndpoint, ApiSet, ChainInfo, ChannelCounterparty, ChannelEnd, ClientStateInfo,
    CoinBalance, ConnectionCounterparty, ConnectionEnd, DenomRecord, DenomTrace, StakingInfo,
};

/// A synthetic but valid chain record: prefix = name, staking token
/// `u<name>`, one REST endpoint.
pub fn chain(name: &str, chain_id: &str) -> ChainInfo {
    ChainInfo {
        chain_name: name.to_string(),
        chain_id: chain_id.to_string(),
        bech32_prefix: name.to_string(),
        staking: Some(StakingInfo {
            staking_tokens: vec![DenomRecord {
                denom: format!("u{name}"),
            }],
        }),
        fees: None,
        apis: ApiSet {
            rpc: vec![],
            rest: vec![ApiEndpoint {
                address: format!("https://lcd.{name}.example.com"),
                provider: None,
            }],
            grpc: vec![],
        },
    }
}

/// An in-memory registry over synthetic `(name, chain_id)` pairs.
pub fn registry_with(chains: &[(&str, &str)]) -> ChainRegistry {
    ChainRegistry::from_chains(chains.iter().map(|(name, id)| chain(name, id)))
}

/// How a scripted operation should fail.
#[derive(Debug, Clone)]
pub enum MockFailure {
    /// All endpoints exhausted after the given attempt count.
    Exhausted(u32),
    /// Fail-fast client error with an HTTP status.
    Client(u16),
}

/// Scripted [`ChainQuerier`]: responses keyed by `(chain_name, operation)`.
///
/// Unscripted operations fail as exhausted endpoints, which is also what a
/// chain with no reachable endpoints produces.
#[derive(Default)]
pub struct MockQuerier {
    responses: Mutex<HashMap<(String, QueryOperation), QueryResult>>,
    failures: Mutex<HashMap<(String, QueryOperation), MockFailure>>,
    calls: AtomicU32,
}

impl MockQuerier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of `query` calls issued.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn with_response(self, chain: &str, op: QueryOperation, result: QueryResult) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert((chain.to_string(), op), result);
        self
    }

    pub fn with_failure(self, chain: &str, op: QueryOperation, failure: MockFailure) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert((chain.to_string(), op), failure);
        self
    }

    // ========================================================================
    // Typed Builders
    // ========================================================================

    pub fn with_balance(self, chain: &str, address: &str, denom: &str, amount: u128) -> Self {
        self.with_response(
            chain,
            QueryOperation::BankBalance {
                address: address.to_string(),
                denom: denom.to_string(),
            },
            QueryResult::Balance(CoinBalance {
                denom: denom.to_string(),
                amount,
            }),
        )
    }

    pub fn with_all_balances(self, chain: &str, address: &str, coins: &[(&str, u128)]) -> Self {
        self.with_response(
            chain,
            QueryOperation::BankAllBalances {
                address: address.to_string(),
            },
            QueryResult::AllBalances(
                coins
                    .iter()
                    .map(|(denom, amount)| CoinBalance {
                        denom: denom.to_string(),
                        amount: *amount,
                    })
                    .collect(),
            ),
        )
    }

    pub fn with_supply(self, chain: &str, denom: &str, amount: u128) -> Self {
        self.with_response(
            chain,
            QueryOperation::BankSupplyByDenom {
                denom: denom.to_string(),
            },
            QueryResult::Supply(CoinBalance {
                denom: denom.to_string(),
                amount,
            }),
        )
    }

    pub fn with_denom_trace(self, chain: &str, hash: &str, path: &str, base_denom: &str) -> Self {
        self.with_response(
            chain,
            QueryOperation::IbcDenomTrace {
                hash: hash.to_string(),
            },
            QueryResult::DenomTrace(DenomTrace {
                path: path.to_string(),
                base_denom: base_denom.to_string(),
            }),
        )
    }

    pub fn with_channel(
        self,
        chain: &str,
        channel_id: &str,
        counterparty_channel: &str,
        connection_id: &str,
    ) -> Self {
        self.with_response(
            chain,
            QueryOperation::IbcChannel {
                port_id: "transfer".to_string(),
                channel_id: channel_id.to_string(),
            },
            QueryResult::Channel(ChannelEnd {
                state: "Open".to_string(),
                ordering: "Unordered".to_string(),
                counterparty: ChannelCounterparty {
                    port_id: "transfer".to_string(),
                    channel_id: counterparty_channel.to_string(),
                },
                connection_hops: vec![connection_id.to_string()],
                version: "ics20-1".to_string(),
            }),
        )
    }

    pub fn with_connection(
        self,
        chain: &str,
        connection_id: &str,
        client_id: &str,
        counterparty_client: &str,
        counterparty_connection: &str,
    ) -> Self {
        self.with_response(
            chain,
            QueryOperation::IbcConnection {
                connection_id: connection_id.to_string(),
            },
            QueryResult::Connection(ConnectionEnd {
                client_id: client_id.to_string(),
                counterparty: ConnectionCounterparty {
                    client_id: counterparty_client.to_string(),
                    connection_id: counterparty_connection.to_string(),
                },
                state: "Open".to_string(),
            }),
        )
    }

    pub fn with_client_state(self, chain: &str, client_id: &str, chain_id: &str) -> Self {
        self.with_response(
            chain,
            QueryOperation::IbcClientState {
                client_id: client_id.to_string(),
            },
            QueryResult::ClientState(ClientStateInfo {
                chain_id: chain_id.to_string(),
            }),
        )
    }

    pub fn with_escrow_address(self, chain: &str, channel_id: &str, address: &str) -> Self {
        self.with_response(
            chain,
            QueryOperation::IbcEscrowAddress {
                port_id: "transfer".to_string(),
                channel_id: channel_id.to_string(),
            },
            QueryResult::EscrowAddress(address.to_string()),
        )
    }

    /// Script a full single-hop topology: `channel_id` on `chain` leads to
    /// `counterparty_chain_id` via synthetic connection/client ids.
    pub fn with_topology(
        self,
        chain: &str,
        channel_id: &str,
        counterparty_channel: &str,
        counterparty_chain_id: &str,
    ) -> Self {
        let connection_id = format!("connection-{chain}-{channel_id}");
        let client_id = format!("07-tendermint-{chain}-{channel_id}");
        self.with_channel(chain, channel_id, counterparty_channel, &connection_id)
            .with_connection(
                chain,
                &connection_id,
                &client_id,
                "07-tendermint-peer",
                "connection-peer",
            )
            .with_client_state(chain, &client_id, counterparty_chain_id)
    }
}

#[async_trait]
impl ChainQuerier for MockQuerier {
    async fn query(
        &self,
        chain: &ChainInfo,
        op: QueryOperation,
    ) -> Result<QueryResult, AuditError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let key = (chain.chain_name.clone(), op.clone());

        if let Some(failure) = self.failures.lock().unwrap().get(&key) {
            return Err(match failure {
                MockFailure::Exhausted(attempts) => AuditError::EndpointsExhausted {
                    operation: op.name().to_string(),
                    attempts: *attempts,
                },
                MockFailure::Client(status) => AuditError::ClientError {
                    endpoint: "mock".to_string(),
                    status: *status,
                },
            });
        }

        self.responses
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| AuditError::EndpointsExhausted {
                operation: op.name().to_string(),
                attempts: 0,
            })
    }
}
