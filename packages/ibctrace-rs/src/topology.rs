//! IBC topology resolution.
//!
//! Walks channel -> connection -> client state on-chain to discover which
//! chain sits at the other end of a channel, independent of any registry
//! channel-pair file. The registry is only consulted at the last step to map
//! the counterparty chain-id onto a chain name.

use crate::client::ChainQuerier;
use crate::error::AuditError;
use crate::registry::ChainRegistry;
use crate::types::{ChainInfo, CounterpartyInfo};

pub struct TopologyResolver<'a> {
    querier: &'a dyn ChainQuerier,
    registry: &'a ChainRegistry,
}

impl<'a> TopologyResolver<'a> {
    pub fn new(querier: &'a dyn ChainQuerier, registry: &'a ChainRegistry) -> Self {
        Self { querier, registry }
    }

    /// Resolve the counterparty of `channel_id` on `chain`.
    ///
    /// Fails with [`AuditError::TopologyResolutionFailed`] when any link of
    /// the channel -> connection -> client -> chain-id chain is broken or
    /// the resulting chain-id is not in the registry.
    pub async fn resolve_counterparty(
        &self,
        chain: &ChainInfo,
        port_id: &str,
        channel_id: &str,
    ) -> Result<CounterpartyInfo, AuditError> {
        let fail = |reason: String| AuditError::TopologyResolutionFailed {
            chain: chain.chain_name.clone(),
            channel: channel_id.to_string(),
            reason,
        };

        let channel = self
            .querier
            .ibc_channel(chain, port_id, channel_id)
            .await
            .map_err(|e| fail(format!("channel query: {e}")))?;

        let counterparty_channel = channel.counterparty.channel_id.clone();
        if counterparty_channel.is_empty() {
            return Err(fail("channel has no counterparty channel id".to_string()));
        }
        let connection_id = channel
            .connection_hops
            .first()
            .cloned()
            .ok_or_else(|| fail("channel has no connection hops".to_string()))?;

        let connection = self
            .querier
            .ibc_connection(chain, &connection_id)
            .await
            .map_err(|e| fail(format!("connection query: {e}")))?;

        let client_state = self
            .querier
            .ibc_client_state(chain, &connection.client_id)
            .await
            .map_err(|e| fail(format!("client-state query: {e}")))?;

        let chain_name = self
            .registry
            .chain_name_for_id(&client_state.chain_id)
            .ok_or_else(|| {
                fail(format!(
                    "counterparty chain-id {} not in registry",
                    client_state.chain_id
                ))
            })?
            .to_string();

        tracing::debug!(
            chain = %chain.chain_name,
            channel = channel_id,
            counterparty = %chain_name,
            counterparty_channel = %counterparty_channel,
            "Resolved channel counterparty"
        );

        Ok(CounterpartyInfo {
            chain_name,
            channel_id: counterparty_channel,
            connection_id: connection.counterparty.connection_id,
            client_id: connection.counterparty.client_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{QueryOperation, QueryResult};
    use crate::testing::{chain, registry_with, MockQuerier};

    #[tokio::test]
    async fn test_resolves_counterparty_through_client_state() {
        let registry = registry_with(&[("cosmoshub", "cosmoshub-4"), ("osmosis", "osmosis-1")]);
        let querier = MockQuerier::new()
            .with_channel("cosmoshub", "channel-141", "channel-0", "connection-257")
            .with_connection(
                "cosmoshub",
                "connection-257",
                "07-tendermint-259",
                "07-tendermint-1",
                "connection-1",
            )
            .with_client_state("cosmoshub", "07-tendermint-259", "osmosis-1");

        let hub = chain("cosmoshub", "cosmoshub-4");
        let resolver = TopologyResolver::new(&querier, &registry);
        let info = resolver
            .resolve_counterparty(&hub, "transfer", "channel-141")
            .await
            .unwrap();

        assert_eq!(info.chain_name, "osmosis");
        assert_eq!(info.channel_id, "channel-0");
        assert_eq!(info.connection_id, "connection-1");
        assert_eq!(info.client_id, "07-tendermint-1");
    }

    #[tokio::test]
    async fn test_unknown_counterparty_chain_id_fails() {
        let registry = registry_with(&[("cosmoshub", "cosmoshub-4")]);
        let querier = MockQuerier::new()
            .with_channel("cosmoshub", "channel-141", "channel-0", "connection-257")
            .with_connection(
                "cosmoshub",
                "connection-257",
                "07-tendermint-259",
                "07-tendermint-1",
                "connection-1",
            )
            .with_client_state("cosmoshub", "07-tendermint-259", "ghostchain-1");

        let hub = chain("cosmoshub", "cosmoshub-4");
        let resolver = TopologyResolver::new(&querier, &registry);
        let err = resolver
            .resolve_counterparty(&hub, "transfer", "channel-141")
            .await
            .unwrap_err();

        assert!(matches!(err, AuditError::TopologyResolutionFailed { .. }));
        assert!(err.to_string().contains("ghostchain-1"));
    }

    #[tokio::test]
    async fn test_missing_channel_fails() {
        let registry = registry_with(&[("cosmoshub", "cosmoshub-4")]);
        let querier = MockQuerier::new();
        let hub = chain("cosmoshub", "cosmoshub-4");
        let resolver = TopologyResolver::new(&querier, &registry);

        let err = resolver
            .resolve_counterparty(&hub, "transfer", "channel-9")
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::TopologyResolutionFailed { .. }));
    }

    #[tokio::test]
    async fn test_channel_without_hops_fails() {
        let registry = registry_with(&[("cosmoshub", "cosmoshub-4")]);
        let querier = MockQuerier::new().with_response(
            "cosmoshub",
            QueryOperation::IbcChannel {
                port_id: "transfer".to_string(),
                channel_id: "channel-141".to_string(),
            },
            QueryResult::Channel(crate::types::ChannelEnd {
                state: "Open".to_string(),
                ordering: "Unordered".to_string(),
                counterparty: crate::types::ChannelCounterparty {
                    port_id: "transfer".to_string(),
                    channel_id: "channel-0".to_string(),
                },
                connection_hops: vec![],
                version: "ics20-1".to_string(),
            }),
        );

        let hub = chain("cosmoshub", "cosmoshub-4");
        let resolver = TopologyResolver::new(&querier, &registry);
        let err = resolver
            .resolve_counterparty(&hub, "transfer", "channel-141")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection hops"));
    }
}
