//! Recursive denomination unwrapping.
//!
//! An `ibc/<hash>` denom is peeled one `port/channel` pair per step: the
//! outermost pair identifies the hop taken onto the current chain, the
//! counterparty of that channel is resolved from on-chain topology, and the
//! denom as seen on the counterparty is the re-hash of the remaining path.
//! The walk ends at a non-IBC base denom, on a revisited chain, at the hop
//! limit, or on a failed lookup; only the first case is complete.

use std::collections::HashSet;

use crate::client::ChainQuerier;
use crate::denom::{ibc_denom_hash, is_ibc_denom, peel_outer_hop};
use crate::registry::ChainRegistry;
use crate::topology::TopologyResolver;
use crate::types::{Hop, TraceFailure, UnwrapResult};

/// Upper bound on hops for one token; exceeding it aborts the trace.
pub const MAX_HOPS: usize = 32;

pub struct DenomResolver<'a> {
    querier: &'a dyn ChainQuerier,
    registry: &'a ChainRegistry,
    max_hops: usize,
}

impl<'a> DenomResolver<'a> {
    pub fn new(querier: &'a dyn ChainQuerier, registry: &'a ChainRegistry) -> Self {
        Self {
            querier,
            registry,
            max_hops: MAX_HOPS,
        }
    }

    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// Unwrap `denom` as observed on `chain_name` back to its origin.
    ///
    /// Never fails outright: lookups that cannot proceed return the state
    /// reached so far with `complete = false` and the failure recorded.
    pub async fn unwrap_denom(&self, chain_name: &str, denom: &str) -> UnwrapResult {
        let mut visited: HashSet<String> = HashSet::new();
        let mut hops: Vec<Hop> = Vec::new();
        let mut current_chain = chain_name.to_string();
        let mut current_denom = denom.to_string();

        loop {
            if !is_ibc_denom(&current_denom) {
                tracing::debug!(
                    denom,
                    origin = %current_chain,
                    base = %current_denom,
                    hops = hops.len(),
                    "Unwrap complete"
                );
                return UnwrapResult {
                    base_denom: current_denom,
                    origin_chain: current_chain,
                    hops,
                    complete: true,
                    failure: None,
                };
            }

            if visited.contains(&current_chain) {
                return self.incomplete(
                    current_denom,
                    current_chain.clone(),
                    hops,
                    TraceFailure::Cycle {
                        chain: current_chain,
                    },
                );
            }

            if hops.len() >= self.max_hops {
                return self.incomplete(
                    current_denom,
                    current_chain,
                    hops,
                    TraceFailure::HopLimit {
                        limit: self.max_hops,
                    },
                );
            }

            let chain_info = match self.registry.get(&current_chain) {
                Ok(info) => info,
                Err(e) => {
                    return self.incomplete(
                        current_denom,
                        current_chain,
                        hops,
                        TraceFailure::TraceLookup {
                            reason: e.to_string(),
                        },
                    );
                }
            };

            let hash = ibc_denom_hash(&current_denom).unwrap_or_default();
            let trace = match self.querier.ibc_denom_trace(chain_info, hash).await {
                Ok(trace) => trace,
                Err(e) => {
                    return self.incomplete(
                        current_denom,
                        current_chain,
                        hops,
                        TraceFailure::TraceLookup {
                            reason: e.to_string(),
                        },
                    );
                }
            };

            let (port, channel, next_denom) = match peel_outer_hop(&trace.path, &trace.base_denom)
            {
                Ok(peeled) => peeled,
                Err(_) => {
                    return self.incomplete(
                        current_denom,
                        current_chain,
                        hops,
                        TraceFailure::MalformedPath { path: trace.path },
                    );
                }
            };

            visited.insert(current_chain.clone());
            hops.push(Hop {
                chain: current_chain.clone(),
                port: port.clone(),
                channel: channel.clone(),
            });

            let topology = TopologyResolver::new(self.querier, self.registry);
            let counterparty = match topology
                .resolve_counterparty(chain_info, &port, &channel)
                .await
            {
                Ok(info) => info,
                Err(e) => {
                    return self.incomplete(
                        current_denom,
                        current_chain,
                        hops,
                        TraceFailure::Topology {
                            reason: e.to_string(),
                        },
                    );
                }
            };

            current_chain = counterparty.chain_name;
            current_denom = next_denom;
        }
    }

    fn incomplete(
        &self,
        denom: String,
        chain: String,
        hops: Vec<Hop>,
        failure: TraceFailure,
    ) -> UnwrapResult {
        tracing::debug!(
            denom = %denom,
            chain = %chain,
            hops = hops.len(),
            failure = %failure,
            "Unwrap incomplete"
        );
        UnwrapResult {
            base_denom: denom,
            origin_chain: chain,
            hops,
            complete: false,
            failure: Some(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denom::{hash_trace_path, ibc_denom};
    use crate::testing::{registry_with, MockQuerier};

    #[tokio::test]
    async fn test_native_denom_is_fixed_point() {
        let registry = registry_with(&[("cosmoshub", "cosmoshub-4")]);
        let querier = MockQuerier::new();
        let resolver = DenomResolver::new(&querier, &registry);

        let result = resolver.unwrap_denom("cosmoshub", "uatom").await;
        assert_eq!(result, UnwrapResult::native("uatom", "cosmoshub"));
        // The fixed point involves no queries at all.
        assert_eq!(querier.call_count(), 0);
    }

    #[tokio::test]
    async fn test_single_hop_unwrap() {
        // uatom sent cosmoshub->osmosis over channel-0 (osmosis side).
        let wrapped = ibc_denom("transfer", "channel-0", "uatom");
        let hash = wrapped.strip_prefix("ibc/").unwrap();

        let registry = registry_with(&[("cosmoshub", "cosmoshub-4"), ("osmosis", "osmosis-1")]);
        let querier = MockQuerier::new()
            .with_denom_trace("osmosis", hash, "transfer/channel-0", "uatom")
            .with_topology("osmosis", "channel-0", "channel-141", "cosmoshub-4");

        let resolver = DenomResolver::new(&querier, &registry);
        let result = resolver.unwrap_denom("osmosis", &wrapped).await;

        assert!(result.complete);
        assert_eq!(result.base_denom, "uatom");
        assert_eq!(result.origin_chain, "cosmoshub");
        assert_eq!(
            result.hops,
            vec![Hop {
                chain: "osmosis".to_string(),
                port: "transfer".to_string(),
                channel: "channel-0".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_two_hop_unwrap_peels_one_pair_per_chain() {
        // uatom: cosmoshub -> juno (channel-3) -> osmosis (channel-7).
        // Observed on osmosis with the two-pair trace path.
        let full_path = "transfer/channel-7/transfer/channel-3";
        let wrapped = hash_trace_path(&format!("{full_path}/uatom"));
        let outer_hash = wrapped.strip_prefix("ibc/").unwrap();

        // After peeling the outer pair, juno sees the single-hop wrap.
        let inner = hash_trace_path("transfer/channel-3/uatom");
        let inner_hash = inner.strip_prefix("ibc/").unwrap();

        let registry = registry_with(&[
            ("cosmoshub", "cosmoshub-4"),
            ("juno", "juno-1"),
            ("osmosis", "osmosis-1"),
        ]);
        let querier = MockQuerier::new()
            .with_denom_trace("osmosis", outer_hash, full_path, "uatom")
            .with_topology("osmosis", "channel-7", "channel-47", "juno-1")
            .with_denom_trace("juno", inner_hash, "transfer/channel-3", "uatom")
            .with_topology("juno", "channel-3", "channel-207", "cosmoshub-4");

        let resolver = DenomResolver::new(&querier, &registry);
        let result = resolver.unwrap_denom("osmosis", &wrapped).await;

        assert!(result.complete, "failure: {:?}", result.failure);
        assert_eq!(result.base_denom, "uatom");
        assert_eq!(result.origin_chain, "cosmoshub");
        // One hop per peeled pair, in traversal order.
        assert_eq!(
            result.hops,
            vec![
                Hop {
                    chain: "osmosis".to_string(),
                    port: "transfer".to_string(),
                    channel: "channel-7".to_string(),
                },
                Hop {
                    chain: "juno".to_string(),
                    port: "transfer".to_string(),
                    channel: "channel-3".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_cycle_detection_truncates_at_first_revisit() {
        // Synthetic loop: the trace on each side points back at the other.
        let denom_a = ibc_denom("transfer", "channel-1", "ibc/deeper");
        let hash_a = denom_a.strip_prefix("ibc/").unwrap();
        // Peeling channel-1 off a single-pair path leaves the base denom,
        // which is itself ibc/ on the far side; script its trace to loop.
        let registry = registry_with(&[("achain", "a-1"), ("bchain", "b-1")]);
        let querier = MockQuerier::new()
            .with_denom_trace("achain", hash_a, "transfer/channel-1", "ibc/deeper")
            .with_topology("achain", "channel-1", "channel-2", "b-1")
            .with_denom_trace("bchain", "deeper", "transfer/channel-2", "ibc/evendeeper")
            .with_topology("bchain", "channel-2", "channel-1", "a-1");

        let resolver = DenomResolver::new(&querier, &registry);
        let result = resolver.unwrap_denom("achain", &denom_a).await;

        assert!(!result.complete);
        assert!(matches!(
            result.failure,
            Some(TraceFailure::Cycle { ref chain }) if chain == "achain"
        ));
        // Both hops taken before the revisit are preserved; no chain
        // appears twice in the hop list.
        assert_eq!(result.hops.len(), 2);
        assert_eq!(result.hops[0].chain, "achain");
        assert_eq!(result.hops[1].chain, "bchain");
    }

    #[tokio::test]
    async fn test_hop_limit_aborts_deep_chain() {
        // a -> b -> c ... with limit 2.
        let registry = registry_with(&[("a", "a-1"), ("b", "b-1"), ("c", "c-1"), ("d", "d-1")]);
        let querier = MockQuerier::new()
            .with_denom_trace("a", "h1", "transfer/channel-1", "ibc/h2")
            .with_topology("a", "channel-1", "channel-9", "b-1")
            .with_denom_trace("b", "h2", "transfer/channel-2", "ibc/h3")
            .with_topology("b", "channel-2", "channel-9", "c-1")
            .with_denom_trace("c", "h3", "transfer/channel-3", "ibc/h4")
            .with_topology("c", "channel-3", "channel-9", "d-1");

        let resolver = DenomResolver::new(&querier, &registry).with_max_hops(2);
        let result = resolver.unwrap_denom("a", "ibc/h1").await;

        assert!(!result.complete);
        assert!(matches!(
            result.failure,
            Some(TraceFailure::HopLimit { limit: 2 })
        ));
        assert_eq!(result.hops.len(), 2);
    }

    #[tokio::test]
    async fn test_trace_lookup_failure_is_incomplete() {
        let registry = registry_with(&[("osmosis", "osmosis-1")]);
        let querier = MockQuerier::new();
        let resolver = DenomResolver::new(&querier, &registry);

        let result = resolver.unwrap_denom("osmosis", "ibc/DEADBEEF").await;
        assert!(!result.complete);
        assert!(matches!(
            result.failure,
            Some(TraceFailure::TraceLookup { .. })
        ));
        assert!(result.hops.is_empty());
        assert_eq!(result.base_denom, "ibc/DEADBEEF");
        assert_eq!(result.origin_chain, "osmosis");
    }

    #[tokio::test]
    async fn test_malformed_trace_path_is_incomplete() {
        let registry = registry_with(&[("osmosis", "osmosis-1")]);
        let querier = MockQuerier::new().with_denom_trace(
            "osmosis",
            "BAD",
            "transfer/channel-0/orphan",
            "uatom",
        );
        let resolver = DenomResolver::new(&querier, &registry);

        let result = resolver.unwrap_denom("osmosis", "ibc/BAD").await;
        assert!(!result.complete);
        assert!(matches!(
            result.failure,
            Some(TraceFailure::MalformedPath { .. })
        ));
    }

    #[tokio::test]
    async fn test_topology_failure_keeps_hop() {
        let registry = registry_with(&[("osmosis", "osmosis-1")]);
        let querier =
            MockQuerier::new().with_denom_trace("osmosis", "X", "transfer/channel-0", "uatom");
        let resolver = DenomResolver::new(&querier, &registry);

        let result = resolver.unwrap_denom("osmosis", "ibc/X").await;
        assert!(!result.complete);
        assert!(matches!(result.failure, Some(TraceFailure::Topology { .. })));
        // The hop onto this chain was identified before resolution failed.
        assert_eq!(result.hops.len(), 1);
    }

    #[tokio::test]
    async fn test_round_trip_wrap_then_unwrap() {
        // Wrap uatom over (transfer, channel-0), unwrap on the far side.
        let wrapped = ibc_denom("transfer", "channel-0", "uatom");
        let hash = wrapped.strip_prefix("ibc/").unwrap();

        let registry = registry_with(&[("cosmoshub", "cosmoshub-4"), ("osmosis", "osmosis-1")]);
        let querier = MockQuerier::new()
            .with_denom_trace("osmosis", hash, "transfer/channel-0", "uatom")
            .with_topology("osmosis", "channel-0", "channel-141", "cosmoshub-4");

        let resolver = DenomResolver::new(&querier, &registry);
        let result = resolver.unwrap_denom("osmosis", &wrapped).await;

        assert_eq!(
            result,
            UnwrapResult {
                base_denom: "uatom".to_string(),
                origin_chain: "cosmoshub".to_string(),
                hops: vec![Hop {
                    chain: "osmosis".to_string(),
                    port: "transfer".to_string(),
                    channel: "channel-0".to_string(),
                }],
                complete: true,
                failure: None,
            }
        );
    }
}
