//! Audit orchestration.
//!
//! Drives the registry, query client, topology resolver, and denom resolver
//! through the three audit modes. Per-token reconciliations fan out over a
//! bounded worker pool; hops within one token stay sequential because each
//! depends on the previous. Per-token failures never abort the audit: they
//! land on the token's result and the remaining tokens proceed.

use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use ibctrace_rs::client::ChainQuerier;
use ibctrace_rs::denom::{self, is_ibc_denom};
use ibctrace_rs::error::AuditError;
use ibctrace_rs::registry::ChainRegistry;
use ibctrace_rs::topology::TopologyResolver;
use ibctrace_rs::trace::DenomResolver;
use ibctrace_rs::types::{ChainInfo, CoinBalance, CounterpartyInfo};

use crate::report::{AuditReport, AuditResult};

// ============================================================================
// Request Surface
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuditMode {
    /// Audit only the native staking token of each chain.
    #[default]
    Quick,
    /// Audit every balance held in the escrow account.
    Comprehensive,
    /// Quick steps against a user-supplied channel id.
    Manual,
}

impl FromStr for AuditMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quick" => Ok(AuditMode::Quick),
            "comprehensive" => Ok(AuditMode::Comprehensive),
            "manual" => Ok(AuditMode::Manual),
            other => Err(format!(
                "unknown mode {other:?} (quick|comprehensive|manual)"
            )),
        }
    }
}

impl std::fmt::Display for AuditMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditMode::Quick => write!(f, "quick"),
            AuditMode::Comprehensive => write!(f, "comprehensive"),
            AuditMode::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditRequest {
    pub primary: String,
    pub secondary: String,
    pub mode: AuditMode,
    /// Explicit channel id (manual mode).
    pub channel_id: Option<String>,
    pub reverse: bool,
}

#[derive(Debug, Clone)]
pub struct AuditSettings {
    /// Port id of the transfer module.
    pub escrow_port: String,
    /// Upper bound on concurrent token reconciliations.
    pub max_workers: usize,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            escrow_port: "transfer".to_string(),
            max_workers: 8,
        }
    }
}

/// Audit lifecycle, advanced once per direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuditPhase {
    Init,
    ResolvingChains,
    EnumeratingBalances,
    PerTokenLoop,
    Reporting,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct Orchestrator {
    querier: Arc<dyn ChainQuerier>,
    registry: Arc<ChainRegistry>,
    settings: AuditSettings,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        querier: Arc<dyn ChainQuerier>,
        registry: Arc<ChainRegistry>,
        settings: AuditSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            querier,
            registry,
            settings,
            cancel,
        }
    }

    fn enter_phase(&self, phase: AuditPhase) {
        tracing::debug!(?phase, "Audit phase");
    }

    /// Run a full audit: primary direction first, reverse second when
    /// requested. Fatal errors (unknown chain, missing native token,
    /// cancellation before any work) abort; everything else degrades to
    /// per-token statuses.
    pub async fn run(&self, request: &AuditRequest) -> Result<AuditReport, AuditError> {
        self.enter_phase(AuditPhase::Init);
        tracing::info!(
            primary = %request.primary,
            secondary = %request.secondary,
            mode = %request.mode,
            reverse = request.reverse,
            "Starting audit"
        );

        self.enter_phase(AuditPhase::ResolvingChains);
        let primary = self.registry.get(&request.primary)?.clone();
        let secondary = self.registry.get(&request.secondary)?.clone();

        let (mut results, forward_counterparty) = self
            .audit_direction(
                &primary,
                &secondary,
                request.mode,
                request.channel_id.as_deref(),
            )
            .await?;

        if request.reverse {
            // The reverse pass always runs on the channel the forward pass
            // resolved from on-chain topology. The registry pair file is a
            // fallback for when that resolution failed, and is otherwise
            // only cross-checked.
            let reverse_channel = forward_counterparty
                .as_ref()
                .map(|cp| cp.channel_id.clone());
            match &reverse_channel {
                Some(live) => {
                    if let Some(side) = self
                        .registry
                        .channel_pairs(&primary.chain_name, &secondary.chain_name)
                        .and_then(|pair| pair.transfer_channel_for(&secondary.chain_name))
                    {
                        if side.channel_id != *live {
                            tracing::warn!(
                                chain = %secondary.chain_name,
                                registry = %side.channel_id,
                                live = %live,
                                "Registry channel pair disagrees with live topology for reverse pass"
                            );
                        }
                    }
                }
                None => tracing::warn!(
                    chain = %secondary.chain_name,
                    "Forward counterparty unresolved; reverse pass falls back to the registry channel"
                ),
            }
            let (reverse_results, _) = self
                .audit_direction(&secondary, &primary, request.mode, reverse_channel.as_deref())
                .await?;
            results.extend(reverse_results);
        }

        self.enter_phase(AuditPhase::Reporting);
        Ok(AuditReport::new(results))
    }

    /// Audit one direction: tokens locked on `chain_a` against supply on
    /// `chain_b`. Returns the per-token results in escrow-enumeration order
    /// plus the live-resolved counterparty, when resolution succeeded.
    async fn audit_direction(
        &self,
        chain_a: &ChainInfo,
        chain_b: &ChainInfo,
        mode: AuditMode,
        manual_channel: Option<&str>,
    ) -> Result<(Vec<AuditResult>, Option<CounterpartyInfo>), AuditError> {
        let port = self.settings.escrow_port.clone();

        let Some(channel_a) = self.channel_for_direction(chain_a, chain_b, manual_channel) else {
            tracing::warn!(
                chain = %chain_a.chain_name,
                counterparty = %chain_b.chain_name,
                "No channel known for direction"
            );
            let denom = chain_a.native_denom().unwrap_or("unknown").to_string();
            return Ok((
                vec![AuditResult::errored(
                    chain_a.chain_name.clone(),
                    String::new(),
                    denom,
                    0,
                    format!(
                        "no channel known between {} and {}; pass one explicitly",
                        chain_a.chain_name, chain_b.chain_name
                    ),
                )],
                None,
            ));
        };

        let escrow = self.escrow_address(chain_a, &channel_a).await?;
        tracing::info!(
            chain = %chain_a.chain_name,
            channel = %channel_a,
            escrow = %escrow,
            "Auditing escrow account"
        );

        self.enter_phase(AuditPhase::EnumeratingBalances);
        let tokens = match mode {
            AuditMode::Quick | AuditMode::Manual => {
                let native = chain_a
                    .native_denom()
                    .ok_or_else(|| AuditError::NoNativeToken(chain_a.chain_name.clone()))?
                    .to_string();
                match self.querier.bank_balance(chain_a, &escrow, &native).await {
                    Ok(coin) => vec![CoinBalance {
                        denom: native,
                        amount: coin.amount,
                    }],
                    Err(e) => {
                        return Ok((
                            vec![AuditResult::errored(
                                chain_a.chain_name.clone(),
                                escrow,
                                native,
                                0,
                                format!("escrow balance query failed: {e}"),
                            )],
                            None,
                        ));
                    }
                }
            }
            AuditMode::Comprehensive => {
                match self.querier.bank_all_balances(chain_a, &escrow).await {
                    Ok(balances) => balances,
                    Err(e) => {
                        let denom = chain_a.native_denom().unwrap_or("unknown").to_string();
                        return Ok((
                            vec![AuditResult::errored(
                                chain_a.chain_name.clone(),
                                escrow,
                                denom,
                                0,
                                format!("escrow enumeration failed: {e}"),
                            )],
                            None,
                        ));
                    }
                }
            }
        };

        // The counterparty channel for native reconciliation comes from
        // on-chain topology; a registry channel-pair file is only
        // cross-checked.
        let topology = TopologyResolver::new(&*self.querier, &self.registry);
        let counterparty = match topology
            .resolve_counterparty(chain_a, &port, &channel_a)
            .await
        {
            Ok(cp) => {
                if cp.chain_name != chain_b.chain_name {
                    tracing::warn!(
                        chain = %chain_a.chain_name,
                        channel = %channel_a,
                        resolved = %cp.chain_name,
                        requested = %chain_b.chain_name,
                        "Channel counterparty does not match requested chain"
                    );
                }
                if let Some(pair) = self
                    .registry
                    .channel_pairs(&chain_a.chain_name, &chain_b.chain_name)
                {
                    if let Some(side) = pair.transfer_channel_for(&chain_b.chain_name) {
                        if side.channel_id != cp.channel_id {
                            tracing::warn!(
                                registry = %side.channel_id,
                                live = %cp.channel_id,
                                "Registry channel pair disagrees with live topology"
                            );
                        }
                    }
                }
                Some(cp)
            }
            Err(e) => {
                tracing::warn!(
                    chain = %chain_a.chain_name,
                    channel = %channel_a,
                    error = %e,
                    "Counterparty resolution failed"
                );
                None
            }
        };

        self.enter_phase(AuditPhase::PerTokenLoop);
        let results = self
            .reconcile_tokens(chain_a, chain_b, &escrow, tokens, &counterparty)
            .await;

        Ok((results, counterparty))
    }

    /// Fan per-token reconciliations out over a bounded pool, preserving
    /// escrow-enumeration order in the returned list.
    async fn reconcile_tokens(
        &self,
        chain_a: &ChainInfo,
        chain_b: &ChainInfo,
        escrow: &str,
        tokens: Vec<CoinBalance>,
        counterparty: &Option<CounterpartyInfo>,
    ) -> Vec<AuditResult> {
        if tokens.is_empty() {
            tracing::info!(chain = %chain_a.chain_name, "Escrow account holds no tokens");
            return Vec::new();
        }

        let workers = self.settings.max_workers.min(tokens.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut join_set: JoinSet<(usize, AuditResult)> = JoinSet::new();

        for (index, coin) in tokens.iter().enumerate() {
            let querier = Arc::clone(&self.querier);
            let registry = Arc::clone(&self.registry);
            let semaphore = Arc::clone(&semaphore);
            let cancel = self.cancel.clone();
            let chain_a = chain_a.clone();
            let chain_b = chain_b.clone();
            let escrow = escrow.to_string();
            let port = self.settings.escrow_port.clone();
            let coin = coin.clone();
            let counterparty = counterparty.clone();

            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("worker semaphore is never closed");
                if cancel.is_cancelled() {
                    return (
                        index,
                        AuditResult::errored(
                            chain_a.chain_name.clone(),
                            escrow,
                            coin.denom,
                            coin.amount,
                            "cancelled".to_string(),
                        ),
                    );
                }

                let result = if is_ibc_denom(&coin.denom) {
                    reconcile_wrapped_token(
                        &*querier, &registry, &chain_a, &escrow, &coin,
                    )
                    .await
                } else {
                    reconcile_native_token(
                        &*querier,
                        &chain_a,
                        &chain_b,
                        &escrow,
                        &port,
                        &coin,
                        &counterparty,
                    )
                    .await
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<AuditResult>> = (0..tokens.len()).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => tracing::error!(error = %e, "Token reconciliation task failed"),
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    let coin = &tokens[index];
                    AuditResult::errored(
                        chain_a.chain_name.clone(),
                        escrow.to_string(),
                        coin.denom.clone(),
                        coin.amount,
                        "reconciliation task aborted".to_string(),
                    )
                })
            })
            .collect()
    }

    /// The channel on `chain_a`'s side: an explicit override, else the
    /// registry channel-pair file.
    fn channel_for_direction(
        &self,
        chain_a: &ChainInfo,
        chain_b: &ChainInfo,
        manual_channel: Option<&str>,
    ) -> Option<String> {
        if let Some(channel) = manual_channel {
            return Some(channel.to_string());
        }
        self.registry
            .channel_pairs(&chain_a.chain_name, &chain_b.chain_name)
            .and_then(|pair| pair.transfer_channel_for(&chain_a.chain_name))
            .map(|side| side.channel_id.clone())
    }

    /// The escrow account for `channel` on `chain`: live query preferred,
    /// local domain-separated derivation when unavailable.
    async fn escrow_address(
        &self,
        chain: &ChainInfo,
        channel: &str,
    ) -> Result<String, AuditError> {
        let port = &self.settings.escrow_port;
        match self.querier.ibc_escrow_address(chain, port, channel).await {
            Ok(address) if !address.is_empty() => Ok(address),
            Ok(_) | Err(_) => {
                tracing::debug!(
                    chain = %chain.chain_name,
                    channel,
                    "Escrow address query unavailable, deriving locally"
                );
                denom::escrow_address(&chain.bech32_prefix, port, channel)
                    .map_err(|e| AuditError::Store(e.to_string()))
            }
        }
    }
}

// ============================================================================
// Per-Token Reconciliation
// ============================================================================

/// Native token locked on `chain_a`: compare against the supply of its
/// wrapped form on the counterparty.
async fn reconcile_native_token(
    querier: &dyn ChainQuerier,
    chain_a: &ChainInfo,
    chain_b: &ChainInfo,
    escrow: &str,
    port: &str,
    coin: &CoinBalance,
    counterparty: &Option<CounterpartyInfo>,
) -> AuditResult {
    let Some(cp) = counterparty else {
        return AuditResult::errored(
            chain_a.chain_name.clone(),
            escrow.to_string(),
            coin.denom.clone(),
            coin.amount,
            "counterparty channel unresolved".to_string(),
        );
    };

    let wrapped = denom::ibc_denom(port, &cp.channel_id, &coin.denom);
    let (supply, errors) = match querier.bank_supply_of(chain_b, &wrapped).await {
        Ok(supply) => (Some(supply.amount), Vec::new()),
        Err(e) => {
            tracing::warn!(
                chain = %chain_b.chain_name,
                denom = %wrapped,
                error = %e,
                "Counterparty supply unavailable"
            );
            (None, vec![format!("counterparty supply unavailable: {e}")])
        }
    };

    // A native token has no hops: it is already at its origin.
    AuditResult::evaluate(
        chain_a.chain_name.clone(),
        escrow.to_string(),
        coin.denom.clone(),
        coin.amount,
        supply,
        Some(chain_a.chain_name.clone()),
        Vec::new(),
        true,
        errors,
    )
}

/// Wrapped (`ibc/<hash>`) token sitting in `chain_a`'s escrow because of
/// multi-hop routing: compare against the corresponding denom's supply on
/// the chain at the other end of the outermost hop, and attach the full
/// unwrap for the report.
async fn reconcile_wrapped_token(
    querier: &dyn ChainQuerier,
    registry: &ChainRegistry,
    chain_a: &ChainInfo,
    escrow: &str,
    coin: &CoinBalance,
) -> AuditResult {
    let mut errors = Vec::new();

    let unwrap = DenomResolver::new(querier, registry)
        .unwrap_denom(&chain_a.chain_name, &coin.denom)
        .await;

    // The equality check runs against the outermost hop's counterparty and
    // the denom as that chain sees it.
    let supply = match outer_hop_supply(querier, registry, chain_a, coin).await {
        Ok(supply) => Some(supply),
        Err(e) => {
            errors.push(format!("counterparty supply unavailable: {e}"));
            None
        }
    };

    // Context only: the base-denom supply at the origin chain.
    if unwrap.complete {
        if let Ok(origin) = registry.get(&unwrap.origin_chain) {
            match querier.bank_supply_of(origin, &unwrap.base_denom).await {
                Ok(origin_supply) => tracing::debug!(
                    origin = %unwrap.origin_chain,
                    base = %unwrap.base_denom,
                    supply = origin_supply.amount,
                    "Origin supply context"
                ),
                Err(e) => tracing::debug!(
                    origin = %unwrap.origin_chain,
                    error = %e,
                    "Origin supply context unavailable"
                ),
            }
        }
    }

    AuditResult::evaluate(
        chain_a.chain_name.clone(),
        escrow.to_string(),
        coin.denom.clone(),
        coin.amount,
        supply,
        Some(unwrap.origin_chain.clone()),
        unwrap.hops.clone(),
        unwrap.complete,
        errors,
    )
}

/// Supply of the peeled denom on the chain at the other end of the
/// outermost hop of a wrapped token.
async fn outer_hop_supply(
    querier: &dyn ChainQuerier,
    registry: &ChainRegistry,
    chain_a: &ChainInfo,
    coin: &CoinBalance,
) -> Result<u128, AuditError> {
    let hash = denom::ibc_denom_hash(&coin.denom).unwrap_or_default();
    let trace = querier.ibc_denom_trace(chain_a, hash).await?;
    let (port, channel, next_denom) = denom::peel_outer_hop(&trace.path, &trace.base_denom)
        .map_err(|e| AuditError::DecodeError {
            endpoint: "<trace>".to_string(),
            reason: e.to_string(),
        })?;

    let topology = TopologyResolver::new(querier, registry);
    let counterparty = topology
        .resolve_counterparty(chain_a, &port, &channel)
        .await?;
    let counterparty_chain = registry.get(&counterparty.chain_name)?;

    let supply = querier
        .bank_supply_of(counterparty_chain, &next_denom)
        .await?;
    Ok(supply.amount)
}
