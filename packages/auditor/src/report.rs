//! Audit results and the report surface.
//!
//! One `AuditResult` per `(chain, channel, denom)` tuple, never mutated
//! after it is produced. The report preserves escrow-enumeration order and
//! its worst status drives the process exit code.

use serde::Serialize;

use ibctrace_rs::types::Hop;

/// Per-token audit outcome, ordered from best to worst. The discriminant
/// order doubles as the exit-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Balanced,
    Discrepancy,
    Incomplete,
    Errored,
}

impl AuditStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            AuditStatus::Balanced => 0,
            AuditStatus::Discrepancy => 1,
            AuditStatus::Incomplete => 2,
            AuditStatus::Errored => 3,
        }
    }
}

/// Reconciliation outcome for one token in one escrow account.
#[derive(Debug, Clone, Serialize)]
pub struct AuditResult {
    /// Chain whose escrow was inspected.
    pub chain: String,
    pub escrow_address: String,
    pub denom: String,
    pub escrow_balance: u128,
    /// Outstanding supply of the wrapped form on the counterparty; absent
    /// when the supply query failed (no value is fabricated).
    pub counterparty_supply: Option<u128>,
    /// `escrow_balance - counterparty_supply`; zero when supply is absent.
    pub discrepancy: i128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hops: Vec<Hop>,
    pub complete: bool,
    pub status: AuditStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl AuditResult {
    /// Classify an outcome: hard errors dominate, then incomplete traces,
    /// then the balance comparison. `Balanced` requires a complete trace,
    /// a present supply, zero discrepancy, and no errors.
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate(
        chain: String,
        escrow_address: String,
        denom: String,
        escrow_balance: u128,
        counterparty_supply: Option<u128>,
        origin: Option<String>,
        hops: Vec<Hop>,
        complete: bool,
        errors: Vec<String>,
    ) -> Self {
        let discrepancy = match counterparty_supply {
            Some(supply) => escrow_balance as i128 - supply as i128,
            None => 0,
        };

        let status = if !errors.is_empty() || counterparty_supply.is_none() {
            AuditStatus::Errored
        } else if !complete {
            AuditStatus::Incomplete
        } else if discrepancy != 0 {
            AuditStatus::Discrepancy
        } else {
            AuditStatus::Balanced
        };

        Self {
            chain,
            escrow_address,
            denom,
            escrow_balance,
            counterparty_supply,
            discrepancy,
            origin,
            hops,
            complete,
            status,
            errors,
        }
    }

    /// A result for a token that could not be audited at all.
    pub fn errored(
        chain: String,
        escrow_address: String,
        denom: String,
        escrow_balance: u128,
        reason: String,
    ) -> Self {
        Self::evaluate(
            chain,
            escrow_address,
            denom,
            escrow_balance,
            None,
            None,
            Vec::new(),
            false,
            vec![reason],
        )
    }
}

/// The full audit report: primary-direction results first, reverse second,
/// each preserving escrow-enumeration order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub results: Vec<AuditResult>,
}

impl AuditReport {
    pub fn new(results: Vec<AuditResult>) -> Self {
        Self { results }
    }

    /// Worst per-token status; empty reports count as errored.
    pub fn worst_status(&self) -> AuditStatus {
        self.results
            .iter()
            .map(|r| r.status)
            .max()
            .unwrap_or(AuditStatus::Errored)
    }

    pub fn exit_code(&self) -> i32 {
        self.worst_status().exit_code()
    }

    pub fn to_json(&self) -> eyre::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Plain-text rendering, one block per token.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for result in &self.results {
            out.push_str(&format!(
                "{:?}  {} {} in escrow {}\n",
                result.status, result.chain, result.denom, result.escrow_address
            ));
            out.push_str(&format!("  escrow balance:      {}\n", result.escrow_balance));
            match result.counterparty_supply {
                Some(supply) => {
                    out.push_str(&format!("  counterparty supply: {supply}\n"));
                    out.push_str(&format!("  discrepancy:         {}\n", result.discrepancy));
                }
                None => out.push_str("  counterparty supply: unavailable\n"),
            }
            if let Some(origin) = &result.origin {
                out.push_str(&format!(
                    "  origin:              {} ({})\n",
                    origin,
                    if result.complete { "complete" } else { "incomplete" }
                ));
            }
            if !result.hops.is_empty() {
                let path: Vec<String> = result.hops.iter().map(|h| h.to_string()).collect();
                out.push_str(&format!("  hops:                {}\n", path.join(" -> ")));
            }
            for error in &result.errors {
                out.push_str(&format!("  error:               {error}\n"));
            }
        }
        out.push_str(&format!(
            "{} token(s) audited, worst status: {:?}\n",
            self.results.len(),
            self.worst_status()
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(
        supply: Option<u128>,
        balance: u128,
        complete: bool,
        errors: Vec<String>,
    ) -> AuditResult {
        AuditResult::evaluate(
            "cosmoshub".to_string(),
            "cosmos1escrow".to_string(),
            "uatom".to_string(),
            balance,
            supply,
            None,
            Vec::new(),
            complete,
            errors,
        )
    }

    #[test]
    fn test_balanced_implies_zero_discrepancy() {
        // Every Balanced result carries a zero discrepancy.
        let result = result_with(Some(1_000_000), 1_000_000, true, vec![]);
        assert_eq!(result.status, AuditStatus::Balanced);
        assert_eq!(result.discrepancy, 0);
    }

    #[test]
    fn test_discrepancy_classification() {
        let result = result_with(Some(900_000), 1_000_000, true, vec![]);
        assert_eq!(result.status, AuditStatus::Discrepancy);
        assert_eq!(result.discrepancy, 100_000);

        // Over-collateralized the other way: supply exceeds escrow.
        let result = result_with(Some(1_100_000), 1_000_000, true, vec![]);
        assert_eq!(result.status, AuditStatus::Discrepancy);
        assert_eq!(result.discrepancy, -100_000);
    }

    #[test]
    fn test_incomplete_trace_dominates_balance() {
        let result = result_with(Some(1_000_000), 1_000_000, false, vec![]);
        assert_eq!(result.status, AuditStatus::Incomplete);
    }

    #[test]
    fn test_missing_supply_is_errored_not_zero_filled() {
        let result = result_with(None, 1_000_000, true, vec![]);
        assert_eq!(result.status, AuditStatus::Errored);
        // The raw escrow value is kept and no discrepancy is fabricated.
        assert_eq!(result.escrow_balance, 1_000_000);
        assert_eq!(result.discrepancy, 0);
        assert_eq!(result.counterparty_supply, None);
    }

    #[test]
    fn test_errors_dominate_everything() {
        let result = result_with(Some(0), 0, true, vec!["boom".to_string()]);
        assert_eq!(result.status, AuditStatus::Errored);
    }

    #[test]
    fn test_worst_status_and_exit_codes() {
        let report = AuditReport::new(vec![
            result_with(Some(5), 5, true, vec![]),
            result_with(Some(4), 5, true, vec![]),
        ]);
        assert_eq!(report.worst_status(), AuditStatus::Discrepancy);
        assert_eq!(report.exit_code(), 1);

        let report = AuditReport::new(vec![
            result_with(Some(5), 5, true, vec![]),
            result_with(Some(5), 5, false, vec![]),
            result_with(Some(4), 5, true, vec![]),
        ]);
        assert_eq!(report.exit_code(), 2);

        let report = AuditReport::new(vec![
            result_with(Some(5), 5, true, vec![]),
            result_with(None, 5, true, vec![]),
        ]);
        assert_eq!(report.exit_code(), 3);

        let report = AuditReport::new(vec![result_with(Some(5), 5, true, vec![])]);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_render_text_lists_every_token() {
        let report = AuditReport::new(vec![
            result_with(Some(5), 5, true, vec![]),
            result_with(None, 7, true, vec![]),
        ]);
        let text = report.render_text();
        assert!(text.contains("Balanced"));
        assert!(text.contains("unavailable"));
        assert!(text.contains("2 token(s) audited"));
    }

    #[test]
    fn test_json_round_trips_statuses() {
        let report = AuditReport::new(vec![result_with(Some(5), 5, true, vec![])]);
        let json = report.to_json().unwrap();
        assert!(json.contains("\"status\": \"balanced\""));
    }
}
