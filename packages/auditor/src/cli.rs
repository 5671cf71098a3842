use clap::{Parser, Subcommand};

use ibctrace_rs::client::TransportPreference;

use crate::orchestrator::AuditMode;

fn parse_mode(s: &str) -> Result<AuditMode, String> {
    s.parse()
}

fn parse_transport(s: &str) -> Result<TransportPreference, String> {
    s.parse()
}

/// IBC escrow conservation auditor: verifies that tokens locked on one chain
/// match the wrapped supply on its counterparty.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Root of the registry data store.
    #[arg(long, env = "AUDITOR_DATA_DIR", help_heading = "Store")]
    pub data_dir: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Audit the escrow conservation invariant between two chains.
    Audit {
        /// Chain whose escrow account is inspected first.
        primary: String,

        /// Counterparty chain.
        secondary: String,

        /// Explicit channel id on the primary chain (manual mode).
        channel_id: Option<String>,

        /// Audit mode.
        #[arg(long, env = "AUDIT_DEFAULT_MODE", value_parser = parse_mode)]
        mode: Option<AuditMode>,

        /// Also audit the reverse direction.
        #[arg(long)]
        reverse: bool,

        /// Transport selection for chain queries.
        #[arg(long, value_parser = parse_transport)]
        transport: Option<TransportPreference>,

        /// Emit the report as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Re-validate the local registry store and refresh its sync marker.
    /// Downloading the registry mirror itself is an external concern.
    UpdateChains,

    /// Show registry and cache state.
    Status,
}
