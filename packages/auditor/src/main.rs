mod cli;
mod config;
mod orchestrator;
mod report;

use std::sync::Arc;

use clap::Parser;
use eyre::Result;
use tokio_util::sync::CancellationToken;

use ibctrace_rs::{ChainRegistry, MetadataCache, MultiEndpointClient};

use cli::{Cli, Command};
use config::Config;
use orchestrator::{AuditRequest, AuditSettings, Orchestrator};

fn main() -> Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    let exit_code = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())?;
    std::process::exit(exit_code);
}

async fn async_main() -> Result<i32> {
    init_logging();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    tracing::debug!(?config, "Configuration loaded");

    // One cancel token for everything; SIGINT/SIGTERM trip it.
    let cancel = CancellationToken::new();
    tokio::spawn(trip_cancel_on_signal(cancel.clone()));

    match cli.command {
        Command::Audit {
            primary,
            secondary,
            channel_id,
            mode,
            reverse,
            transport,
            json,
        } => {
            let registry = Arc::new(ChainRegistry::load(&config.data_dir)?);
            let cache = Arc::new(MetadataCache::new(config.metadata_cache_config()));
            let querier = Arc::new(MultiEndpointClient::new(
                config.query_client_config(transport),
                cache,
                cancel.clone(),
            )?);

            let mode = match (mode, &channel_id) {
                (Some(mode), _) => mode,
                // A bare channel id implies manual mode.
                (None, Some(_)) => orchestrator::AuditMode::Manual,
                (None, None) => config.default_mode(),
            };

            let request = AuditRequest {
                primary,
                secondary,
                mode,
                channel_id,
                reverse,
            };
            let settings = AuditSettings {
                escrow_port: config.audit.escrow_port.clone(),
                ..AuditSettings::default()
            };

            let orchestrator =
                Orchestrator::new(querier.clone(), registry, settings, cancel.clone());
            let report = orchestrator.run(&request).await?;
            querier.shutdown().await;

            if json {
                println!("{}", report.to_json()?);
            } else {
                print!("{}", report.render_text());
            }
            Ok(report.exit_code())
        }

        Command::UpdateChains => {
            let registry = ChainRegistry::load(&config.data_dir)?;
            if registry.is_empty() {
                tracing::warn!(
                    dir = %config.data_dir.display(),
                    "Registry store is empty; populate it with the registry mirror first"
                );
                return Ok(3);
            }
            registry.touch_last_update(chrono::Utc::now())?;
            println!(
                "{} chain(s), {} channel pair(s) validated in {}",
                registry.len(),
                registry.channel_pair_count(),
                config.data_dir.display()
            );
            Ok(0)
        }

        Command::Status => {
            let registry = ChainRegistry::load(&config.data_dir)?;
            let cache = MetadataCache::new(config.metadata_cache_config());

            println!("registry: {}", config.data_dir.display());
            println!("  chains:        {}", registry.len());
            println!("  channel pairs: {}", registry.channel_pair_count());
            match registry.last_update() {
                Some(at) => println!("  last update:   {}", at.to_rfc3339()),
                None => println!("  last update:   never"),
            }

            let versions = cache.all_versions().await;
            println!("cached versions: {}", versions.len());
            let mut entries: Vec<_> = versions.values().collect();
            entries.sort_by(|a, b| a.chain_id.cmp(&b.chain_id));
            for probe in entries {
                println!(
                    "  {:<24} app_version={} checked={}",
                    probe.chain_id,
                    probe.app_version,
                    probe.last_checked_at.to_rfc3339()
                );
            }
            Ok(0)
        }
    }
}

/// Initialize tracing/logging with structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,auditor=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

/// Trip the audit-wide cancel token on the first shutdown signal.
///
/// Cancellation is cooperative: in-flight transport attempts abort at
/// their next await point and unfinished tokens land in the report as
/// errored, so a second signal is never needed.
async fn trip_cancel_on_signal(cancel: CancellationToken) {
    let signal_name = next_shutdown_signal().await;
    tracing::info!(signal = signal_name, "Cancelling audit");
    cancel.cancel();
}

async fn next_shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => "interrupt",
                    _ = term.recv() => "terminate",
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, watching SIGINT only");
                let _ = tokio::signal::ctrl_c().await;
                "interrupt"
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "interrupt"
    }
}
