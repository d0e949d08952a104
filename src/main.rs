//! # CRM Sync Main Entry Point
//!
//! `serve` runs the API and the scheduler, `migrate` applies migrations and
//! `sync <kind>` runs one sweep and exits.

use anyhow::Context;
use clap::{Parser, Subcommand};
use crm_sync::{
    config::ConfigLoader,
    db,
    migration::{Migrator, MigratorTrait},
    scheduler::{Sweep, Trigger},
    server::{AppState, run_server},
    telemetry,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "crm-sync", version, about = "CRM synchronization service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API and the background scheduler (default)
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
    /// Run one sweep and exit
    Sync {
        #[arg(value_enum)]
        kind: Sweep,
        /// Lead pull only: number of recent leads to fetch
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from layered env files and variables
    let config = ConfigLoader::new().load()?;
    telemetry::init_tracing(&config)?;

    info!(profile = %config.profile, "configuration loaded");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "effective configuration");
    }

    let db = db::init_pool(&config).await?;
    Migrator::up(&db, None)
        .await
        .context("failed to apply database migrations")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let shutdown = CancellationToken::new();
            tokio::spawn(cancel_on_signal(shutdown.clone()));
            run_server(config, db, shutdown).await
        }
        Command::Migrate => {
            info!("migrations applied");
            Ok(())
        }
        Command::Sync { kind, limit } => {
            let state = AppState::new(config, db)?;
            let outcome = state.runner.run(kind, Trigger::Manual, limit).await?;
            info!(
                sweep = kind.as_str(),
                synced = outcome.synced,
                errors = outcome.errors,
                "sweep finished"
            );
            println!("{}", serde_json::to_string(&outcome)?);
            Ok(())
        }
    }
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
    shutdown.cancel();
}
