//! # USDCBALL Keeper
//!
//! Off-chain keeper for the USDCBALL treasury program on Solana. On a fixed
//! interval it reads the treasury, converts accumulated SOL fees to USDC, and
//! spends the converted USDC on token buybacks and liquidity provisioning
//! within the allocation ratios and limits stored on the ledger.
//!
//! ## Architecture
//! - `config`: environment and JSON file configuration
//! - `onchain_instance`: treasury account decoding, ledger reads and writes
//! - `services`: Jupiter swap engine and liquidity pool client
//! - `keeper`: allocation math, executors, observability, and the control loop
//! - `server` / `routes`: optional read-only health server
//!
//! ## Environment Setup
//! ```bash
//! cp .env.example .env
//! # Set KEEPER_PRIVATE_KEY, TOKEN_MINT, POOL_USDC_ACCOUNT, POOL_TOKEN_ACCOUNT
//! ```
//!
//! ## Running
//! ```bash
//! DRY_RUN=true cargo run           # simulate against a synthetic treasury
//! cargo run -- status              # print one snapshot and the next budgets
//! cargo run -- update-config - 600 -
//! ```

mod bootstrap;
mod command;
mod config;
mod error;
mod keeper;
mod onchain_instance;
mod routes;
mod server;
mod services;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::command::Command;
use crate::config::Config;
use crate::keeper::Shutdown;
use crate::server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .compact(),
        )
        .init();

    tracing::info!("🏁 Starting USDCBALL keeper...");
    tracing::info!("📦 Package: {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let config = Config::from_env().context("Failed to load configuration")?;
    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(e.into());
    }
    tracing::info!("🌐 Cluster: {}", config.solana.cluster.url());
    tracing::info!("⚙️  Mode: {:?}", config.mode);

    let command = Command::parse(std::env::args().skip(1))?;
    if command.is_mutating() && config.mode.is_simulated() {
        bail!("{:?} submits a transaction and is unavailable in dry-run mode", command);
    }

    let runtime = bootstrap::build(&config)?;

    match command {
        Command::Run => {}
        Command::Status => {
            let report = command::status(&config, runtime.reader.as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }
        other => {
            let signature = command::execute(other, runtime.ledger.as_ref()).await?;
            println!("{}", signature);
            return Ok(());
        }
    }

    let mut keeper = runtime.keeper;
    let reconciled = tokio::select! {
        result = keeper.reconcile_on_startup(&config.allocations) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    match reconciled {
        Some(result) => {
            result.context("Startup reconciliation with the ledger failed")?;
        }
        None => {
            tracing::info!("🛑 Shutdown requested before the keeper started");
            return Ok(());
        }
    }

    let shutdown = Shutdown::new();

    let server = config.http_port.map(|port| {
        let state = Arc::new(AppState { observer: runtime.observer.clone(), mode: config.mode });
        let rx = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = server::start(port, state, rx).await {
                tracing::error!("{:#}", e);
            }
        })
    });

    let rx = shutdown.subscribe();
    let loop_task = tokio::spawn(async move {
        keeper.run(rx).await;
        keeper
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
    }
    tracing::info!("🛑 Shutdown requested, finishing current cycle");
    shutdown.trigger();
    let keeper = loop_task.await.context("Keeper task panicked")?;

    if let Some(server) = server {
        let _ = server.await;
    }
    tracing::info!("👋 Keeper stopped (phase: {})", keeper.phase());
    Ok(())
}
