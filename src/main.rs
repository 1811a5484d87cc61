#![allow(dead_code)]

mod api;
mod client;
mod config;
mod db;
mod demand;
mod error;
mod fees;
mod model;
mod rebalance;
mod scheduler;
mod state;

use clap::{Parser, Subcommand};
use config::Config;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

use crate::client::LndClient;
use crate::model::ChannelId;

#[derive(Parser)]
#[command(name = "lndwarden", about = "Rebalancing and fee control daemon for LND")]
struct Cli {
    /// Path to lndwarden.toml config file
    #[arg(short, long, default_value = "lndwarden.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as a background daemon (default)
    Daemon,
    /// Execute a single control cycle and exit
    RunOnce,
    /// Plan (and optionally execute) one rebalance between two channels
    Rebalance {
        /// Channel to take liquidity from (decimal or HHHxTTTxO)
        #[arg(long)]
        source: String,
        /// Channel to push liquidity into
        #[arg(long)]
        target: String,
        /// Amount in satoshis
        #[arg(long)]
        amount: u64,
        /// Actually execute; without this flag the plan is only reported
        #[arg(long)]
        reckless: bool,
    },
    /// Propose fee adjustments (and optionally apply them)
    Fees {
        /// Assign bootstrap policies to channels without forwarding history
        #[arg(long)]
        init: bool,
        /// Apply the proposed adjustments instead of only reporting them
        #[arg(long)]
        apply: bool,
    },
    /// Print history counters from the database
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;

    // Initialize logging
    let log_level = config.general.log_level.clone();
    env_logger::Builder::new()
        .filter_level(log_level.parse().unwrap_or(log::LevelFilter::Info))
        .format_timestamp_secs()
        .init();

    info!("lndwarden v{} starting", env!("CARGO_PKG_VERSION"));

    if config.general.dry_run {
        warn!("DRY-RUN MODE: No policy updates or payments will be executed");
    }
    if !config.general.enabled {
        warn!("Master switch is OFF -- exiting");
        return Ok(());
    }

    let config = Arc::new(config);

    let client = client::LndRestClient::new(&config)?;
    let db = db::Database::open(&config.general.database_path)?;

    match cli.command.unwrap_or(Commands::Daemon) {
        Commands::Daemon => run_daemon(config, client, db).await,
        Commands::RunOnce => run_once(config, client, db).await,
        Commands::Rebalance {
            source,
            target,
            amount,
            reckless,
        } => run_rebalance(&config, &client, &db, &source, &target, amount, reckless).await,
        Commands::Fees { init, apply } => run_fees(&config, &client, &db, init, apply).await,
        Commands::Status => print_status(db),
    }
}

async fn run_daemon(
    config: Arc<Config>,
    client: impl LndClient,
    db: db::Database,
) -> anyhow::Result<()> {
    // Startup connectivity check
    info!("Verifying LND connectivity...");
    match client.get_info().await {
        Ok(info) => {
            info!("Connected to LND node: {}", info.identity_pubkey);
            if !info.synced_to_graph {
                warn!("Node is not synced to graph yet; routes may be stale");
            }
        }
        Err(e) => {
            error!("Cannot reach LND: {}. Aborting.", e);
            return Err(e);
        }
    }

    // Shutdown signal
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        info!("Received shutdown signal, finishing current cycle...");
        let _ = shutdown_tx.send(true);
    });

    let mut sched = scheduler::Scheduler::new(&config);
    let interval = std::time::Duration::from_secs(config.general.loop_interval_secs);

    info!(
        "Entering main loop (interval: {}s)",
        config.general.loop_interval_secs
    );

    loop {
        if *shutdown_rx.borrow() {
            info!("Shutting down gracefully");
            break;
        }

        if let Err(e) = run_cycle(&config, &client, &db, &sched).await {
            error!("Cycle error: {:#}", e);
        }

        sched.tick();

        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            _ = shutdown_rx.changed() => {
                info!("Shutting down gracefully");
                break;
            }
        }
    }

    Ok(())
}

async fn run_once(
    config: Arc<Config>,
    client: impl LndClient,
    db: db::Database,
) -> anyhow::Result<()> {
    info!("Running single cycle...");
    let sched = scheduler::Scheduler::new_force_all(&config);
    run_cycle(&config, &client, &db, &sched).await?;
    info!("Single cycle complete");
    Ok(())
}

pub async fn run_cycle(
    config: &Config,
    client: &(impl LndClient + Sync),
    db: &db::Database,
    sched: &scheduler::Scheduler,
) -> anyhow::Result<()> {
    // Phase 1: Collect node state
    let node_state = state::NodeState::collect(client).await?;

    // Phase 2: Fee management
    if config.fees.enabled && sched.should_run_fees() {
        if let Err(e) = fees::run(config, client, db, &node_state).await {
            error!("Fee optimization error: {:#}", e);
        }
    }

    // Phase 3: Rebalancing
    if config.rebalance.enabled && sched.should_run_rebalancer() {
        if let Err(e) = rebalance::run(config, client, db, &node_state).await {
            error!("Rebalancer error: {:#}", e);
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_rebalance(
    config: &Config,
    client: &(impl LndClient + Sync),
    db: &db::Database,
    source: &str,
    target: &str,
    amount_sat: u64,
    reckless: bool,
) -> anyhow::Result<()> {
    let source: ChannelId = source
        .parse()
        .map_err(|e| anyhow::anyhow!("bad source channel: {e}"))?;
    let target: ChannelId = target
        .parse()
        .map_err(|e| anyhow::anyhow!("bad target channel: {e}"))?;

    let node_state = state::NodeState::collect(client).await?;
    let (plan, estimate) = rebalance::plan(&node_state, source, target, amount_sat, &config.rebalance)?;

    info!(
        "Plan: move {} sat {} -> {}, estimated fee {} msat over {} hops (rate {:.6})",
        plan.amount_sat,
        plan.source,
        plan.target,
        estimate.total_fee_msat,
        estimate.hops.len(),
        estimate.fee_rate(),
    );

    let outcome = rebalance::executor::execute(
        client,
        &node_state.graph,
        node_state.block_height,
        &plan,
        reckless,
    )
    .await?;

    info!(
        "Outcome: {} -- {} sat moved, {} msat fees, {} attempts",
        outcome.status.as_str(),
        outcome.amount_moved_sat,
        outcome.fee_paid_msat,
        outcome.attempts,
    );

    if outcome.status != rebalance::executor::RebalanceStatus::Planned {
        let hops: Vec<u64> = outcome.hops.iter().map(|c| c.0).collect();
        db.record_rebalance(
            plan.source.0,
            plan.target.0,
            outcome.amount_moved_sat,
            outcome.fee_paid_msat,
            outcome.attempts,
            outcome.status.as_str(),
            &serde_json::to_string(&hops)?,
            chrono::Utc::now().timestamp(),
        )?;
    }
    Ok(())
}

async fn run_fees(
    config: &Config,
    client: &(impl LndClient + Sync),
    db: &db::Database,
    init: bool,
    apply: bool,
) -> anyhow::Result<()> {
    let node_state = state::NodeState::collect(client).await?;
    let adjustments = fees::propose(config, client, &node_state, init).await?;

    if !apply {
        info!(
            "Proposed {} adjustments. Re-run with --apply to set them.",
            adjustments.len()
        );
        return Ok(());
    }

    // --apply is the explicit confirmation; it overrides the dry-run default.
    let mut applied_config = config.clone();
    applied_config.general.dry_run = false;
    fees::apply(&applied_config, client, db, &node_state, &adjustments).await?;
    info!("Applied {} adjustments", adjustments.len());
    Ok(())
}

fn print_status(db: db::Database) -> anyhow::Result<()> {
    let conn = db.conn();

    let fee_updates: i64 = conn
        .query_row("SELECT COUNT(*) FROM fee_history", [], |r| r.get(0))
        .unwrap_or(0);
    let clamped: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM fee_history WHERE clamped = 1",
            [],
            |r| r.get(0),
        )
        .unwrap_or(0);
    let rebalances: i64 = conn
        .query_row("SELECT COUNT(*) FROM rebalance_log", [], |r| r.get(0))
        .unwrap_or(0);
    let moved: i64 = conn
        .query_row(
            "SELECT COALESCE(SUM(amount_moved_sat), 0) FROM rebalance_log",
            [],
            |r| r.get(0),
        )
        .unwrap_or(0);
    let fees_spent: i64 = conn
        .query_row(
            "SELECT COALESCE(SUM(fee_paid_msat), 0) FROM rebalance_log",
            [],
            |r| r.get(0),
        )
        .unwrap_or(0);

    println!("lndwarden status");
    println!("================");
    println!("Fee updates applied:   {}", fee_updates);
    println!("  thereof clamped:     {}", clamped);
    println!("Rebalance runs:        {}", rebalances);
    println!(
        "Liquidity moved:       {} sat for {:.3} sat fees",
        moved,
        fees_spent as f64 / 1000.0
    );

    Ok(())
}
