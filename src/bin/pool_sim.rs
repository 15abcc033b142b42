//! Headless pool simulation runner
//! Runs the engine for a fixed duration (or until Ctrl+C) and prints a JSON summary

use clap::Parser;
use hashpool_sim::{EngineConfig, EngineError, EngineEvent, MiningEngine};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pool_sim")]
#[command(about = "Cooperative mining pool simulation")]
struct Args {
    /// Simulated run time in seconds (0 runs until Ctrl+C)
    #[arg(short, long, default_value = "300")]
    duration: u64,

    /// JSON configuration file; missing fields take defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Number of synthetic competing miners
    #[arg(short = 'm', long)]
    active_miners: Option<u32>,

    /// Mine as the player, restarting whenever the battery is full again
    #[arg(long)]
    mine: bool,

    /// Seconds between status lines
    #[arg(long, default_value = "10")]
    report_interval: u64,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(true)
        .init();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    if let Some(miners) = args.active_miners {
        config = config.with_active_miners(miners);
    }

    info!("Pool simulation");
    info!("  Synthetic miners: {}", config.active_miners);
    info!("  Target block time: {}s", config.target_block_time_secs);
    info!("  Initial difficulty: {:.2}", config.initial_difficulty);
    info!("  Player mining: {}", args.mine);

    let engine = MiningEngine::new(config)?;
    let mut events = engine.subscribe();

    let event_logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::BlockSettled {
                    number,
                    winner,
                    personal_reward,
                    strategy,
                }) => {
                    info!(
                        "Block #{} found by {} ({:?}), your reward {:.2}",
                        number, winner, strategy, personal_reward
                    );
                }
                Ok(EngineEvent::DifficultyChanged { old, new, reason, .. }) => {
                    info!("Difficulty {} -> {}: {}", old, new, reason);
                }
                Ok(EngineEvent::EnergyDepleted) => warn!("Energy depleted"),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event logger lagged, skipped {} events", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    engine.launch();
    if args.mine {
        engine.start().await?;
    }

    let run = async {
        let mut report = tokio::time::interval(Duration::from_secs(args.report_interval.max(1)));
        report.tick().await;
        loop {
            report.tick().await;

            let stats = engine.pool_stats().await;
            let energy = engine.energy().await;
            let balance = engine.balance_stats().await;
            info!(
                "Block {} | {:.1}% | {:.0} H/s | difficulty {} | energy {:.1}% | balance {:.2}",
                stats.current_block_number,
                stats.progress_percent,
                stats.pool_hash_rate,
                stats.difficulty,
                energy.percentage,
                balance.current_balance
            );

            if args.mine && !engine.is_mining().await && energy.percentage >= 100.0 {
                match engine.start().await {
                    Ok(_) => info!("Battery full, mining resumed"),
                    Err(EngineError::InsufficientEnergy { .. }) => {}
                    Err(e) => error!("Failed to resume mining: {}", e),
                }
            }
        }
    };

    if args.duration == 0 {
        tokio::select! {
            _ = run => {}
            _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        }
    } else {
        tokio::select! {
            _ = run => {}
            _ = tokio::time::sleep(Duration::from_secs(args.duration)) => info!("Run complete"),
            _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        }
    }

    engine.shutdown().await;
    event_logger.abort();

    let summary = json!({
        "pool": engine.pool_stats().await,
        "balance": engine.balance_stats().await,
        "upgrades": engine.upgrade_info().await,
        "difficulty": engine.difficulty_stats().await,
        "blocks": engine.block_history().await.len(),
        "leaderboard": engine.top_participants(10).await,
        "network": engine.network_stats().await?,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
