//! Driver binary
//!
//! Loads the TOML configuration, wires simulated venues and the
//! configured strategies into an execution core, runs until SIGINT and
//! shuts down in order: strategies, dispatcher, venues. Exit code 0 on a
//! clean shutdown, 1 on any unhandled core fault.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use common::config::AppConfig;
use engine::{ExecutionCore, SimVenue, VenueAdapter};
use numerics::CpuBackend;
use rand::Rng;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strategies::{
    MarketMaker, MarketMakerConfig, PairConfig, StatArbConfig, StatArbitrage, StrategyHandle,
    StrategyManager, TrendFollower, TrendFollowerConfig,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "quantra")]
#[command(about = "Multi-venue trading execution core")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short, default_value = "quantra.toml")]
    config: PathBuf,

    /// Log filter, e.g. "info" or "engine=debug"
    #[arg(long, default_value = "info")]
    log: String,

    /// Drive the simulated venues with a random-walk feed
    #[arg(long, default_value_t = true)]
    sim_feed: bool,
}

const KNOWN_SECTIONS: &[&str] = &["exchanges", "risk", "strategies", "dispatcher"];

fn load_config(path: &PathBuf) -> Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    let value: toml::Value = text.parse().context("config is not valid TOML")?;
    if let Some(table) = value.as_table() {
        for key in table.keys() {
            if !KNOWN_SECTIONS.contains(&key.as_str()) {
                warn!(key = %key, "unknown config section ignored");
            }
        }
    }
    value.try_into().context("config does not match the schema")
}

fn build_strategy(
    name: &str,
    settings: &common::config::StrategySettings,
    core: &Arc<ExecutionCore>,
) -> Option<StrategyHandle> {
    let symbol = settings.symbols.first().cloned();
    let venue = settings.venues.first().cloned();

    let logic: Box<dyn strategies::StrategyLogic> = if name.contains("maker") {
        let (symbol, venue) = (symbol?, venue?);
        Box::new(MarketMaker::new(
            MarketMakerConfig::from_settings(settings),
            symbol,
            venue,
        ))
    } else if name.contains("trend") {
        let (symbol, venue) = (symbol?, venue?);
        Box::new(TrendFollower::new(
            TrendFollowerConfig::from_settings(settings),
            symbol,
            venue,
            Arc::new(CpuBackend::new()),
        ))
    } else if name.contains("arb") {
        if settings.symbols.len() < 2 {
            warn!(strategy = %name, "pair strategy needs two symbols");
            return None;
        }
        let venue = venue?;
        let pair = PairConfig {
            id: name.to_string(),
            symbol_a: settings.symbols[0].clone(),
            symbol_b: settings.symbols[1].clone(),
            venue,
        };
        Box::new(StatArbitrage::new(
            StatArbConfig::from_settings(settings),
            vec![pair],
        ))
    } else {
        warn!(strategy = %name, "unknown strategy kind, skipped");
        return None;
    };

    Some(StrategyHandle::new(name, settings.clone(), core, logic))
}

fn spawn_sim_feed(
    venues: Vec<(Arc<SimVenue>, Vec<String>)>,
    running: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("sim-feed".to_string())
        .spawn(move || {
            let mut rng = rand::thread_rng();
            let mut prices: Vec<Vec<f64>> = venues
                .iter()
                .map(|(_, symbols)| symbols.iter().map(|_| 50_000.0).collect())
                .collect();
            while running.load(Ordering::Acquire) {
                for (vi, (venue, symbols)) in venues.iter().enumerate() {
                    for (si, symbol) in symbols.iter().enumerate() {
                        let price = &mut prices[vi][si];
                        *price *= 1.0 + rng.gen_range(-0.0005..0.0005);
                        let half_spread = *price * 0.0002;
                        venue.push_tick(symbol, *price, *price - half_spread, *price + half_spread);
                    }
                }
                std::thread::sleep(Duration::from_millis(100));
            }
        })
        .expect("spawn sim feed")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&cli.log))
        .with_target(true)
        .init();

    let config = load_config(&cli.config)?;
    info!(venues = config.exchanges.len(), strategies = config.strategies.len(), "configuration loaded");

    let core = ExecutionCore::new(&config.dispatcher, config.risk.clone());

    let mut sim_venues = Vec::new();
    for name in config.exchanges.keys() {
        let venue = Arc::new(SimVenue::new(name.clone(), 100_000.0));
        core.register_venue(venue.clone());
        sim_venues.push(venue);
    }

    let manager = StrategyManager::new();
    for (name, settings) in &config.strategies {
        if let Some(handle) = build_strategy(name, settings, &core) {
            manager.register(handle);
        }
    }

    core.start()?;
    manager.start_all();

    // Symbols each simulated venue should tick: the union demanded by the
    // strategies configured for it
    let feed_running = Arc::new(AtomicBool::new(true));
    let feed = if cli.sim_feed {
        let mut plan = Vec::new();
        for venue in &sim_venues {
            let mut symbols: Vec<String> = config
                .strategies
                .values()
                .filter(|s| s.venues.iter().any(|v| v == venue.name()))
                .flat_map(|s| s.symbols.iter().cloned())
                .collect();
            symbols.sort();
            symbols.dedup();
            if !symbols.is_empty() {
                plan.push((venue.clone(), symbols));
            }
        }
        (!plan.is_empty()).then(|| spawn_sim_feed(plan, feed_running.clone()))
    } else {
        None
    };

    info!("running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("signal handler")?;
    info!("shutting down");

    feed_running.store(false, Ordering::Release);
    if let Some(handle) = feed {
        let _ = handle.join();
    }
    manager.stop_all();
    core.stop();

    let stats = core.dispatcher_stats();
    info!(
        published = stats.published,
        delivered = stats.delivered,
        dropped = stats.dropped_full,
        "shutdown complete"
    );
    Ok(())
}
