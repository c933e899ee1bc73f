//! simchain CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;
use simchain::config::SimConfig;
use simchain::network::Network;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "simchain")]
#[command(about = "Simulate a proof-of-work UTXO network in one process", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Consensus rounds to run
    #[arg(long, default_value_t = 5)]
    rounds: usize,

    /// Override the number of peers
    #[arg(long)]
    peers: Option<usize>,

    /// Override the RNG seed
    #[arg(long)]
    seed: Option<u64>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SimConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => SimConfig::default(),
    };
    if let Some(peers) = cli.peers {
        config.peer_count = peers;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }

    let mut network = Network::genesis(config).context("creating genesis")?;

    for round in 1..=cli.rounds {
        let sent = network.make_random_transactions();
        let report = network
            .run_consensus_round()
            .with_context(|| format!("consensus round {}", round))?;
        info!(
            round,
            transactions = sent,
            winner = report.winner,
            height = report.height,
            duration_ms = report.duration_ms,
            "Round complete"
        );
    }

    let summary = network.summary();
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("height: {}", summary.height);
        println!("tip:    {}", summary.tip);
        println!("time:   {} ms over {} rounds", summary.time_ms, summary.rounds);
        for peer in &summary.peers {
            println!(
                "peer {:>3}  height {:>4}  balance {:>8}  confirmed {:>8}  mempool {:>3}{}",
                peer.id,
                peer.height,
                peer.balance,
                peer.confirmed_balance,
                peer.mempool,
                if peer.online { "" } else { "  (offline)" }
            );
        }
    }

    Ok(())
}
