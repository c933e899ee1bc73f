//! Simulation configuration

use crate::constants::*;
use crate::error::{LedgerError, Result};
use crate::mempool::SelectionPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// How miners choose pool transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionMode {
    #[default]
    TakeAll,
    Random,
}

/// Network-wide simulation settings, loadable from TOML. Missing keys take defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub peer_count: usize,
    pub initial_value: u64,
    pub fee_per_tx: u64,
    pub block_reward: u64,
    pub halving_interval: Option<u64>,
    pub initial_bits: u32,
    pub retarget_interval: u64,
    pub target_block_time_ms: u64,
    pub max_txs_per_block: usize,
    pub tx_selection: SelectionMode,
    pub consensus_lower_fraction: f64,
    pub consensus_upper_fraction: f64,
    pub slow_peer_fraction: f64,
    pub slower_peer_fraction: f64,
    pub deferred_capacity: usize,
    pub allow_unconfirmed_spend: bool,
    pub hash_rate_min: f64,
    pub hash_rate_max: f64,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            peer_count: INIT_NUMBER_OF_PEERS,
            initial_value: INIT_COIN_PER_PEER,
            fee_per_tx: FIX_FEE_PER_TX,
            block_reward: FIX_BLOCK_REWARD,
            halving_interval: None,
            initial_bits: INITIAL_DIFFICULTY_BITS,
            retarget_interval: RETARGET_INTERVAL,
            target_block_time_ms: TARGET_BLOCK_TIME_MS,
            max_txs_per_block: MAX_TX_NUMBER_FOR_MINER,
            tx_selection: SelectionMode::TakeAll,
            consensus_lower_fraction: LOWER_BOUND_OF_CONSENSUS_PEERS,
            consensus_upper_fraction: UPPER_BOUND_OF_CONSENSUS_PEERS,
            slow_peer_fraction: SLOW_PEERS_IN_NETWORK,
            slower_peer_fraction: SLOWER_PEERS_IN_NETWORK,
            deferred_capacity: DEFERRED_QUEUE_CAPACITY,
            allow_unconfirmed_spend: true,
            hash_rate_min: HASH_RATE_MIN,
            hash_rate_max: HASH_RATE_MAX,
            seed: DEFAULT_SEED,
        }
    }
}

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(LedgerError::Config(format!("{} must be within [0, 1], got {}", name, value)));
    }
    Ok(())
}

impl SimConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: SimConfig =
            toml::from_str(source).map_err(|e| LedgerError::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)
            .map_err(|e| LedgerError::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.peer_count == 0 {
            return Err(LedgerError::Config("peer_count must be at least 1".to_string()));
        }

        if self.initial_bits == 0 || self.initial_bits > MAX_BITS {
            return Err(LedgerError::Config(format!(
                "initial_bits must be within [1, {}], got {}",
                MAX_BITS, self.initial_bits
            )));
        }

        if self.max_txs_per_block == 0 {
            return Err(LedgerError::Config("max_txs_per_block must be at least 1".to_string()));
        }

        if self.deferred_capacity == 0 {
            return Err(LedgerError::Config("deferred_capacity must be at least 1".to_string()));
        }

        if self.halving_interval == Some(0) {
            return Err(LedgerError::Config("halving_interval must be positive when set".to_string()));
        }

        check_fraction("consensus_lower_fraction", self.consensus_lower_fraction)?;
        check_fraction("consensus_upper_fraction", self.consensus_upper_fraction)?;
        check_fraction("slow_peer_fraction", self.slow_peer_fraction)?;
        check_fraction("slower_peer_fraction", self.slower_peer_fraction)?;

        if self.consensus_lower_fraction > self.consensus_upper_fraction {
            return Err(LedgerError::Config(
                "consensus_lower_fraction exceeds consensus_upper_fraction".to_string(),
            ));
        }

        if !(self.hash_rate_min > 0.0 && self.hash_rate_min <= self.hash_rate_max) {
            return Err(LedgerError::Config(format!(
                "hash rate range [{}, {}] is empty or not positive",
                self.hash_rate_min, self.hash_rate_max
            )));
        }

        Ok(())
    }

    /// Per-peer ledger rules derived from this configuration
    pub fn chain_params(&self) -> ChainParams {
        let selection = match self.tx_selection {
            SelectionMode::TakeAll => SelectionPolicy::TakeAll,
            SelectionMode::Random => SelectionPolicy::RandomSample { max: self.max_txs_per_block },
        };

        ChainParams {
            fee_per_tx: self.fee_per_tx,
            block_reward: self.block_reward,
            halving_interval: self.halving_interval,
            initial_bits: self.initial_bits,
            retarget_interval: self.retarget_interval,
            target_block_time_ms: self.target_block_time_ms,
            selection,
            allow_unconfirmed_spend: self.allow_unconfirmed_spend,
            deferred_capacity: self.deferred_capacity,
        }
    }
}

/// Ledger rules every peer applies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    pub fee_per_tx: u64,
    pub block_reward: u64,
    pub halving_interval: Option<u64>,
    pub initial_bits: u32,
    pub retarget_interval: u64,
    pub target_block_time_ms: u64,
    pub selection: SelectionPolicy,
    pub allow_unconfirmed_spend: bool,
    pub deferred_capacity: usize,
}

impl Default for ChainParams {
    fn default() -> Self {
        SimConfig::default().chain_params()
    }
}
