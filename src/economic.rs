//! Block reward and fee accounting

use crate::config::ChainParams;
use crate::constants::*;
use crate::types::*;

/// BlockReward: ℕ → ℕ
///
/// Reward for the block at `height`.
/// Without a halving interval the reward is flat. With one, it halves every
/// `halving_interval` blocks and becomes 0 after MAX_HALVINGS halvings.
pub fn block_reward(height: Natural, params: &ChainParams) -> u64 {
    let halvings = match params.halving_interval {
        Some(interval) if interval > 0 => height / interval,
        _ => 0,
    };

    if halvings >= MAX_HALVINGS {
        return 0;
    }

    params.block_reward >> halvings
}

/// TotalSupply: ℕ → ℕ
///
/// Sum of all block rewards from height 1 through `height`. Genesis funding is not a reward.
pub fn total_supply(height: Natural, params: &ChainParams) -> u64 {
    (1..=height).fold(0u64, |total, h| total.saturating_add(block_reward(h, params)))
}

/// Σ declared fee over the non-coinbase transactions
pub fn total_fees<'a>(txs: impl IntoIterator<Item = &'a Transaction>) -> u64 {
    txs.into_iter()
        .filter(|tx| !tx.is_coinbase())
        .fold(0u64, |total, tx| total.saturating_add(tx.fee))
}
