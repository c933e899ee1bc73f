//! Candidate block assembly and nonce search

use crate::block::{merkle_root_of, Chain};
use crate::config::ChainParams;
use crate::constants::BLOCK_VERSION;
use crate::economic::{block_reward, total_fees};
use crate::error::{LedgerError, Result};
use crate::mempool::{select_transactions, Mempool};
use crate::pow::{header_hash, meets_target, next_bits};
use crate::transaction::create_coinbase;
use crate::types::*;
use crate::utxo::UtxoSet;
use rand::Rng;

/// Winning nonce of a search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiningOutcome {
    pub nonce: Natural,
    pub attempts: u64,
    pub hash: Hash,
}

/// CreateNewBlock: 𝒞 × 𝒰𝒮 × 𝒫 → ℬ
///
/// For a chain of height H with UTXO set us and pool p:
/// 1. Select pool transactions under the configured policy
/// 2. Create a coinbase paying BlockReward(H+1) + Σ selected fees to the miner
/// 3. Calculate the merkle root over coinbase || selected
/// 4. Header: prev = hash(tip), bits = required bits for H+1, time = now, nonce = 0
pub fn create_new_block<R: Rng + ?Sized>(
    chain: &Chain,
    utxo_set: &UtxoSet,
    pool: &Mempool,
    miner_address: &str,
    now: Natural,
    params: &ChainParams,
    rng: &mut R,
) -> Block {
    let height = chain.len() as Natural;

    // 1. Select transactions
    let selected = select_transactions(pool, utxo_set, params.selection, rng);

    // 2. Coinbase
    let value = block_reward(height, params).saturating_add(total_fees(&selected));
    let mut transactions = vec![create_coinbase(miner_address, value, height)];
    transactions.extend(selected);

    // 3. Merkle root
    let merkle_root = merkle_root_of(&transactions);

    // 4. Header
    let header = BlockHeader {
        version: BLOCK_VERSION,
        prev_hash: chain.tip_hash().unwrap_or([0u8; 32]),
        merkle_root,
        timestamp: now,
        bits: next_bits(&chain.headers_before(chain.len()), params),
        nonce: 0,
    };

    Block { header, transactions }
}

/// Search nonces 0, 1, 2, ... for at most `max_attempts` tries
pub fn mine_bounded(header: &BlockHeader, max_attempts: u64) -> Result<MiningOutcome> {
    let mut candidate = header.clone();
    for attempt in 0..max_attempts {
        candidate.nonce = attempt;
        let hash = header_hash(&candidate);
        if meets_target(&hash, candidate.bits) {
            return Ok(MiningOutcome { nonce: attempt, attempts: attempt + 1, hash });
        }
    }
    Err(LedgerError::ConsensusExhaustion)
}

/// MineBlock: ℋ → ℕ
///
/// Lowest nonce whose header hash meets target(bits). Deterministic for a given
/// header. Fails with ConsensusExhaustion if the whole nonce space misses.
pub fn mine(header: &BlockHeader) -> Result<MiningOutcome> {
    mine_bounded(header, u64::MAX)
}
