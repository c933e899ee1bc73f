//! Block identity, validation and application

use crate::config::ChainParams;
use crate::economic::{block_reward, total_fees};
use crate::mempool::Mempool;
use crate::merkle;
use crate::pow::{check_proof_of_work, header_hash, next_bits};
use crate::transaction::{verify_transaction, TxVerdict};
use crate::types::*;
use crate::utxo::{BlockStaging, UtxoSet};
use std::collections::HashSet;

impl Block {
    pub fn hash(&self) -> Hash {
        header_hash(&self.header)
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }

    pub fn tx_ids(&self) -> Vec<Hash> {
        self.transactions.iter().map(Transaction::id).collect()
    }
}

/// Merkle root over the ids of `txs`, all zeros for an empty list
pub fn merkle_root_of(txs: &[Transaction]) -> Hash {
    let ids: Vec<Hash> = txs.iter().map(Transaction::id).collect();
    merkle::root(&ids).unwrap_or([0u8; 32])
}

/// Accepted blocks of one peer, genesis first, with their hashes cached
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chain {
    blocks: Vec<Block>,
    hashes: Vec<Hash>,
}

impl Chain {
    pub fn new(genesis: Block) -> Self {
        let mut chain = Self::default();
        chain.push(genesis);
        chain
    }

    pub fn push(&mut self, block: Block) {
        self.hashes.push(block.hash());
        self.blocks.push(block);
    }

    pub fn pop(&mut self) -> Option<Block> {
        self.hashes.pop();
        self.blocks.pop()
    }

    /// Height of the tip; genesis is height 0
    pub fn height(&self) -> Natural {
        self.blocks.len().saturating_sub(1) as Natural
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn tip(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn tip_hash(&self) -> Option<Hash> {
        self.hashes.last().copied()
    }

    pub fn get(&self, height: usize) -> Option<&Block> {
        self.blocks.get(height)
    }

    /// Height of the block with `hash`, searching from the tip
    pub fn position_of(&self, hash: &Hash) -> Option<usize> {
        self.hashes.iter().rposition(|h| h == hash)
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.position_of(hash).is_some()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Headers of blocks 0..height
    pub fn headers_before(&self, height: usize) -> Vec<BlockHeader> {
        self.blocks[..height.min(self.blocks.len())]
            .iter()
            .map(|b| b.header.clone())
            .collect()
    }

    /// Height and index of the block containing transaction `tx_id`
    pub fn locate_transaction(&self, tx_id: &Hash) -> Option<(usize, usize)> {
        self.blocks.iter().enumerate().rev().find_map(|(height, block)| {
            block
                .transactions
                .iter()
                .position(|tx| &tx.id() == tx_id)
                .map(|index| (height, index))
        })
    }
}

/// CheckBlock: ℬ → {valid, invalid}
///
/// Context-free checks:
/// 1. txs is non-empty, txs[0] is the only coinbase
/// 2. hash(header) < target(bits)
/// 3. No pointer is spent twice across the block
/// 4. header.merkle_root equals the root recomputed over the tx ids
pub fn check_block(block: &Block) -> ValidationResult {
    // 1. Shape
    match block.coinbase() {
        None => return ValidationResult::Invalid("Block has no transactions".to_string()),
        Some(coinbase) if !coinbase.is_coinbase() => {
            return ValidationResult::Invalid("First transaction must be coinbase".to_string())
        }
        Some(_) => {}
    }
    if block.transactions[1..].iter().any(Transaction::is_coinbase) {
        return ValidationResult::Invalid("Coinbase after the first position".to_string());
    }

    // 2. Proof of work
    if !check_proof_of_work(&block.header) {
        return ValidationResult::Invalid(format!(
            "Hash {} does not meet {} bits",
            hex::encode(&block.hash()[..8]),
            block.header.bits
        ));
    }

    // 3. Duplicate spends
    let mut spent = HashSet::new();
    for tx in &block.transactions[1..] {
        for pointer in tx.spent_pointers() {
            if !spent.insert(pointer) {
                return ValidationResult::Invalid(format!("{} spent twice in block", pointer));
            }
        }
    }

    // 4. Merkle root
    if merkle_root_of(&block.transactions) != block.header.merkle_root {
        return ValidationResult::Invalid("Merkle root mismatch".to_string());
    }

    ValidationResult::Valid
}

/// CheckBlockContext: ℬ × ℕ × ℋ* × 𝒰𝒮 → {valid, invalid}
///
/// For block b at `height` on top of `prefix`:
/// 1. b.bits equals the required difficulty for `height`
/// 2. coinbase value = BlockReward(height) + Σ fee(tx), tx ∈ txs[1:]
/// 3. Each non-coinbase tx verifies against the confirmed records plus the outputs
///    of earlier txs in b, with a pool local to b
pub fn check_block_context(
    block: &Block,
    height: Natural,
    prefix: &[BlockHeader],
    utxo_set: &UtxoSet,
    params: &ChainParams,
) -> ValidationResult {
    // 1. Difficulty
    let required = next_bits(prefix, params);
    if block.header.bits != required {
        return ValidationResult::Invalid(format!(
            "Block bits {} but {} required at height {}",
            block.header.bits, required, height
        ));
    }

    // 2. Coinbase value
    let coinbase = match block.coinbase() {
        Some(cb) => cb,
        None => return ValidationResult::Invalid("Block has no transactions".to_string()),
    };
    let expected = block_reward(height, params).saturating_add(total_fees(&block.transactions[1..]));
    if coinbase.total_output() != Some(expected) {
        return ValidationResult::Invalid(format!(
            "Coinbase pays {:?}, expected {}",
            coinbase.total_output(),
            expected
        ));
    }

    // 3. Transactions
    let mut staging = BlockStaging::new(utxo_set);
    let mut scratch = Mempool::new();
    staging.stage(coinbase);
    for (i, tx) in block.transactions.iter().enumerate().skip(1) {
        match verify_transaction(tx, &staging, &scratch) {
            TxVerdict::Valid => {}
            TxVerdict::Invalid(reason) => {
                return ValidationResult::Invalid(format!("Transaction {}: {}", i, reason))
            }
            TxVerdict::Orphan => {
                return ValidationResult::Invalid(format!("Transaction {} spends an unknown output", i))
            }
        }
        staging.stage(tx);
        scratch.insert(tx.clone());
    }

    ValidationResult::Valid
}

/// ApplyTransaction: 𝒯𝒳 × 𝒰𝒮 → 𝒰𝒮
///
/// 1. Remove every record tx spends
/// 2. Add tx's outputs as confirmed records, or confirm records that already exist
///    while keeping their unspent flag
pub fn apply_transaction(tx: &Transaction, utxo_set: &mut UtxoSet) {
    for pointer in tx.spent_pointers() {
        utxo_set.remove(&pointer);
    }

    let is_coinbase = tx.is_coinbase();
    for (pointer, output) in tx.output_pointers() {
        if !utxo_set.replace_with(&pointer, |r| r.with_confirmed(true)) {
            utxo_set.insert(UnspentRecord::new(output.clone(), pointer, is_coinbase, true));
        }
    }
}

/// Drop a pooled transaction and everything built on it. Its unconfirmed outputs
/// disappear and the records its inputs locked become unspent again.
pub fn evict_with_descendants(id: &Hash, utxo_set: &mut UtxoSet, pool: &mut Mempool) -> Vec<Transaction> {
    let mut doomed = vec![*id];
    doomed.extend(pool.descendants(id));

    let mut evicted = Vec::new();
    for id in doomed.iter().rev() {
        let tx = match pool.remove(id) {
            Some(tx) => tx,
            None => continue,
        };
        for (pointer, _) in tx.output_pointers() {
            if utxo_set.get(&pointer).map(|r| !r.confirmed).unwrap_or(false) {
                utxo_set.remove(&pointer);
            }
        }
        for pointer in tx.spent_pointers() {
            utxo_set.replace_with(&pointer, |r| r.with_unspent(true));
        }
        evicted.push(tx);
    }
    evicted
}

/// ApplyBlock: ℬ × 𝒰𝒮 × 𝒫 → 𝒰𝒮 × 𝒫
///
/// Transaction by transaction:
/// 1. Evict pooled transactions that conflict with tx, and their descendants
/// 2. Apply tx to the UTXO set
/// 3. Remove tx from the pool
///
/// Returns the evicted transactions.
pub fn apply_block(block: &Block, utxo_set: &mut UtxoSet, pool: &mut Mempool) -> Vec<Transaction> {
    let mut evicted = Vec::new();

    for tx in &block.transactions {
        let id = tx.id();

        let conflicts: Vec<Hash> = tx
            .spent_pointers()
            .filter_map(|p| pool.spender(&p).copied())
            .filter(|spender| spender != &id)
            .collect();
        for conflict in conflicts {
            evicted.extend(evict_with_descendants(&conflict, utxo_set, pool));
        }

        apply_transaction(tx, utxo_set);
        pool.remove(&id);
    }

    evicted
}
