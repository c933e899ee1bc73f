//! Single-level fork choice, block connection and rollback

use crate::block::{apply_block, evict_with_descendants, Chain};
use crate::mempool::{retry_orphans, Mempool, OrphanPool, PoolJournal};
use crate::pow::U256;
use crate::types::*;
use crate::utxo::{UtxoJournal, UtxoSet};

/// Where an incoming block fits relative to the local chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Parent unknown
    Orphan,
    /// Parent is the tip
    Extend,
    /// Parent is the tip's parent
    Compete,
    /// Parent is deeper in the chain
    Reject(String),
}

/// Result of delivering a block to a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    Extended,
    Reorganized,
    Orphaned,
    Rejected(String),
}

impl BlockOutcome {
    /// True if the block is now the peer's tip
    pub fn is_accepted(&self) -> bool {
        matches!(self, BlockOutcome::Extended | BlockOutcome::Reorganized)
    }
}

/// Classify block b with parent hash P against a chain of height H
///
/// 1. P unknown: Orphan
/// 2. P = hash(chain[H]): Extend
/// 3. P = hash(chain[H-1]): Compete
/// 4. Otherwise: Reject
pub fn classify(block: &Block, chain: &Chain) -> Placement {
    let parent = &block.header.prev_hash;
    let height = chain.height() as usize;

    match chain.position_of(parent) {
        None => Placement::Orphan,
        Some(p) if p == height => Placement::Extend,
        Some(p) if p + 1 == height => Placement::Compete,
        Some(p) => Placement::Reject(format!(
            "Fork at height {} is deeper than one block below tip {}",
            p + 1,
            height
        )),
    }
}

/// A competitor replaces the tip only with a numerically smaller hash
pub fn should_reorganize(competitor: &Hash, tip: &Hash) -> bool {
    U256::from_be_bytes(*competitor) < U256::from_be_bytes(*tip)
}

/// Everything needed to take the tip block back off
#[derive(Debug, Clone)]
pub struct UndoRecord {
    pub block_hash: Hash,
    pub utxo: UtxoJournal,
    pub pool: PoolJournal,
    pub orphans_before: OrphanPool,
    pub evicted: Vec<Transaction>,
    pub adopted: Vec<Hash>,
}

/// ConnectBlock: ℬ × 𝒰𝒮 × 𝒫 → 𝒰𝒮 × 𝒫 × undo
///
/// 1. Open journals on the UTXO set and pool
/// 2. Apply the block (spends, new records, pool removal, conflict eviction)
/// 3. Drop the block's transactions from the orphan pool
/// 4. Retry orphan transactions against the new state
/// 5. Close the journals into an undo record
pub fn connect_block(
    block: &Block,
    utxo_set: &mut UtxoSet,
    pool: &mut Mempool,
    orphans: &mut OrphanPool,
    allow_unconfirmed_spend: bool,
) -> UndoRecord {
    let orphans_before = orphans.clone();
    utxo_set.begin_journal();
    pool.begin_journal();

    let evicted = apply_block(block, utxo_set, pool);
    for tx in &block.transactions {
        orphans.remove(&tx.id());
    }
    let adopted = retry_orphans(utxo_set, pool, orphans, allow_unconfirmed_spend);

    UndoRecord {
        block_hash: block.hash(),
        utxo: utxo_set.take_journal(),
        pool: pool.take_journal(),
        orphans_before,
        evicted,
        adopted,
    }
}

/// DisconnectBlock: undo × 𝒰𝒮 × 𝒫 → 𝒰𝒮 × 𝒫
///
/// 1. Every record and pool entry the block touched gets its exact prior value back
/// 2. The orphan pool returns to its state before the block, keeping orphans that
///    arrived after it
/// 3. The pool is resettled on the restored records
///
/// Returns the pooled transactions dropped in step 3.
pub fn disconnect_block(
    undo: UndoRecord,
    utxo_set: &mut UtxoSet,
    pool: &mut Mempool,
    orphans: &mut OrphanPool,
) -> Vec<Transaction> {
    utxo_set.restore(undo.utxo);
    pool.restore(undo.pool);

    let arrived = orphans.take_all();
    *orphans = undo.orphans_before;
    for tx in arrived {
        orphans.insert(tx);
    }

    resettle_pool(utxo_set, pool)
}

/// Walk the pool in arrival order. A transaction whose inputs all resolve keeps them
/// soft-locked; any other is evicted with its descendants.
pub fn resettle_pool(utxo_set: &mut UtxoSet, pool: &mut Mempool) -> Vec<Transaction> {
    let pooled: Vec<Transaction> = pool.transactions().into_iter().cloned().collect();
    let mut dropped = Vec::new();

    for tx in pooled {
        let id = tx.id();
        if !pool.contains(&id) {
            continue;
        }
        if tx.spent_pointers().all(|p| utxo_set.contains(&p)) {
            for pointer in tx.spent_pointers() {
                utxo_set.replace_with(&pointer, |r| r.with_unspent(false));
            }
        } else {
            dropped.extend(evict_with_descendants(&id, utxo_set, pool));
        }
    }

    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::merkle_root_of;
    use crate::transaction::create_coinbase;

    fn block_on(prev_hash: Hash, tag: &str, height: u64) -> Block {
        let txs = vec![create_coinbase(tag, 500, height)];
        Block {
            header: BlockHeader {
                version: 0,
                prev_hash,
                merkle_root: merkle_root_of(&txs),
                timestamp: height,
                bits: 0,
                nonce: 0,
            },
            transactions: txs,
        }
    }

    #[test]
    fn test_classify() {
        let genesis = block_on([0; 32], "g", 0);
        let mut chain = Chain::new(genesis.clone());
        let b1 = block_on(genesis.hash(), "a", 1);

        assert_eq!(classify(&b1, &chain), Placement::Extend);
        assert_eq!(classify(&block_on([5; 32], "x", 1), &chain), Placement::Orphan);

        chain.push(b1.clone());
        assert_eq!(classify(&block_on(genesis.hash(), "b", 1), &chain), Placement::Compete);
        assert_eq!(classify(&block_on(b1.hash(), "c", 2), &chain), Placement::Extend);

        chain.push(block_on(b1.hash(), "c", 2));
        assert!(matches!(classify(&block_on(genesis.hash(), "d", 1), &chain), Placement::Reject(_)));
    }

    #[test]
    fn test_should_reorganize_prefers_smaller_hash() {
        let mut small = [0xff; 32];
        small[0] = 0x00;
        assert!(should_reorganize(&small, &[0xff; 32]));
        assert!(!should_reorganize(&[0xff; 32], &small));
        assert!(!should_reorganize(&small, &small));
    }

    #[test]
    fn test_connect_then_disconnect_restores_state() {
        let mut utxo = UtxoSet::new();
        utxo.insert(UnspentRecord::new(TxOutput::new("a", 10), SpendPointer::new([1; 32], 0), false, true));
        let mut pool = Mempool::new();
        let mut orphans = OrphanPool::new();
        let (utxo_before, pool_before) = (utxo.clone(), pool.clone());

        let block = block_on([0; 32], "m", 1);
        let undo = connect_block(&block, &mut utxo, &mut pool, &mut orphans, true);
        assert_eq!(undo.block_hash, block.hash());
        assert_eq!(utxo.len(), 2);

        disconnect_block(undo, &mut utxo, &mut pool, &mut orphans);
        assert_eq!(utxo, utxo_before);
        assert_eq!(pool, pool_before);
    }

    #[test]
    fn test_disconnect_drops_spenders_of_removed_outputs() {
        let mut utxo = UtxoSet::new();
        let mut pool = Mempool::new();
        let mut orphans = OrphanPool::new();

        let block = block_on([0; 32], "m", 1);
        let undo = connect_block(&block, &mut utxo, &mut pool, &mut orphans, true);

        // Spends the block's coinbase, admitted after the block connected
        let reward = SpendPointer::new(block.transactions[0].id(), 0);
        let child = Transaction {
            inputs: vec![TxInput { spends: Some(reward), signature: vec![1], pubkey: None }],
            outputs: vec![TxOutput::new("b", 400)],
            fee: 10,
            lock_time: 0,
        };
        utxo.replace_with(&reward, |r| r.with_unspent(false));
        utxo.insert(UnspentRecord::new(child.outputs[0].clone(), SpendPointer::new(child.id(), 0), false, false));
        pool.insert(child.clone());

        let late_orphan = Transaction {
            inputs: vec![TxInput { spends: Some(SpendPointer::new([9; 32], 0)), signature: vec![2], pubkey: None }],
            outputs: vec![TxOutput::new("c", 1)],
            fee: 0,
            lock_time: 0,
        };
        orphans.insert(late_orphan.clone());

        let dropped = disconnect_block(undo, &mut utxo, &mut pool, &mut orphans);
        assert_eq!(dropped, vec![child]);
        assert!(pool.is_empty());
        assert!(utxo.is_empty());
        assert!(orphans.contains(&late_orphan.id()));
    }

    #[test]
    fn test_block_outcome_acceptance() {
        assert!(BlockOutcome::Extended.is_accepted());
        assert!(BlockOutcome::Reorganized.is_accepted());
        assert!(!BlockOutcome::Orphaned.is_accepted());
        assert!(!BlockOutcome::Rejected("late".to_string()).is_accepted());
    }
}
