//! Peer ledger engine
//!
//! A [`Peer`] exclusively owns its chain, UTXO set, pools and wallet. Every state
//! change goes through `&mut self`; the network hands peers owned copies of
//! transactions and blocks.

use crate::block::{check_block, check_block_context, Chain};
use crate::config::ChainParams;
use crate::error::{LedgerError, Result};
use crate::mempool::{accept_to_memory_pool, retry_orphans, DeferredQueue, Mempool, OrphanPool};
use crate::merkle::{self, MerkleProof};
use crate::mining::{create_new_block, mine, MiningOutcome};
use crate::reorganization::{
    classify, connect_block, disconnect_block, should_reorganize, BlockOutcome, Placement, UndoRecord,
};
use crate::transaction::{signing_message, verify_transaction, TxVerdict};
use crate::types::*;
use crate::utxo::UtxoSet;
use crate::wallet::Wallet;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// What a peer did with a delivered transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reception {
    Accepted,
    Deferred,
    Orphaned,
    Rejected(String),
}

impl From<TxVerdict> for Reception {
    fn from(verdict: TxVerdict) -> Self {
        match verdict {
            TxVerdict::Valid => Reception::Accepted,
            TxVerdict::Orphan => Reception::Orphaned,
            TxVerdict::Invalid(reason) => Reception::Rejected(reason),
        }
    }
}

/// Owned copy of a peer's ledger, used to bootstrap other peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub chain: Chain,
    pub utxo_set: UtxoSet,
    pub mempool: Mempool,
}

pub struct Peer {
    id: usize,
    wallet: Wallet,
    chain: Chain,
    utxo_set: UtxoSet,
    mempool: Mempool,
    orphan_pool: OrphanPool,
    orphan_blocks: BTreeMap<Hash, Block>,
    rejected_blocks: HashSet<Hash>,
    deferred: DeferredQueue,
    candidate: Option<Block>,
    undo: Option<UndoRecord>,
    params: ChainParams,
    rng: StdRng,
    hash_rate: f64,
}

impl Peer {
    /// Peer with one fresh key and an empty ledger
    pub fn new(id: usize, params: ChainParams, seed: u64, hash_rate: f64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut wallet = Wallet::new();
        wallet.generate_key(&mut rng);

        Self {
            id,
            wallet,
            chain: Chain::default(),
            utxo_set: UtxoSet::new(),
            mempool: Mempool::new(),
            orphan_pool: OrphanPool::new(),
            orphan_blocks: BTreeMap::new(),
            rejected_blocks: HashSet::new(),
            deferred: DeferredQueue::new(params.deferred_capacity),
            candidate: None,
            undo: None,
            params,
            rng,
            hash_rate,
        }
    }

    /// Install a pre-validated genesis block. Its outputs become confirmed records.
    pub fn install_genesis(&mut self, genesis: Block) {
        for tx in &genesis.transactions {
            let is_coinbase = tx.is_coinbase();
            for (pointer, output) in tx.output_pointers() {
                self.utxo_set
                    .insert(UnspentRecord::new(output.clone(), pointer, is_coinbase, true));
            }
        }
        self.chain = Chain::new(genesis);
    }

    // ============================================================================
    // ACCESSORS
    // ============================================================================

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn address(&self) -> &str {
        self.wallet.address().unwrap_or_default()
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn height(&self) -> Natural {
        self.chain.height()
    }

    pub fn tip_hash(&self) -> Option<Hash> {
        self.chain.tip_hash()
    }

    pub fn utxo_set(&self) -> &UtxoSet {
        &self.utxo_set
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn orphan_pool(&self) -> &OrphanPool {
        &self.orphan_pool
    }

    pub fn orphan_block_count(&self) -> usize {
        self.orphan_blocks.len()
    }

    pub fn is_rejected(&self, hash: &Hash) -> bool {
        self.rejected_blocks.contains(hash)
    }

    pub fn deferred(&self) -> &DeferredQueue {
        &self.deferred
    }

    pub fn candidate(&self) -> Option<&Block> {
        self.candidate.as_ref()
    }

    pub fn has_undo(&self) -> bool {
        self.undo.is_some()
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn hash_rate(&self) -> f64 {
        self.hash_rate
    }

    // ============================================================================
    // WALLET VIEWS
    // ============================================================================

    /// Unspent records paying to this peer's addresses
    pub fn utxos(&self) -> Vec<UnspentRecord> {
        self.utxo_set
            .records()
            .filter(|r| r.unspent && self.wallet.owns(&r.output.to_address))
            .cloned()
            .collect()
    }

    pub fn confirmed_utxos(&self) -> Vec<UnspentRecord> {
        self.utxos().into_iter().filter(|r| r.confirmed).collect()
    }

    pub fn unconfirmed_utxos(&self) -> Vec<UnspentRecord> {
        self.utxos().into_iter().filter(|r| !r.confirmed).collect()
    }

    pub fn balance(&self) -> u64 {
        self.utxos().iter().map(UnspentRecord::value).sum()
    }

    pub fn confirmed_balance(&self) -> u64 {
        self.confirmed_utxos().iter().map(UnspentRecord::value).sum()
    }

    pub fn unconfirmed_balance(&self) -> u64 {
        self.unconfirmed_utxos().iter().map(UnspentRecord::value).sum()
    }

    // ============================================================================
    // TRANSACTIONS
    // ============================================================================

    /// CreateTransaction: 𝔸 × ℕ → 𝒯𝒳
    ///
    /// 1. Accumulate own spendable records in pointer order until ≥ value + fee
    /// 2. Outputs: [to: value] plus [self: change] when the total exceeds the need
    /// 3. Sign each input over hash(pointer || pubkey || outputs)
    ///
    /// No state changes; InsufficientFunds if the spendable total falls short.
    pub fn create_transaction(&self, to_address: &str, value: u64) -> Result<Transaction> {
        let fee = self.params.fee_per_tx;
        let needed = value
            .checked_add(fee)
            .ok_or(LedgerError::InsufficientFunds { needed: u64::MAX, available: 0 })?;

        let spendable: Vec<UnspentRecord> = self
            .utxos()
            .into_iter()
            .filter(|r| r.confirmed || self.params.allow_unconfirmed_spend)
            .collect();

        let mut chosen = Vec::new();
        let mut total = 0u64;
        for record in &spendable {
            if total >= needed {
                break;
            }
            total = total.saturating_add(record.value());
            chosen.push(record);
        }

        if total < needed {
            return Err(LedgerError::InsufficientFunds { needed, available: total });
        }

        let mut outputs = vec![TxOutput::new(to_address, value)];
        if total > needed {
            outputs.push(TxOutput::new(self.address(), total - needed));
        }

        let mut inputs = Vec::with_capacity(chosen.len());
        for record in chosen {
            let keys = self
                .wallet
                .key_for(&record.output.to_address)
                .ok_or_else(|| LedgerError::UnknownKey(record.output.to_address.clone()))?;
            let pubkey = keys.public_key_bytes().to_vec();
            let message = signing_message(&record.pointer, &pubkey, &outputs);
            let signature = keys.sign(&message)?.to_vec();
            inputs.push(TxInput { spends: Some(record.pointer), signature, pubkey: Some(pubkey) });
        }

        Ok(Transaction { inputs, outputs, fee, lock_time: 0 })
    }

    /// Pure check of `tx` against this peer's UTXO set and pool
    pub fn verify_transaction(&self, tx: &Transaction) -> TxVerdict {
        verify_transaction(tx, &self.utxo_set, &self.mempool)
    }

    fn admit(&mut self, tx: &Transaction) -> TxVerdict {
        let verdict = accept_to_memory_pool(
            tx,
            &mut self.utxo_set,
            &mut self.mempool,
            &mut self.orphan_pool,
            self.params.allow_unconfirmed_spend,
        );

        match &verdict {
            TxVerdict::Valid => {
                let adopted = retry_orphans(
                    &mut self.utxo_set,
                    &mut self.mempool,
                    &mut self.orphan_pool,
                    self.params.allow_unconfirmed_spend,
                );
                if !adopted.is_empty() {
                    debug!(peer = self.id, adopted = adopted.len(), "Adopted orphan transactions");
                }
            }
            TxVerdict::Orphan => {
                debug!(peer = self.id, tx = %hex::encode(&tx.id()[..8]), "Parked orphan transaction");
            }
            TxVerdict::Invalid(reason) => {
                debug!(peer = self.id, tx = %hex::encode(&tx.id()[..8]), reason = %reason, "Rejected transaction");
            }
        }

        verdict
    }

    /// Re-verify and pool every deferred transaction
    pub fn flush_deferred(&mut self) {
        for tx in self.deferred.drain() {
            self.admit(&tx);
        }
    }

    /// The originator's own admission of a transaction it created
    pub fn submit_transaction(&mut self, tx: &Transaction) -> bool {
        self.flush_deferred();
        self.admit(tx).is_valid()
    }

    /// Deliver a transaction. A `delayed` delivery that verifies is parked in the
    /// deferred queue until the next pool interaction.
    pub fn receive_transaction(&mut self, tx: Transaction, delayed: bool) -> Reception {
        self.flush_deferred();

        if !delayed {
            return self.admit(&tx).into();
        }

        match self.verify_transaction(&tx) {
            TxVerdict::Valid => {
                if let Some(evicted) = self.deferred.push(tx) {
                    self.admit(&evicted);
                }
                Reception::Deferred
            }
            _ => self.admit(&tx).into(),
        }
    }

    // ============================================================================
    // BLOCKS
    // ============================================================================

    /// Build the block this peer would mine next
    pub fn create_candidate_block(&mut self, now: Natural) -> Block {
        self.flush_deferred();
        let address = self.address().to_string();
        let block = create_new_block(
            &self.chain,
            &self.utxo_set,
            &self.mempool,
            &address,
            now,
            &self.params,
            &mut self.rng,
        );
        self.candidate = Some(block.clone());
        block
    }

    /// Nonce search over the current candidate
    pub fn mine_candidate(&self) -> Result<MiningOutcome> {
        let candidate = self.candidate.as_ref().ok_or(LedgerError::NoCandidate)?;
        mine(&candidate.header)
    }

    /// The candidate with `nonce` filled in
    pub fn package_block(&self, nonce: Natural) -> Result<Block> {
        let mut block = self.candidate.clone().ok_or(LedgerError::NoCandidate)?;
        block.header.nonce = nonce;
        Ok(block)
    }

    fn already_seen(&self, hash: &Hash) -> bool {
        self.chain.contains(hash) || self.orphan_blocks.contains_key(hash) || self.rejected_blocks.contains(hash)
    }

    fn check_context_at_tip(&self, block: &Block) -> ValidationResult {
        let height = self.chain.len();
        check_block_context(
            block,
            height as Natural,
            &self.chain.headers_before(height),
            &self.utxo_set,
            &self.params,
        )
    }

    /// VerifyBlock: all checks that apply to `block` given where it would attach
    ///
    /// 1. Reject blocks already in the chain, the orphan buffer or the rejected set
    /// 2. Context-free checks: shape, proof of work, duplicate spends, merkle root
    /// 3. Orphan: nothing more. Extend: contextual checks at the tip.
    ///    Compete: contextual checks against a rolled-back copy of the ledger.
    ///    Deeper forks are invalid.
    pub fn verify_block(&self, block: &Block) -> ValidationResult {
        let hash = block.hash();
        if self.already_seen(&hash) {
            return ValidationResult::Invalid("Block already seen".to_string());
        }

        let structure = check_block(block);
        if !structure.is_valid() {
            return structure;
        }

        match classify(block, &self.chain) {
            Placement::Orphan => ValidationResult::Valid,
            Placement::Extend => self.check_context_at_tip(block),
            Placement::Compete => {
                let undo = match &self.undo {
                    Some(undo) => undo.clone(),
                    None => return ValidationResult::Invalid("No undo record for the tip".to_string()),
                };
                let mut utxo_set = self.utxo_set.clone();
                let mut mempool = self.mempool.clone();
                let mut orphans = self.orphan_pool.clone();
                disconnect_block(undo, &mut utxo_set, &mut mempool, &mut orphans);

                let height = self.chain.len() - 1;
                check_block_context(
                    block,
                    height as Natural,
                    &self.chain.headers_before(height),
                    &utxo_set,
                    &self.params,
                )
            }
            Placement::Reject(reason) => ValidationResult::Invalid(reason),
        }
    }

    fn extend(&mut self, block: Block) {
        let undo = connect_block(
            &block,
            &mut self.utxo_set,
            &mut self.mempool,
            &mut self.orphan_pool,
            self.params.allow_unconfirmed_spend,
        );
        if !undo.evicted.is_empty() {
            debug!(peer = self.id, evicted = undo.evicted.len(), "Evicted conflicting transactions");
        }
        self.chain.push(block);
        self.undo = Some(undo);
        self.candidate = None;
    }

    /// Connect buffered blocks whose parent is now the tip
    fn connect_orphan_blocks(&mut self) {
        loop {
            let tip = match self.chain.tip_hash() {
                Some(tip) => tip,
                None => return,
            };
            let next = self
                .orphan_blocks
                .iter()
                .find(|(_, b)| b.header.prev_hash == tip)
                .map(|(hash, _)| *hash);
            let block = match next.and_then(|hash| self.orphan_blocks.remove(&hash)) {
                Some(block) => block,
                None => return,
            };

            match self.verify_block(&block) {
                ValidationResult::Valid => {
                    info!(peer = self.id, height = self.chain.len(), "Connected orphan block");
                    self.extend(block);
                }
                ValidationResult::Invalid(reason) => {
                    debug!(peer = self.id, reason = %reason, "Dropped orphan block");
                    self.rejected_blocks.insert(block.hash());
                }
            }
        }
    }

    /// Deliver a block and run fork choice
    ///
    /// 1. Blocks already seen are rejected outright
    /// 2. verify_block decides validity; an invalid competitor joins the rejected set
    /// 3. Orphans are buffered, extensions connect, competitors go through fork choice
    pub fn receive_block(&mut self, block: Block) -> BlockOutcome {
        self.flush_deferred();

        let hash = block.hash();
        let short = hex::encode(&hash[..8]);
        if self.already_seen(&hash) {
            return BlockOutcome::Rejected("Block already seen".to_string());
        }

        let placement = classify(&block, &self.chain);
        if let ValidationResult::Invalid(reason) = self.verify_block(&block) {
            debug!(peer = self.id, block = %short, reason = %reason, "Rejected block");
            if placement == Placement::Compete {
                self.rejected_blocks.insert(hash);
            }
            return BlockOutcome::Rejected(reason);
        }

        match placement {
            Placement::Orphan => {
                debug!(peer = self.id, block = %short, "Buffered orphan block");
                self.orphan_blocks.insert(hash, block);
                BlockOutcome::Orphaned
            }
            Placement::Extend => {
                self.extend(block);
                info!(peer = self.id, height = self.chain.height(), block = %short, "Extended chain");
                self.connect_orphan_blocks();
                BlockOutcome::Extended
            }
            Placement::Compete => self.compete(block, hash),
            Placement::Reject(reason) => BlockOutcome::Rejected(reason),
        }
    }

    /// A verified competitor replaces the tip only with a smaller hash
    fn compete(&mut self, block: Block, hash: Hash) -> BlockOutcome {
        let short = hex::encode(&hash[..8]);
        let tip_hash = match self.chain.tip_hash() {
            Some(tip) => tip,
            None => return BlockOutcome::Rejected("Empty chain".to_string()),
        };

        if !should_reorganize(&hash, &tip_hash) {
            debug!(peer = self.id, block = %short, "Competing block loses to tip");
            self.rejected_blocks.insert(hash);
            return BlockOutcome::Rejected("Competing block hash is not smaller than tip".to_string());
        }

        if self.rollback().is_none() {
            return BlockOutcome::Rejected("Tip cannot be rolled back".to_string());
        }

        self.rejected_blocks.insert(tip_hash);
        self.extend(block);
        info!(
            peer = self.id,
            height = self.chain.height(),
            block = %short,
            replaced = %hex::encode(&tip_hash[..8]),
            "Reorganized tip"
        );
        self.connect_orphan_blocks();
        BlockOutcome::Reorganized
    }

    /// Rollback: undo the tip block using the single stored undo record.
    /// Returns the removed block.
    pub fn rollback(&mut self) -> Option<Block> {
        let undo = match self.undo.take() {
            Some(undo) => undo,
            None => {
                warn!(peer = self.id, height = self.chain.height(), "Rollback without an undo record");
                return None;
            }
        };

        if self.chain.tip_hash() != Some(undo.block_hash) {
            warn!(peer = self.id, "Undo record does not match the tip");
            return None;
        }

        let dropped = disconnect_block(undo, &mut self.utxo_set, &mut self.mempool, &mut self.orphan_pool);
        if !dropped.is_empty() {
            debug!(peer = self.id, dropped = dropped.len(), "Dropped transactions spending the rolled back block");
        }
        self.candidate = None;
        self.chain.pop()
    }

    /// Height and Merkle path of a confirmed transaction
    pub fn inclusion_proof(&self, tx_id: &Hash) -> Option<(Natural, MerkleProof)> {
        let (height, index) = self.chain.locate_transaction(tx_id)?;
        let block = self.chain.get(height)?;
        let proof = merkle::path(&block.tx_ids(), index)?;
        Some((height as Natural, proof))
    }

    // ============================================================================
    // SNAPSHOTS
    // ============================================================================

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            chain: self.chain.clone(),
            utxo_set: self.utxo_set.clone(),
            mempool: self.mempool.clone(),
        }
    }

    /// Replace the ledger with `snapshot`. Per-peer buffers start empty.
    pub fn restore(&mut self, snapshot: LedgerSnapshot) {
        self.chain = snapshot.chain;
        self.utxo_set = snapshot.utxo_set;
        self.mempool = snapshot.mempool;
        self.orphan_pool = OrphanPool::new();
        self.orphan_blocks.clear();
        self.deferred = DeferredQueue::new(self.params.deferred_capacity);
        self.candidate = None;
        self.undo = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::merkle_root_of;
    use crate::constants::*;

    fn params() -> ChainParams {
        ChainParams { initial_bits: 6, ..ChainParams::default() }
    }

    fn funded_pair() -> (Peer, Peer) {
        let mut alice = Peer::new(0, params(), 100, 1000.0);
        let mut bob = Peer::new(1, params(), 101, 1000.0);
        let funding = Transaction {
            inputs: vec![TxInput::coinbase(GENESIS_MESSAGE.to_vec())],
            outputs: vec![TxOutput::new(alice.address(), 1_000), TxOutput::new(bob.address(), 1_000)],
            fee: 0,
            lock_time: 0,
        };
        let txs = vec![funding];
        let genesis = Block {
            header: BlockHeader {
                version: BLOCK_VERSION,
                prev_hash: [0; 32],
                merkle_root: merkle_root_of(&txs),
                timestamp: 0,
                bits: 0,
                nonce: 0,
            },
            transactions: txs,
        };
        alice.install_genesis(genesis.clone());
        bob.install_genesis(genesis);
        (alice, bob)
    }

    fn mined(peer: &mut Peer, now: Natural) -> Block {
        peer.create_candidate_block(now);
        let outcome = peer.mine_candidate().unwrap();
        peer.package_block(outcome.nonce).unwrap()
    }

    #[test]
    fn test_genesis_balances() {
        let (alice, bob) = funded_pair();
        assert_eq!(alice.confirmed_balance(), 1_000);
        assert_eq!(bob.balance(), 1_000);
        assert_eq!(alice.height(), 0);
    }

    #[test]
    fn test_create_transaction_with_change() {
        let (mut alice, bob) = funded_pair();
        let tx = alice.create_transaction(bob.address(), 100).unwrap();

        assert_eq!(tx.outputs[0], TxOutput::new(bob.address(), 100));
        assert_eq!(tx.outputs[1], TxOutput::new(alice.address(), 890));
        assert!(alice.submit_transaction(&tx));
        assert_eq!(alice.balance(), 890);
        assert_eq!(alice.confirmed_balance(), 0);
        assert_eq!(alice.unconfirmed_balance(), 890);
    }

    #[test]
    fn test_create_transaction_insufficient_funds() {
        let (alice, bob) = funded_pair();
        let err = alice.create_transaction(bob.address(), 995).unwrap_err();
        assert_eq!(err, LedgerError::InsufficientFunds { needed: 1_005, available: 1_000 });
    }

    #[test]
    fn test_duplicate_transaction_rejected() {
        let (mut alice, mut bob) = funded_pair();
        let tx = alice.create_transaction(bob.address(), 10).unwrap();
        assert_eq!(bob.receive_transaction(tx.clone(), false), Reception::Accepted);
        assert!(matches!(bob.receive_transaction(tx, false), Reception::Rejected(_)));
    }

    #[test]
    fn test_deferred_transaction_flushed_on_next_interaction() {
        let (mut alice, mut bob) = funded_pair();
        let tx = alice.create_transaction(bob.address(), 10).unwrap();

        assert_eq!(bob.receive_transaction(tx.clone(), true), Reception::Deferred);
        assert!(!bob.mempool().contains(&tx.id()));
        assert_eq!(bob.deferred().len(), 1);

        bob.create_candidate_block(1);
        assert!(bob.mempool().contains(&tx.id()));
        assert!(bob.deferred().is_empty());
    }

    #[test]
    fn test_extend_and_rollback() {
        let (mut alice, mut bob) = funded_pair();
        let tx = alice.create_transaction(bob.address(), 100).unwrap();
        assert!(alice.submit_transaction(&tx));
        assert_eq!(bob.receive_transaction(tx, false), Reception::Accepted);

        let before = bob.snapshot();
        let block = mined(&mut alice, 10);
        assert_eq!(bob.receive_block(block.clone()), BlockOutcome::Extended);
        assert_eq!(bob.height(), 1);
        assert_eq!(bob.confirmed_balance(), 1_100);
        assert!(bob.mempool().is_empty());

        assert_eq!(bob.rollback(), Some(block));
        assert_eq!(bob.snapshot(), before);
        assert!(bob.rollback().is_none());
    }

    #[test]
    fn test_inclusion_proof() {
        let (mut alice, bob) = funded_pair();
        let tx = alice.create_transaction(bob.address(), 5).unwrap();
        alice.submit_transaction(&tx);
        let block = mined(&mut alice, 10);
        assert_eq!(alice.receive_block(block.clone()), BlockOutcome::Extended);

        let (height, proof) = alice.inclusion_proof(&tx.id()).unwrap();
        assert_eq!(height, 1);
        assert!(merkle::verify_path(&proof, &block.header.merkle_root));
        assert!(alice.inclusion_proof(&[0; 32]).is_none());
    }

    #[test]
    fn test_package_without_candidate() {
        let (alice, _) = funded_pair();
        assert_eq!(alice.package_block(0), Err(LedgerError::NoCandidate));
        assert_eq!(alice.mine_candidate(), Err(LedgerError::NoCandidate));
    }
}
