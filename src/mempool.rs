//! Pending transaction pools
//!
//! [`Mempool`] holds admitted, unconfirmed transactions with a spend index.
//! [`OrphanPool`] parks transactions whose inputs are unknown, and [`DeferredQueue`]
//! holds transactions whose delivery was delayed by the simulated network.

use crate::transaction::{verify_transaction, TxVerdict};
use crate::types::*;
use crate::utxo::UtxoSet;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// How a miner picks pool transactions for a candidate block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    TakeAll,
    RandomSample { max: usize },
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        SelectionPolicy::TakeAll
    }
}

#[derive(Debug, Clone)]
struct PoolEntry {
    seq: u64,
    tx: Transaction,
}

/// Prior pool entries of every id touched while a journal was open
pub type PoolJournal = BTreeMap<Hash, Option<(u64, Transaction)>>;

/// One peer's pool of unconfirmed transactions
#[derive(Debug, Clone, Default)]
pub struct Mempool {
    entries: HashMap<Hash, PoolEntry>,
    spent_by: HashMap<SpendPointer, Hash>,
    next_seq: u64,
    journal: Option<PoolJournal>,
}

impl PartialEq for Mempool {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .all(|(id, entry)| other.entries.get(id).map(|e| &e.tx) == Some(&entry.tx))
    }
}

impl Eq for Mempool {}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_journal(&mut self) {
        self.journal = Some(BTreeMap::new());
    }

    pub fn take_journal(&mut self) -> PoolJournal {
        self.journal.take().unwrap_or_default()
    }

    fn touch(&mut self, id: &Hash) {
        if let Some(journal) = self.journal.as_mut() {
            if !journal.contains_key(id) {
                let prior = self.entries.get(id).map(|e| (e.seq, e.tx.clone()));
                journal.insert(*id, prior);
            }
        }
    }

    fn insert_entry(&mut self, id: Hash, entry: PoolEntry) {
        for pointer in entry.tx.spent_pointers() {
            self.spent_by.insert(pointer, id);
        }
        self.entries.insert(id, entry);
    }

    fn remove_entry(&mut self, id: &Hash) -> Option<PoolEntry> {
        let entry = self.entries.remove(id)?;
        for pointer in entry.tx.spent_pointers() {
            if self.spent_by.get(&pointer) == Some(id) {
                self.spent_by.remove(&pointer);
            }
        }
        Some(entry)
    }

    /// Add `tx`. Returns false if its id is already pooled.
    pub fn insert(&mut self, tx: Transaction) -> bool {
        let id = tx.id();
        if self.entries.contains_key(&id) {
            return false;
        }
        self.touch(&id);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.insert_entry(id, PoolEntry { seq, tx });
        true
    }

    pub fn remove(&mut self, id: &Hash) -> Option<Transaction> {
        if !self.entries.contains_key(id) {
            return None;
        }
        self.touch(id);
        self.remove_entry(id).map(|e| e.tx)
    }

    /// Put back every prior entry in `journal`
    pub fn restore(&mut self, journal: PoolJournal) {
        for (id, prior) in journal {
            self.remove_entry(&id);
            if let Some((seq, tx)) = prior {
                self.insert_entry(id, PoolEntry { seq, tx });
            }
        }
    }

    pub fn contains(&self, id: &Hash) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &Hash) -> Option<&Transaction> {
        self.entries.get(id).map(|e| &e.tx)
    }

    /// Id of the pooled transaction spending `pointer`
    pub fn spender(&self, pointer: &SpendPointer) -> Option<&Hash> {
        self.spent_by.get(pointer)
    }

    /// Pooled transactions in arrival order
    pub fn transactions(&self) -> Vec<&Transaction> {
        let mut entries: Vec<&PoolEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| &e.tx).collect()
    }

    pub fn ids(&self) -> Vec<Hash> {
        self.transactions().into_iter().map(|tx| tx.id()).collect()
    }

    /// Pooled transactions that spend outputs of `id`, directly or transitively
    pub fn descendants(&self, id: &Hash) -> Vec<Hash> {
        let mut found = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([*id]);

        while let Some(current) = queue.pop_front() {
            let outputs = match self.entries.get(&current) {
                Some(entry) => entry.tx.outputs.len(),
                None => continue,
            };
            for index in 0..outputs {
                let pointer = SpendPointer::new(current, index as u32);
                if let Some(child) = self.spent_by.get(&pointer) {
                    if seen.insert(*child) {
                        found.push(*child);
                        queue.push_back(*child);
                    }
                }
            }
        }

        found
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// True if any input of `tx` is already spent by a pooled transaction
pub fn has_conflicts(tx: &Transaction, pool: &Mempool) -> bool {
    tx.spent_pointers().any(|p| pool.spender(&p).is_some())
}

/// AcceptToMemoryPool: 𝒯𝒳 × 𝒰𝒮 × 𝒫 → {accepted, rejected, orphan}
///
/// 1. Verify tx against the UTXO set and pool
/// 2. Orphan: park tx in the orphan pool
/// 3. Valid: pool tx and soft-lock the records it spends
/// 4. If unconfirmed spending is allowed, add tx's outputs as unconfirmed records
pub fn accept_to_memory_pool(
    tx: &Transaction,
    utxo_set: &mut UtxoSet,
    pool: &mut Mempool,
    orphans: &mut OrphanPool,
    allow_unconfirmed_spend: bool,
) -> TxVerdict {
    let verdict = verify_transaction(tx, &*utxo_set, pool);
    match verdict {
        TxVerdict::Valid => {
            for pointer in tx.spent_pointers() {
                utxo_set.replace_with(&pointer, |r| r.with_unspent(false));
            }
            if allow_unconfirmed_spend {
                let is_coinbase = tx.is_coinbase();
                for (pointer, output) in tx.output_pointers() {
                    if !utxo_set.contains(&pointer) {
                        utxo_set.insert(UnspentRecord::new(output.clone(), pointer, is_coinbase, false));
                    }
                }
            }
            pool.insert(tx.clone());
        }
        TxVerdict::Orphan => {
            orphans.insert(tx.clone());
        }
        TxVerdict::Invalid(_) => {}
    }
    verdict
}

/// Re-run admission for every orphan until no more are adopted.
/// Returns the ids adopted into the pool.
pub fn retry_orphans(
    utxo_set: &mut UtxoSet,
    pool: &mut Mempool,
    orphans: &mut OrphanPool,
    allow_unconfirmed_spend: bool,
) -> Vec<Hash> {
    let mut adopted = Vec::new();

    loop {
        let before = adopted.len();
        for tx in orphans.take_all() {
            // Still-missing inputs put the transaction straight back
            if accept_to_memory_pool(&tx, utxo_set, pool, orphans, allow_unconfirmed_spend).is_valid() {
                adopted.push(tx.id());
            }
        }
        if adopted.len() == before || orphans.is_empty() {
            break;
        }
    }

    adopted
}

/// SelectTransactions: 𝒫 × 𝒰𝒮 → 𝒯𝒳*
///
/// 1. Order candidates by arrival (TakeAll) or shuffle them (RandomSample)
/// 2. Take a candidate only if each input is a confirmed record or an output of an
///    already selected transaction
/// 3. Repeat passes until nothing more fits or the sample limit is reached
pub fn select_transactions<R: Rng + ?Sized>(
    pool: &Mempool,
    utxo: &UtxoSet,
    policy: SelectionPolicy,
    rng: &mut R,
) -> Vec<Transaction> {
    let mut candidates: Vec<&Transaction> = pool.transactions();
    let limit = match policy {
        SelectionPolicy::TakeAll => usize::MAX,
        SelectionPolicy::RandomSample { max } => {
            candidates.shuffle(rng);
            max
        }
    };

    let mut selected: Vec<Transaction> = Vec::new();
    let mut created: HashSet<SpendPointer> = HashSet::new();

    loop {
        let mut progressed = false;
        let mut remaining = Vec::new();

        for tx in candidates {
            if selected.len() >= limit {
                break;
            }
            let ready = tx.spent_pointers().all(|p| {
                created.contains(&p) || utxo.get(&p).map(|r| r.confirmed).unwrap_or(false)
            });
            if ready {
                created.extend(tx.output_pointers().into_iter().map(|(p, _)| p));
                selected.push(tx.clone());
                progressed = true;
            } else {
                remaining.push(tx);
            }
        }

        if !progressed || remaining.is_empty() || selected.len() >= limit {
            break;
        }
        candidates = remaining;
    }

    selected
}

/// Transactions whose inputs were unknown on arrival
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrphanPool {
    txs: BTreeMap<Hash, Transaction>,
}

impl OrphanPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tx: Transaction) -> bool {
        self.txs.insert(tx.id(), tx).is_none()
    }

    pub fn remove(&mut self, id: &Hash) -> Option<Transaction> {
        self.txs.remove(id)
    }

    pub fn contains(&self, id: &Hash) -> bool {
        self.txs.contains_key(id)
    }

    pub fn take_all(&mut self) -> Vec<Transaction> {
        std::mem::take(&mut self.txs).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }
}

/// Bounded queue of transactions parked by a delayed delivery
#[derive(Debug, Clone)]
pub struct DeferredQueue {
    capacity: usize,
    txs: VecDeque<Transaction>,
}

impl DeferredQueue {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, txs: VecDeque::new() }
    }

    /// Park `tx`. When full, the oldest parked transaction is handed back.
    pub fn push(&mut self, tx: Transaction) -> Option<Transaction> {
        if self.capacity == 0 {
            return Some(tx);
        }
        let evicted = if self.txs.len() >= self.capacity {
            self.txs.pop_front()
        } else {
            None
        };
        self.txs.push_back(tx);
        evicted
    }

    pub fn drain(&mut self) -> Vec<Transaction> {
        self.txs.drain(..).collect()
    }

    pub fn contains(&self, id: &Hash) -> bool {
        self.txs.iter().any(|tx| &tx.id() == id)
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn tx_spending(pointers: &[SpendPointer], tag: &str) -> Transaction {
        Transaction {
            inputs: pointers
                .iter()
                .map(|p| TxInput { spends: Some(*p), signature: vec![], pubkey: None })
                .collect(),
            outputs: vec![TxOutput::new(tag, 1), TxOutput::new(tag, 2)],
            fee: 1,
            lock_time: 0,
        }
    }

    fn confirmed_utxo(pointers: &[SpendPointer]) -> UtxoSet {
        let mut set = UtxoSet::new();
        for p in pointers {
            set.insert(UnspentRecord::new(TxOutput::new("a", 10), *p, false, true));
        }
        set
    }

    #[test]
    fn test_insert_indexes_spends() {
        let p = SpendPointer::new([1; 32], 0);
        let tx = tx_spending(&[p], "a");
        let mut pool = Mempool::new();

        assert!(pool.insert(tx.clone()));
        assert!(!pool.insert(tx.clone()));
        assert_eq!(pool.spender(&p), Some(&tx.id()));
        assert!(has_conflicts(&tx_spending(&[p], "b"), &pool));

        pool.remove(&tx.id());
        assert!(pool.spender(&p).is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_journal_restore() {
        let a = tx_spending(&[SpendPointer::new([1; 32], 0)], "a");
        let b = tx_spending(&[SpendPointer::new([2; 32], 0)], "b");
        let mut pool = Mempool::new();
        pool.insert(a.clone());
        let before = pool.clone();

        pool.begin_journal();
        pool.remove(&a.id());
        pool.insert(b.clone());
        let journal = pool.take_journal();
        assert_ne!(pool, before);

        pool.restore(journal);
        assert_eq!(pool, before);
        assert_eq!(pool.ids(), vec![a.id()]);
        assert!(pool.spender(&SpendPointer::new([2; 32], 0)).is_none());
    }

    #[test]
    fn test_descendants_follow_outputs() {
        let parent = tx_spending(&[SpendPointer::new([1; 32], 0)], "p");
        let child = tx_spending(&[SpendPointer::new(parent.id(), 1)], "c");
        let grandchild = tx_spending(&[SpendPointer::new(child.id(), 0)], "g");
        let unrelated = tx_spending(&[SpendPointer::new([9; 32], 0)], "u");

        let mut pool = Mempool::new();
        for tx in [&parent, &child, &grandchild, &unrelated] {
            pool.insert((*tx).clone());
        }

        assert_eq!(pool.descendants(&parent.id()), vec![child.id(), grandchild.id()]);
        assert!(pool.descendants(&unrelated.id()).is_empty());
    }

    #[test]
    fn test_take_all_respects_dependencies() {
        let root = SpendPointer::new([1; 32], 0);
        let parent = tx_spending(&[root], "p");
        let child = tx_spending(&[SpendPointer::new(parent.id(), 0)], "c");
        let stranded = tx_spending(&[SpendPointer::new([8; 32], 0)], "s");

        let mut pool = Mempool::new();
        pool.insert(child.clone());
        pool.insert(stranded);
        pool.insert(parent.clone());

        let utxo = confirmed_utxo(&[root]);
        let mut rng = StdRng::seed_from_u64(1);
        let picked = select_transactions(&pool, &utxo, SelectionPolicy::TakeAll, &mut rng);
        assert_eq!(picked, vec![parent, child]);
    }

    #[test]
    fn test_random_sample_limit() {
        let pointers: Vec<_> = (0..10u8).map(|i| SpendPointer::new([i; 32], 0)).collect();
        let mut pool = Mempool::new();
        for p in &pointers {
            pool.insert(tx_spending(&[*p], "x"));
        }
        let utxo = confirmed_utxo(&pointers);
        let mut rng = StdRng::seed_from_u64(2);

        let picked = select_transactions(&pool, &utxo, SelectionPolicy::RandomSample { max: 3 }, &mut rng);
        assert_eq!(picked.len(), 3);
    }

    #[test]
    fn test_orphan_pool() {
        let tx = tx_spending(&[SpendPointer::new([1; 32], 0)], "o");
        let mut orphans = OrphanPool::new();
        assert!(orphans.insert(tx.clone()));
        assert!(!orphans.insert(tx.clone()));
        assert!(orphans.contains(&tx.id()));
        assert_eq!(orphans.take_all(), vec![tx]);
        assert!(orphans.is_empty());
    }

    #[test]
    fn test_deferred_queue_is_bounded() {
        let a = tx_spending(&[SpendPointer::new([1; 32], 0)], "a");
        let b = tx_spending(&[SpendPointer::new([2; 32], 0)], "b");
        let mut queue = DeferredQueue::new(1);

        assert!(queue.push(a.clone()).is_none());
        assert_eq!(queue.push(b.clone()), Some(a));
        assert!(queue.contains(&b.id()));
        assert_eq!(queue.drain(), vec![b]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_zero_capacity_queue_hands_back_immediately() {
        let a = tx_spending(&[SpendPointer::new([1; 32], 0)], "a");
        let mut queue = DeferredQueue::new(0);
        assert_eq!(queue.push(a.clone()), Some(a));
        assert!(queue.is_empty());
    }
}
