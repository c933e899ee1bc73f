//! UTXO set with first-touch journaling, and the views validators read through

use crate::types::*;
use std::collections::BTreeMap;

/// Read access to unspent records
pub trait UtxoView {
    fn lookup(&self, pointer: &SpendPointer) -> Option<UnspentRecord>;
}

/// Prior values of every pointer touched while a journal was open.
/// `None` means the pointer was absent before.
pub type UtxoJournal = BTreeMap<SpendPointer, Option<UnspentRecord>>;

/// One peer's unspent records, keyed and iterated in pointer order
#[derive(Debug, Clone, Default)]
pub struct UtxoSet {
    records: BTreeMap<SpendPointer, UnspentRecord>,
    journal: Option<UtxoJournal>,
}

impl PartialEq for UtxoSet {
    fn eq(&self, other: &Self) -> bool {
        self.records == other.records
    }
}

impl Eq for UtxoSet {}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start recording prior values. Any open journal is discarded.
    pub fn begin_journal(&mut self) {
        self.journal = Some(BTreeMap::new());
    }

    /// Stop recording and hand back the priors
    pub fn take_journal(&mut self) -> UtxoJournal {
        self.journal.take().unwrap_or_default()
    }

    fn touch(&mut self, pointer: &SpendPointer) {
        if let Some(journal) = self.journal.as_mut() {
            if !journal.contains_key(pointer) {
                journal.insert(*pointer, self.records.get(pointer).cloned());
            }
        }
    }

    /// Insert or replace the record at `record.pointer`
    pub fn insert(&mut self, record: UnspentRecord) {
        self.touch(&record.pointer);
        self.records.insert(record.pointer, record);
    }

    pub fn remove(&mut self, pointer: &SpendPointer) -> Option<UnspentRecord> {
        self.touch(pointer);
        self.records.remove(pointer)
    }

    /// Replace the record at `pointer` with `f(record)`, if present
    pub fn replace_with(&mut self, pointer: &SpendPointer, f: impl FnOnce(&UnspentRecord) -> UnspentRecord) -> bool {
        match self.records.get(pointer).map(f) {
            Some(updated) => {
                self.insert(updated);
                true
            }
            None => false,
        }
    }

    /// Put back every prior value in `journal`. Runs outside any journal.
    pub fn restore(&mut self, journal: UtxoJournal) {
        for (pointer, prior) in journal {
            match prior {
                Some(record) => {
                    self.records.insert(pointer, record);
                }
                None => {
                    self.records.remove(&pointer);
                }
            }
        }
    }

    pub fn get(&self, pointer: &SpendPointer) -> Option<&UnspentRecord> {
        self.records.get(pointer)
    }

    pub fn contains(&self, pointer: &SpendPointer) -> bool {
        self.records.contains_key(pointer)
    }

    pub fn records(&self) -> impl Iterator<Item = &UnspentRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl UtxoView for UtxoSet {
    fn lookup(&self, pointer: &SpendPointer) -> Option<UnspentRecord> {
        self.records.get(pointer).cloned()
    }
}

/// View used while validating the transactions of one block: the confirmed records
/// of the base set plus the outputs of transactions earlier in the same block.
/// Base records appear unspent since pool soft locks do not apply on chain.
pub struct BlockStaging<'a> {
    base: &'a UtxoSet,
    staged: BTreeMap<SpendPointer, UnspentRecord>,
}

impl<'a> BlockStaging<'a> {
    pub fn new(base: &'a UtxoSet) -> Self {
        Self { base, staged: BTreeMap::new() }
    }

    /// Make the outputs of `tx` spendable by later transactions of the block
    pub fn stage(&mut self, tx: &Transaction) {
        let is_coinbase = tx.is_coinbase();
        for (pointer, output) in tx.output_pointers() {
            self.staged
                .insert(pointer, UnspentRecord::new(output.clone(), pointer, is_coinbase, true));
        }
    }
}

impl UtxoView for BlockStaging<'_> {
    fn lookup(&self, pointer: &SpendPointer) -> Option<UnspentRecord> {
        if let Some(record) = self.staged.get(pointer) {
            return Some(record.clone());
        }
        self.base
            .get(pointer)
            .filter(|record| record.confirmed)
            .map(|record| record.with_unspent(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u8, index: u32, value: u64, confirmed: bool) -> UnspentRecord {
        UnspentRecord::new(TxOutput::new("addr", value), SpendPointer::new([id; 32], index), false, confirmed)
    }

    #[test]
    fn test_iteration_is_pointer_ordered() {
        let mut set = UtxoSet::new();
        set.insert(record(3, 0, 1, true));
        set.insert(record(1, 1, 2, true));
        set.insert(record(1, 0, 3, true));
        let values: Vec<u64> = set.records().map(|r| r.value()).collect();
        assert_eq!(values, vec![3, 2, 1]);
    }

    #[test]
    fn test_journal_restores_priors() {
        let mut set = UtxoSet::new();
        set.insert(record(1, 0, 10, true));
        set.insert(record(2, 0, 20, false));
        let before = set.clone();

        set.begin_journal();
        set.remove(&SpendPointer::new([1; 32], 0));
        set.replace_with(&SpendPointer::new([2; 32], 0), |r| r.with_confirmed(true));
        set.replace_with(&SpendPointer::new([2; 32], 0), |r| r.with_unspent(false));
        set.insert(record(3, 0, 30, true));
        let journal = set.take_journal();

        assert_eq!(journal.len(), 3);
        assert_ne!(set, before);
        set.restore(journal);
        assert_eq!(set, before);
    }

    #[test]
    fn test_replace_missing_pointer() {
        let mut set = UtxoSet::new();
        assert!(!set.replace_with(&SpendPointer::new([0; 32], 0), |r| r.clone()));
        assert!(set.is_empty());
    }

    #[test]
    fn test_block_staging_hides_unconfirmed() {
        let mut set = UtxoSet::new();
        set.insert(record(1, 0, 10, true).with_unspent(false));
        set.insert(record(2, 0, 20, false));

        let staging = BlockStaging::new(&set);
        let confirmed = staging.lookup(&SpendPointer::new([1; 32], 0)).unwrap();
        assert!(confirmed.unspent);
        assert!(staging.lookup(&SpendPointer::new([2; 32], 0)).is_none());
    }

    #[test]
    fn test_block_staging_sees_earlier_outputs() {
        let set = UtxoSet::new();
        let tx = Transaction {
            inputs: vec![TxInput { spends: Some(SpendPointer::new([5; 32], 0)), signature: vec![], pubkey: None }],
            outputs: vec![TxOutput::new("x", 4)],
            fee: 0,
            lock_time: 0,
        };
        let mut staging = BlockStaging::new(&set);
        let pointer = SpendPointer::new(tx.id(), 0);
        assert!(staging.lookup(&pointer).is_none());
        staging.stage(&tx);
        assert_eq!(staging.lookup(&pointer).map(|r| r.value()), Some(4));
    }
}
