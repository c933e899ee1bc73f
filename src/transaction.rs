//! Transaction identity, construction and validation

use crate::crypto::double_hash;
use crate::mempool::Mempool;
use crate::script::{evaluate, pubkey_script, signature_script};
use crate::types::*;
use crate::utxo::UtxoView;
use std::collections::HashSet;

/// Outcome of checking a transaction against a pool and a UTXO view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxVerdict {
    Valid,
    Invalid(String),
    /// Some input references a pointer the view does not know yet
    Orphan,
}

impl TxVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, TxVerdict::Valid)
    }
}

impl From<ValidationResult> for TxVerdict {
    fn from(result: ValidationResult) -> Self {
        match result {
            ValidationResult::Valid => TxVerdict::Valid,
            ValidationResult::Invalid(reason) => TxVerdict::Invalid(reason),
        }
    }
}

impl Transaction {
    /// Transaction id: doubleHash(inputs || outputs || lock_time). The fee is not covered.
    pub fn id(&self) -> Hash {
        calculate_tx_id(self)
    }

    /// Exactly one input, and it spends nothing
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].spends.is_none()
    }

    pub fn total_output(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |total, out| total.checked_add(out.value))
    }

    /// Pointers spent by this transaction, in input order
    pub fn spent_pointers(&self) -> impl Iterator<Item = SpendPointer> + '_ {
        self.inputs.iter().filter_map(|input| input.spends)
    }

    /// Pointers of this transaction's outputs
    pub fn output_pointers(&self) -> Vec<(SpendPointer, &TxOutput)> {
        let id = self.id();
        self.outputs
            .iter()
            .enumerate()
            .map(|(i, out)| (SpendPointer::new(id, i as u32), out))
            .collect()
    }
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn put_pointer(buf: &mut Vec<u8>, pointer: &SpendPointer) {
    buf.extend_from_slice(&pointer.tx_id);
    buf.extend_from_slice(&pointer.index.to_le_bytes());
}

fn put_outputs(buf: &mut Vec<u8>, outputs: &[TxOutput]) {
    buf.extend_from_slice(&(outputs.len() as u32).to_le_bytes());
    for output in outputs {
        put_bytes(buf, output.to_address.as_bytes());
        buf.extend_from_slice(&output.value.to_le_bytes());
    }
}

/// Canonical bytes hashed into the transaction id
pub fn serialize_transaction(tx: &Transaction) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(tx.inputs.len() as u32).to_le_bytes());
    for input in &tx.inputs {
        match &input.spends {
            Some(pointer) => {
                buf.push(1);
                put_pointer(&mut buf, pointer);
            }
            None => buf.push(0),
        }
        put_bytes(&mut buf, &input.signature);
        match &input.pubkey {
            Some(pubkey) => put_bytes(&mut buf, pubkey),
            None => buf.push(0),
        }
    }
    put_outputs(&mut buf, &tx.outputs);
    buf.extend_from_slice(&tx.lock_time.to_le_bytes());
    buf
}

/// CalculateTxId: 𝒯𝒳 → 𝕊
pub fn calculate_tx_id(tx: &Transaction) -> Hash {
    double_hash(&serialize_transaction(tx))
}

/// Message signed by the owner of `pointer`: hash(pointer || pubkey || outputs)
pub fn signing_message(pointer: &SpendPointer, pubkey: &[u8], outputs: &[TxOutput]) -> Hash {
    let mut buf = Vec::new();
    put_pointer(&mut buf, pointer);
    put_bytes(&mut buf, pubkey);
    put_outputs(&mut buf, outputs);
    double_hash(&buf)
}

/// Coinbase paying `value` to `address`. The input carries the height and the
/// address so that coinbase ids differ between blocks and miners.
pub fn create_coinbase(address: &str, value: u64, height: Natural) -> Transaction {
    let mut payload = height.to_le_bytes().to_vec();
    payload.extend_from_slice(address.as_bytes());
    Transaction {
        inputs: vec![TxInput::coinbase(payload)],
        outputs: vec![TxOutput::new(address, value)],
        fee: 0,
        lock_time: 0,
    }
}

/// CheckTransaction: 𝒯𝒳 → {valid, invalid}
///
/// Context-free structure of a non-coinbase transaction:
/// 1. |ins| > 0 ∧ |outs| > 0
/// 2. Every input references a pointer
/// 3. No pointer is referenced twice
/// 4. Σ outputs does not overflow
pub fn check_transaction(tx: &Transaction) -> ValidationResult {
    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return ValidationResult::Invalid("Empty inputs or outputs".to_string());
    }

    if tx.is_coinbase() {
        return ValidationResult::Invalid("Coinbase outside of a block".to_string());
    }

    let mut seen = HashSet::new();
    for (i, input) in tx.inputs.iter().enumerate() {
        let pointer = match input.spends {
            Some(p) => p,
            None => return ValidationResult::Invalid(format!("Input {} spends nothing", i)),
        };
        if !seen.insert(pointer) {
            return ValidationResult::Invalid(format!("Input {} spends {} twice", i, pointer));
        }
    }

    if tx.total_output().is_none() {
        return ValidationResult::Invalid("Output value overflow".to_string());
    }

    ValidationResult::Valid
}

/// VerifyTransaction: 𝒯𝒳 × 𝒰𝒮 × 𝒫 → {valid, invalid, orphan}
///
/// Ordered checks, first failure wins:
/// 1. Structure (CheckTransaction)
/// 2. tx.id is not already in `pool`
/// 3. No input pointer is already spent by a transaction in `pool`
/// 4. Every input resolves in `view`, otherwise the transaction is an orphan
/// 5. Every input's signature script satisfies the referenced output's pubkey script
/// 6. Σ inputs ≥ Σ outputs + fee
pub fn verify_transaction(tx: &Transaction, view: &impl UtxoView, pool: &Mempool) -> TxVerdict {
    // 1. Structure
    let structure = check_transaction(tx);
    if !structure.is_valid() {
        return structure.into();
    }

    // 2. Already known
    let id = tx.id();
    if pool.contains(&id) {
        return TxVerdict::Invalid(format!("Transaction {} already in pool", hex::encode(&id[..8])));
    }

    // 3. Pool-level double spend
    for pointer in tx.spent_pointers() {
        if pool.spender(&pointer).is_some() {
            return TxVerdict::Invalid(format!("{} already spent in pool", pointer));
        }
    }

    // 4. Resolve inputs
    let mut records = Vec::with_capacity(tx.inputs.len());
    for pointer in tx.spent_pointers() {
        match view.lookup(&pointer) {
            Some(record) if record.unspent => records.push(record),
            Some(_) => return TxVerdict::Invalid(format!("{} is already spent", pointer)),
            None => return TxVerdict::Orphan,
        }
    }

    // 5. Scripts
    for (input, record) in tx.inputs.iter().zip(&records) {
        let unlocking = match signature_script(&input.sig_script()) {
            Some(tokens) => tokens,
            None => {
                return TxVerdict::Invalid(format!("Malformed signature script for {}", record.pointer))
            }
        };
        let pubkey = input.pubkey.as_deref().unwrap_or_default();
        let message = signing_message(&record.pointer, pubkey, &tx.outputs);

        let mut script = unlocking;
        script.extend(pubkey_script(&record.output.to_address));
        if !evaluate(&script, &message) {
            return TxVerdict::Invalid(format!("Script failed for {}", record.pointer));
        }
    }

    // 6. Value
    let total_in = records
        .iter()
        .try_fold(0u64, |total, record| total.checked_add(record.value()));
    let needed = tx.total_output().and_then(|out| out.checked_add(tx.fee));
    match (total_in, needed) {
        (Some(total_in), Some(needed)) if total_in >= needed => TxVerdict::Valid,
        (Some(total_in), Some(needed)) => TxVerdict::Invalid(format!(
            "Inputs {} do not cover outputs plus fee {}",
            total_in, needed
        )),
        _ => TxVerdict::Invalid("Value overflow".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::utxo::UtxoSet;
    use rand::{rngs::StdRng, SeedableRng};

    struct Fixture {
        owner: KeyPair,
        utxo: UtxoSet,
        funding: SpendPointer,
    }

    fn fixture(value: u64) -> Fixture {
        let owner = KeyPair::generate(&mut StdRng::seed_from_u64(31));
        let mut utxo = UtxoSet::new();
        let funding = SpendPointer::new([7; 32], 0);
        utxo.insert(UnspentRecord::new(TxOutput::new(owner.address(), value), funding, false, true));
        Fixture { owner, utxo, funding }
    }

    fn spend(keys: &KeyPair, pointer: SpendPointer, outputs: Vec<TxOutput>, fee: u64) -> Transaction {
        let pubkey = keys.public_key_bytes().to_vec();
        let message = signing_message(&pointer, &pubkey, &outputs);
        let signature = keys.sign(&message).unwrap().to_vec();
        Transaction {
            inputs: vec![TxInput { spends: Some(pointer), signature, pubkey: Some(pubkey) }],
            outputs,
            fee,
            lock_time: 0,
        }
    }

    #[test]
    fn test_id_ignores_fee() {
        let f = fixture(100);
        let tx = spend(&f.owner, f.funding, vec![TxOutput::new("b", 50)], 10);
        let mut other = tx.clone();
        other.fee = 20;
        assert_eq!(tx.id(), other.id());
        other.lock_time = 1;
        assert_ne!(tx.id(), other.id());
    }

    #[test]
    fn test_coinbase_shape() {
        let cb = create_coinbase("miner", 500, 3);
        assert!(cb.is_coinbase());
        assert_ne!(cb.id(), create_coinbase("miner", 500, 4).id());
        assert!(!check_transaction(&cb).is_valid());
    }

    #[test]
    fn test_check_transaction_structure() {
        let empty = Transaction { inputs: vec![], outputs: vec![], fee: 0, lock_time: 0 };
        assert!(!check_transaction(&empty).is_valid());

        let f = fixture(100);
        let mut tx = spend(&f.owner, f.funding, vec![TxOutput::new("b", 50)], 10);
        assert!(check_transaction(&tx).is_valid());
        tx.inputs.push(tx.inputs[0].clone());
        assert!(!check_transaction(&tx).is_valid());
    }

    #[test]
    fn test_valid_spend() {
        let f = fixture(100);
        let tx = spend(&f.owner, f.funding, vec![TxOutput::new("b", 60), TxOutput::new(f.owner.address(), 30)], 10);
        assert_eq!(verify_transaction(&tx, &f.utxo, &Mempool::new()), TxVerdict::Valid);
    }

    #[test]
    fn test_missing_input_is_orphan() {
        let f = fixture(100);
        let tx = spend(&f.owner, SpendPointer::new([9; 32], 1), vec![TxOutput::new("b", 1)], 0);
        assert_eq!(verify_transaction(&tx, &f.utxo, &Mempool::new()), TxVerdict::Orphan);
    }

    #[test]
    fn test_underfunded_rejected() {
        let f = fixture(100);
        let tx = spend(&f.owner, f.funding, vec![TxOutput::new("b", 95)], 10);
        assert!(matches!(verify_transaction(&tx, &f.utxo, &Mempool::new()), TxVerdict::Invalid(_)));
    }

    #[test]
    fn test_bad_signature_rejected() {
        let f = fixture(100);
        let thief = KeyPair::generate(&mut StdRng::seed_from_u64(32));
        let tx = spend(&thief, f.funding, vec![TxOutput::new("t", 50)], 10);
        assert!(matches!(verify_transaction(&tx, &f.utxo, &Mempool::new()), TxVerdict::Invalid(_)));

        let mut tampered = spend(&f.owner, f.funding, vec![TxOutput::new("b", 50)], 10);
        tampered.outputs[0].value = 80;
        assert!(matches!(verify_transaction(&tampered, &f.utxo, &Mempool::new()), TxVerdict::Invalid(_)));
    }

    #[test]
    fn test_pool_duplicate_and_double_spend() {
        let f = fixture(100);
        let tx = spend(&f.owner, f.funding, vec![TxOutput::new("b", 50)], 10);
        let mut pool = Mempool::new();
        pool.insert(tx.clone());

        assert!(matches!(verify_transaction(&tx, &f.utxo, &pool), TxVerdict::Invalid(_)));

        let rival = spend(&f.owner, f.funding, vec![TxOutput::new("c", 50)], 10);
        assert!(matches!(verify_transaction(&rival, &f.utxo, &pool), TxVerdict::Invalid(_)));
    }
}
