//! Core ledger value types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hash type: 256-bit digest
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Natural number type
pub type Natural = u64;

/// SpendPointer: identifies one output of one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpendPointer {
    pub tx_id: Hash,
    pub index: u32,
}

impl SpendPointer {
    pub fn new(tx_id: Hash, index: u32) -> Self {
        Self { tx_id, index }
    }
}

impl fmt::Display for SpendPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(&self.tx_id[..8]), self.index)
    }
}

/// Transaction input. `spends == None` marks a coinbase input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxInput {
    pub spends: Option<SpendPointer>,
    pub signature: ByteString,
    pub pubkey: Option<ByteString>,
}

impl TxInput {
    pub fn coinbase(payload: ByteString) -> Self {
        Self { spends: None, signature: payload, pubkey: None }
    }

    /// `signature || pubkey`, the raw signature script
    pub fn sig_script(&self) -> ByteString {
        let mut script = self.signature.clone();
        if let Some(pubkey) = &self.pubkey {
            script.extend_from_slice(pubkey);
        }
        script
    }
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxOutput {
    pub to_address: String,
    pub value: u64,
}

impl TxOutput {
    pub fn new(to_address: impl Into<String>, value: u64) -> Self {
        Self { to_address: to_address.into(), value }
    }
}

/// Unspent output as tracked by one peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentRecord {
    pub output: TxOutput,
    pub pointer: SpendPointer,
    pub is_coinbase: bool,
    pub unspent: bool,
    pub confirmed: bool,
}

impl UnspentRecord {
    pub fn new(output: TxOutput, pointer: SpendPointer, is_coinbase: bool, confirmed: bool) -> Self {
        Self { output, pointer, is_coinbase, unspent: true, confirmed }
    }

    pub fn with_unspent(&self, unspent: bool) -> Self {
        Self { unspent, ..self.clone() }
    }

    pub fn with_confirmed(&self, confirmed: bool) -> Self {
        Self { confirmed, ..self.clone() }
    }

    pub fn value(&self) -> u64 {
        self.output.value
    }
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transaction {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub fee: u64,
    pub lock_time: Natural,
}

/// Block header
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: Natural,
    pub bits: u32,
    pub nonce: Natural,
}

/// Block
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

/// Validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(String),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }
}
