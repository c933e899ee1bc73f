//! Error types for ledger simulation

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Insufficient funds: needed {needed}, spendable {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("No signing key for address {0}")]
    UnknownKey(String),

    #[error("Cryptography failure: {0}")]
    Crypto(String),

    #[error("Script execution failed: {0}")]
    ScriptExecution(String),

    #[error("Originator rejected its own transaction {0}")]
    TransactionRejected(String),

    #[error("Winner rejected its own block: {0}")]
    BlockRejected(String),

    #[error("Nonce space exhausted before reaching the target")]
    ConsensusExhaustion,

    #[error("No candidate block has been built")]
    NoCandidate,

    #[error("Unknown peer: {0}")]
    UnknownPeer(usize),

    #[error("No peers available for consensus")]
    NoConsensusPeers,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
