//! # simchain
//!
//! In-process simulator of a permissionless proof-of-work UTXO network.
//!
//! Every [`peer::Peer`] keeps its own ledger: chain, UTXO set, mempool, orphan pools
//! and wallet. The [`network::Network`] creates the peers and the genesis block,
//! broadcasts transactions with simulated latency, and runs proof-of-work consensus
//! rounds in which the fastest simulated miner wins.
//!
//! ## Design Principles
//!
//! 1. **Owned state**: peers share nothing; deliveries are owned copies
//! 2. **Pure validators**: transaction and block checks take explicit pools and views
//! 3. **Deterministic runs**: one seeded RNG drives keys, latency and miner selection
//! 4. **Exact Version Pinning**: ledger-critical cryptography is pinned to exact versions
//!
//! ## Usage
//!
//! ```rust
//! use simchain::config::SimConfig;
//! use simchain::network::Network;
//!
//! let config = SimConfig { peer_count: 4, initial_bits: 6, ..SimConfig::default() };
//! let mut network = Network::genesis(config).unwrap();
//!
//! network.transfer(1, 2, 100).unwrap();
//! let report = network.run_consensus_round().unwrap();
//!
//! assert_eq!(report.height, 1);
//! assert!(network.peers().iter().all(|p| p.height() == 1));
//! ```

pub mod block;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod economic;
pub mod error;
pub mod mempool;
pub mod merkle;
pub mod mining;
pub mod network;
pub mod peer;
pub mod pow;
pub mod reorganization;
pub mod script;
pub mod transaction;
pub mod types;
pub mod utxo;
pub mod wallet;

// Re-export commonly used types
pub use config::{ChainParams, SimConfig};
pub use error::{LedgerError, Result};
pub use network::Network;
pub use peer::Peer;
pub use types::*;
