//! Simulation constants and protocol defaults

/// Default number of peers created at genesis
pub const INIT_NUMBER_OF_PEERS: usize = 12;

/// Default value funded to each peer by the genesis transaction
pub const INIT_COIN_PER_PEER: u64 = 100_000;

/// Flat fee attached to every transaction a peer creates
pub const FIX_FEE_PER_TX: u64 = 10;

/// Block reward before any halving
pub const FIX_BLOCK_REWARD: u64 = 500;

/// Difficulty of the first mined block, in leading zero bits
pub const INITIAL_DIFFICULTY_BITS: u32 = 12;

/// Blocks between difficulty retargets
pub const RETARGET_INTERVAL: u64 = 20;

/// Desired simulated time per block, in milliseconds
pub const TARGET_BLOCK_TIME_MS: u64 = 5_000;

/// Upper bound on transactions drawn by random selection
pub const MAX_TX_NUMBER_FOR_MINER: usize = 5;

/// Fraction bounds of the online population mining each round
pub const LOWER_BOUND_OF_CONSENSUS_PEERS: f64 = 0.2;
pub const UPPER_BOUND_OF_CONSENSUS_PEERS: f64 = 0.6;

/// Probability that one receiver defers a broadcast transaction
pub const SLOW_PEERS_IN_NETWORK: f64 = 0.2;

/// Probability that two receivers defer a broadcast transaction
pub const SLOWER_PEERS_IN_NETWORK: f64 = 0.1;

/// Capacity of a peer's deferred-transaction queue
pub const DEFERRED_QUEUE_CAPACITY: usize = 1;

/// Range of simulated hash rates, in attempts per simulated second
pub const HASH_RATE_MIN: f64 = 500.0;
pub const HASH_RATE_MAX: f64 = 1_500.0;

/// Default RNG seed
pub const DEFAULT_SEED: u64 = 7;

/// Maximum difficulty in bits
pub const MAX_BITS: u32 = 255;

/// Number of halvings after which the reward is zero
pub const MAX_HALVINGS: u64 = 64;

/// Compact ECDSA signature length
pub const SIGNATURE_SIZE: usize = 64;

/// Compressed public key length
pub const PUBKEY_SIZE: usize = 33;

/// Length of `signature || pubkey` in a spending input
pub const SIG_SCRIPT_SIZE: usize = SIGNATURE_SIZE + PUBKEY_SIZE;

/// Maximum stack size during script execution
pub const MAX_STACK_SIZE: usize = 1000;

/// Maximum number of tokens in a script
pub const MAX_SCRIPT_OPS: usize = 201;

/// Block header version used by all peers
pub const BLOCK_VERSION: u32 = 0;

/// Signature payload of the genesis funding input
pub const GENESIS_MESSAGE: &[u8] = b"I love blockchain";
