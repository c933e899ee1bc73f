//! Proof of work and difficulty retargeting

use crate::config::ChainParams;
use crate::constants::*;
use crate::crypto::double_hash;
use crate::types::*;

/// 256-bit unsigned integer, big-endian bytes. Byte-wise ordering is numeric ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct U256([u8; 32]);

impl U256 {
    pub fn zero() -> Self {
        U256([0; 32])
    }

    pub fn from_be_bytes(bytes: Hash) -> Self {
        U256(bytes)
    }

    /// 2^exp for exp < 256
    pub fn pow2(exp: u32) -> Option<Self> {
        if exp >= 256 {
            return None;
        }
        let mut bytes = [0u8; 32];
        bytes[31 - (exp / 8) as usize] = 1 << (exp % 8);
        Some(U256(bytes))
    }

    pub fn to_be_bytes(self) -> Hash {
        self.0
    }

    /// Number of leading zero bits
    pub fn leading_zeros(&self) -> u32 {
        let mut zeros = 0;
        for byte in self.0 {
            if byte == 0 {
                zeros += 8;
            } else {
                zeros += byte.leading_zeros();
                break;
            }
        }
        zeros
    }
}

/// ExpandTarget: ℕ → U256 ∪ {unbounded}
///
/// target(bits) = 2^(256 - bits). `bits == 0` is the trivial target that every
/// hash meets, reported as `None`.
pub fn target(bits: u32) -> Option<U256> {
    if bits == 0 {
        return None;
    }
    U256::pow2(256 - bits.min(MAX_BITS + 1))
}

/// Header bytes covered by the block hash
pub fn serialize_header(header: &BlockHeader) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(4 + 32 + 32 + 8 + 4 + 8);
    bytes.extend_from_slice(&header.version.to_le_bytes());
    bytes.extend_from_slice(&header.prev_hash);
    bytes.extend_from_slice(&header.merkle_root);
    bytes.extend_from_slice(&header.timestamp.to_le_bytes());
    bytes.extend_from_slice(&header.bits.to_le_bytes());
    bytes.extend_from_slice(&header.nonce.to_le_bytes());
    bytes
}

/// BlockHash: ℋ → 𝕊 = SHA256(SHA256(header))
pub fn header_hash(header: &BlockHeader) -> Hash {
    double_hash(&serialize_header(header))
}

/// True if `hash`, read big-endian, is below target(bits)
pub fn meets_target(hash: &Hash, bits: u32) -> bool {
    match target(bits) {
        None => true,
        Some(target) => U256::from_be_bytes(*hash) < target,
    }
}

/// CheckProofOfWork: ℋ → {true, false}
///
/// SHA256(SHA256(header)) < ExpandTarget(header.bits)
pub fn check_proof_of_work(header: &BlockHeader) -> bool {
    meets_target(&header_hash(header), header.bits)
}

/// GetNextWorkRequired: ℋ* × params → ℕ
///
/// For the block at height h = |prefix| on top of `prefix`:
/// 1. If h ≤ 1: return initial_bits
/// 2. If the interval is disabled or h is not a multiple of it: return the parent's bits
/// 3. Let elapsed = parent.time - prefix[h - interval].time
/// 4. Let expected = interval × target_block_time
/// 5. Faster than expected: bits + 1; slower: bits - 1 (at least 1); otherwise unchanged
pub fn next_bits(prefix: &[BlockHeader], params: &ChainParams) -> u32 {
    let height = prefix.len() as u64;
    if height <= 1 {
        return params.initial_bits;
    }

    let parent = &prefix[prefix.len() - 1];
    let interval = params.retarget_interval;
    if interval == 0 || height % interval != 0 || height < interval {
        return parent.bits;
    }

    let first = &prefix[(height - interval) as usize];
    let elapsed = parent.timestamp.saturating_sub(first.timestamp);
    let expected = interval.saturating_mul(params.target_block_time_ms);

    if elapsed < expected {
        (parent.bits + 1).min(MAX_BITS)
    } else if elapsed > expected {
        parent.bits.saturating_sub(1).max(1)
    } else {
        parent.bits
    }
}
