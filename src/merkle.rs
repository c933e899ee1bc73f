//! Merkle tree over transaction ids

use crate::crypto::double_hash;
use crate::types::*;
use serde::{Deserialize, Serialize};

/// Which side of the running hash a sibling sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// Siblings from the leaf up to the root. Levels where the node was carried
/// up without a partner contribute no step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf: Hash,
    pub steps: Vec<(Hash, Side)>,
}

fn combine(left: &Hash, right: &Hash) -> Hash {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left);
    data[32..].copy_from_slice(right);
    double_hash(&data)
}

fn next_level(level: &[Hash]) -> Vec<Hash> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => combine(left, right),
            [single] => *single,
            _ => unreachable!("chunks(2) yields one or two items"),
        })
        .collect()
}

/// MerkleRoot: 𝕊* → 𝕊
///
/// 1. If ids is empty: none
/// 2. Pair adjacent nodes as doubleHash(left || right)
/// 3. Carry an odd trailing node up unchanged
/// 4. Repeat until one node remains
pub fn root(ids: &[Hash]) -> Option<Hash> {
    if ids.is_empty() {
        return None;
    }

    let mut level = ids.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    Some(level[0])
}

/// Inclusion path for `ids[index]`
pub fn path(ids: &[Hash], index: usize) -> Option<MerkleProof> {
    if index >= ids.len() {
        return None;
    }

    let leaf = ids[index];
    let mut steps = Vec::new();
    let mut level = ids.to_vec();
    let mut position = index;

    while level.len() > 1 {
        let sibling = position ^ 1;
        if sibling < level.len() {
            let side = if sibling < position { Side::Left } else { Side::Right };
            steps.push((level[sibling], side));
        }
        level = next_level(&level);
        position /= 2;
    }

    Some(MerkleProof { leaf, steps })
}

/// Recompute the root from a proof and compare
pub fn verify_path(proof: &MerkleProof, expected_root: &Hash) -> bool {
    let computed = proof.steps.iter().fold(proof.leaf, |acc, (sibling, side)| match side {
        Side::Left => combine(sibling, &acc),
        Side::Right => combine(&acc, sibling),
    });
    &computed == expected_root
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: u8) -> Vec<Hash> {
        (0..n).map(|i| double_hash(&[i])).collect()
    }

    #[test]
    fn test_empty_has_no_root() {
        assert!(root(&[]).is_none());
        assert!(path(&[], 0).is_none());
    }

    #[test]
    fn test_single_leaf_is_root() {
        let leaves = ids(1);
        assert_eq!(root(&leaves), Some(leaves[0]));
    }

    #[test]
    fn test_two_leaves() {
        let leaves = ids(2);
        assert_eq!(root(&leaves), Some(combine(&leaves[0], &leaves[1])));
    }

    #[test]
    fn test_odd_node_carried_up() {
        let leaves = ids(3);
        let expected = combine(&combine(&leaves[0], &leaves[1]), &leaves[2]);
        assert_eq!(root(&leaves), Some(expected));
    }

    #[test]
    fn test_root_depends_on_order() {
        let leaves = ids(4);
        let mut swapped = leaves.clone();
        swapped.swap(0, 1);
        assert_ne!(root(&leaves), root(&swapped));
        assert_eq!(root(&leaves), root(&leaves.clone()));
    }

    #[test]
    fn test_every_path_verifies() {
        for n in 1..=7 {
            let leaves = ids(n);
            let r = root(&leaves).unwrap();
            for i in 0..leaves.len() {
                let proof = path(&leaves, i).unwrap();
                assert!(verify_path(&proof, &r), "leaf {} of {}", i, n);
            }
        }
    }

    #[test]
    fn test_tampered_path_fails() {
        let leaves = ids(5);
        let r = root(&leaves).unwrap();
        let mut proof = path(&leaves, 2).unwrap();
        proof.leaf = double_hash(b"forged");
        assert!(!verify_path(&proof, &r));
    }
}
