//! Fixed-depth sparse Merkle tree over sorted district leaves.
//!
//! Every shard is padded to exactly `2^DEPTH` leaves with the zero-leaf
//! hash, so every proof carries exactly `DEPTH` siblings regardless of how
//! many real leaves the snapshot contains. Hashing is Keccak-256,
//! domain-separated, matching the teacher's `hash_pair`/`hash_leaf`/
//! `hash_empty` shape in its own `merkle.rs`, generalized here to a fixed
//! depth with explicit path-index bits rather than an ad-hoc variable-size
//! tree.

use serde::{Deserialize, Serialize};

use crate::error::MerkleError;
use crate::hashing::{self, Digest32};

/// Tree depth. `2^DEPTH` = 4096 leaves per shard.
pub const DEPTH: usize = 12;
/// Leaf capacity of a single shard.
pub const CAPACITY: usize = 1 << DEPTH;

/// One level of precomputed "all zero leaves below this level" hashes,
/// indexed by level (0 = leaf level, DEPTH = root of an all-empty tree).
fn zero_hashes() -> [Digest32; DEPTH + 1] {
    let mut zeros = [[0u8; 32]; DEPTH + 1];
    zeros[0] = hashing::hash_empty();
    for level in 1..=DEPTH {
        zeros[level] = hashing::hash_pair(&zeros[level - 1], &zeros[level - 1]);
    }
    zeros
}

/// A sibling hash encountered while walking the tree, with its side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofNode {
    /// Sibling digest paired with the running hash at this level.
    pub sibling: Digest32,
    /// `true` if the sibling sits to the left of the running hash.
    pub left: bool,
}

/// Inclusion proof for a single leaf against a fixed-depth tree root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    /// Root the proof is checked against.
    pub root: Digest32,
    /// Leaf digest whose inclusion is being proven.
    pub leaf: Digest32,
    /// Index of the leaf within the padded `2^DEPTH` tree.
    pub index: usize,
    /// Exactly `DEPTH` sibling nodes, leaf level first.
    pub path: Vec<ProofNode>,
}

/// Builds the Merkle root over `leaves`, sorted by key by the caller,
/// padding with the zero-leaf hash out to [`CAPACITY`].
///
/// # Panics
/// Panics if `leaves.len() > CAPACITY`; a snapshot shard must not exceed
/// the fixed tree capacity.
pub fn merkle_root(leaves: &[Digest32]) -> Digest32 {
    assert!(leaves.len() <= CAPACITY, "shard exceeds tree capacity");
    let zeros = zero_hashes();
    let mut level: Vec<Digest32> = leaves.iter().map(hashing::hash_leaf).collect();
    let mut zero_at_level = zeros[0];
    for depth in 0..DEPTH {
        let mut next = Vec::with_capacity(level.len().div_ceil(2) + 1);
        for chunk in level.chunks(2) {
            let left = chunk[0];
            let right = if chunk.len() == 2 { chunk[1] } else { zero_at_level };
            next.push(hashing::hash_pair(&left, &right));
        }
        // Any remaining padding up to full width at this level folds with zero.
        let remaining_pairs_needed = (CAPACITY >> (depth + 1)).saturating_sub(next.len());
        for _ in 0..remaining_pairs_needed {
            next.push(zeros[depth + 1]);
        }
        level = next;
        zero_at_level = zeros[depth + 1];
    }
    level.first().copied().unwrap_or(zeros[DEPTH])
}

/// Builds an inclusion proof for the leaf at `index` within `leaves`
/// (leaves beyond `leaves.len()` up to [`CAPACITY`] are treated as empty).
pub fn build_proof(leaves: &[Digest32], index: usize) -> Result<MerkleProof, MerkleError> {
    if index >= CAPACITY || index >= leaves.len() {
        return Err(MerkleError::KeyNotInTree);
    }
    let zeros = zero_hashes();
    let mut level: Vec<Digest32> = (0..CAPACITY)
        .map(|i| {
            leaves
                .get(i)
                .map(hashing::hash_leaf)
                .unwrap_or(zeros[0])
        })
        .collect();
    let mut idx = index;
    let mut path = Vec::with_capacity(DEPTH);
    for _ in 0..DEPTH {
        let sibling_idx = idx ^ 1;
        let sibling = level[sibling_idx];
        let left = idx % 2 == 1; // sibling is left child iff current is right child
        path.push(ProofNode { sibling, left });
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            next.push(hashing::hash_pair(&pair[0], &pair[1]));
        }
        level = next;
        idx /= 2;
    }
    Ok(MerkleProof {
        root: level[0],
        leaf: hashing::hash_leaf(&leaves[index]),
        index,
        path,
    })
}

/// Verifies that `proof` recomputes its advertised root.
pub fn verify_proof(proof: &MerkleProof) -> bool {
    if proof.path.len() != DEPTH {
        return false;
    }
    let mut hash = proof.leaf;
    for node in &proof.path {
        hash = if node.left {
            hashing::hash_pair(&node.sibling, &hash)
        } else {
            hashing::hash_pair(&hash, &node.sibling)
        };
    }
    hash == proof.root
}

/// Verifies `proof` and additionally checks it was built against
/// `expected_root` (the snapshot's published root), returning
/// [`MerkleError::InvalidProof`] if either check fails. A proof that
/// recomputes to a root other than the one actually published is as
/// useless as one that doesn't recompute at all — both must be rejected
/// before a proof is handed to a caller.
pub fn verify_proof_against_root(proof: &MerkleProof, expected_root: &Digest32) -> Result<(), MerkleError> {
    if !verify_proof(proof) || proof.root != *expected_root {
        return Err(MerkleError::InvalidProof);
    }
    Ok(())
}

/// Compact wire form of a [`MerkleProof`]: `{r, l, s[], p[]}` with hex strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactProof {
    /// Root, hex-encoded.
    pub r: String,
    /// Leaf hash, hex-encoded.
    pub l: String,
    /// Sibling hashes, hex-encoded, leaf level first.
    pub s: Vec<String>,
    /// Path index bits, leaf level first (0 = current is left child).
    pub p: Vec<u8>,
}

impl From<&MerkleProof> for CompactProof {
    fn from(proof: &MerkleProof) -> Self {
        CompactProof {
            r: hashing::to_hex(&proof.root),
            l: hashing::to_hex(&proof.leaf),
            s: proof.path.iter().map(|n| hashing::to_hex(&n.sibling)).collect(),
            p: proof.path.iter().map(|n| u8::from(n.left)).collect(),
        }
    }
}

impl TryFrom<&CompactProof> for MerkleProof {
    type Error = MerkleError;

    fn try_from(compact: &CompactProof) -> Result<Self, Self::Error> {
        if compact.s.len() != DEPTH || compact.p.len() != DEPTH {
            return Err(MerkleError::Malformed(format!(
                "expected {DEPTH} siblings and path bits"
            )));
        }
        let root = hashing::from_hex(&compact.r).map_err(MerkleError::Malformed)?;
        let leaf = hashing::from_hex(&compact.l).map_err(MerkleError::Malformed)?;
        let mut path = Vec::with_capacity(DEPTH);
        for (sibling_hex, &bit) in compact.s.iter().zip(compact.p.iter()) {
            let sibling = hashing::from_hex(sibling_hex).map_err(MerkleError::Malformed)?;
            path.push(ProofNode { sibling, left: bit != 0 });
        }
        Ok(MerkleProof { root, leaf, index: 0, path })
    }
}

impl MerkleProof {
    /// Serializes the proof to its compact JSON wire form.
    pub fn to_compact_json(&self) -> Result<String, MerkleError> {
        let compact: CompactProof = self.into();
        serde_json::to_string(&compact).map_err(|e| MerkleError::Malformed(e.to_string()))
    }

    /// Parses a proof previously emitted by [`MerkleProof::to_compact_json`].
    pub fn from_compact_json(input: &str) -> Result<Self, MerkleError> {
        let compact: CompactProof =
            serde_json::from_str(input).map_err(|e| MerkleError::Malformed(e.to_string()))?;
        MerkleProof::try_from(&compact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: u8) -> Digest32 {
        let mut out = [0u8; 32];
        out[0] = n;
        out
    }

    #[test]
    fn roundtrip_proof_verifies() {
        let leaves = vec![leaf(1), leaf(2), leaf(3), leaf(4)];
        let root = merkle_root(&leaves);
        let proof = build_proof(&leaves, 2).unwrap();
        assert_eq!(proof.root, root);
        assert_eq!(proof.path.len(), DEPTH);
        assert!(verify_proof(&proof));
    }

    #[test]
    fn single_real_leaf_has_all_zero_siblings_but_one() {
        let leaves = vec![leaf(7)];
        let proof = build_proof(&leaves, 0).unwrap();
        assert!(verify_proof(&proof));
        assert_eq!(proof.path.len(), DEPTH);
    }

    #[test]
    fn compact_roundtrip_is_identity() {
        let leaves = vec![leaf(1), leaf(2), leaf(3)];
        let proof = build_proof(&leaves, 1).unwrap();
        let json = proof.to_compact_json().unwrap();
        let parsed = MerkleProof::from_compact_json(&json).unwrap();
        assert_eq!(parsed.root, proof.root);
        assert_eq!(parsed.leaf, proof.leaf);
        assert_eq!(parsed.path, proof.path);
        assert!(verify_proof(&parsed));
    }

    #[test]
    fn index_out_of_range_is_key_not_in_tree() {
        let leaves = vec![leaf(1)];
        assert!(matches!(build_proof(&leaves, 1), Err(MerkleError::KeyNotInTree)));
    }

    #[test]
    fn tampered_sibling_fails_verification() {
        let leaves = vec![leaf(1), leaf(2)];
        let mut proof = build_proof(&leaves, 0).unwrap();
        proof.path[0].sibling[0] ^= 0xff;
        assert!(!verify_proof(&proof));
    }

    #[test]
    fn proof_against_wrong_published_root_is_invalid() {
        let leaves = vec![leaf(1), leaf(2)];
        let proof = build_proof(&leaves, 0).unwrap();
        let other_root = merkle_root(&[leaf(9), leaf(8)]);
        assert!(matches!(
            verify_proof_against_root(&proof, &other_root),
            Err(MerkleError::InvalidProof)
        ));
        assert!(verify_proof_against_root(&proof, &proof.root).is_ok());
    }

    proptest::proptest! {
        #[test]
        fn root_is_deterministic_for_same_leaves(a in 0u8..255, b in 0u8..255, c in 0u8..255) {
            let leaves = vec![leaf(a), leaf(b), leaf(c)];
            let r1 = merkle_root(&leaves);
            let r2 = merkle_root(&leaves);
            proptest::prop_assert_eq!(r1, r2);
        }
    }
}
