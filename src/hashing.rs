//! Domain-separated hashing primitives.
//!
//! Two hash functions are pinned crate-wide (see DESIGN.md's Open Question
//! resolution): Keccak-256 for the Merkle commitment engine, chosen for
//! EVM-verifier compatibility, and SHA-256 for content-addressing, matching
//! the multihash convention IPFS CIDv1 uses for `sha2-256`. Both follow the
//! teacher's domain-separation-tag-then-payload hashing discipline.

use sha2::Digest as Sha2Digest;
use sha3::{Digest as Sha3Digest, Keccak256};

/// Fixed-width digest produced by both hash functions in this crate.
pub type Digest32 = [u8; 32];

const MERKLE_DOMAIN: &[u8] = b"TERRALEDGER_MERKLE";

/// Hashes two child digests into their parent node digest.
pub fn hash_pair(left: &Digest32, right: &Digest32) -> Digest32 {
    let mut hasher = Keccak256::new();
    hasher.update(MERKLE_DOMAIN);
    hasher.update(left);
    hasher.update(right);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Hashes a single leaf payload (already a 32-byte value hash) into a leaf digest.
pub fn hash_leaf(leaf: &Digest32) -> Digest32 {
    let mut hasher = Keccak256::new();
    hasher.update(MERKLE_DOMAIN);
    hasher.update([0u8]);
    hasher.update(leaf);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// The canonical zero-leaf hash used to pad a tree out to its fixed capacity.
pub fn hash_empty() -> Digest32 {
    let mut hasher = Keccak256::new();
    hasher.update(MERKLE_DOMAIN);
    hasher.update([1u8]);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Hashes a district's canonicalized record key and value into a Merkle leaf value.
pub fn leaf_value(key: &str, value: &[u8]) -> Digest32 {
    let mut hasher = Keccak256::new();
    hasher.update(MERKLE_DOMAIN);
    hasher.update(b"leaf-value");
    hasher.update((key.len() as u64).to_be_bytes());
    hasher.update(key.as_bytes());
    hasher.update(value);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Leaf digest for one district record (spec.md §3: `value = contentHash
/// (canonicalRecord)`, `leafHash = H(key ‖ value)`). `canonical_record`
/// must be the exact bytes committed to the snapshot (its canonical JSON
/// serialization), so that the leaf attests to the record body, not just
/// its id — two different bodies published under the same id hash to
/// different leaves and cannot both verify against the same root.
pub fn district_leaf(id: &str, canonical_record: &[u8]) -> Digest32 {
    leaf_value(id, &content_digest(canonical_record))
}

/// Content-addressing digest (SHA-256), used for CIDs and raw-response hashes.
pub fn content_digest(bytes: &[u8]) -> Digest32 {
    let mut hasher = sha2::Sha256::new();
    hasher.update(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Encodes a digest as lowercase hex.
pub fn to_hex(digest: &Digest32) -> String {
    hex::encode(digest)
}

/// Decodes a lowercase or uppercase hex string into a 32-byte digest.
pub fn from_hex(input: &str) -> Result<Digest32, String> {
    let bytes = hex::decode(input).map_err(|err| format!("invalid hex digest: {err}"))?;
    if bytes.len() != 32 {
        return Err("digest must be 32 bytes (64 hex chars)".to_string());
    }
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&bytes);
    Ok(digest)
}
