//! Fixed-topology Merkle commitment construction
//!
//! Builds a fixed-depth binary hash tree over a list of identity values and
//! produces the root and, optionally, a single membership path. The tree is
//! a value computed per request, never persisted.

use alloy_primitives::U256;
use sha3::{Digest, Keccak256};

use crate::error::{ProofportError, Result};

/// Two-input hash over field-sized values.
///
/// The same implementation must be pinned on both the root-construction and
/// proof-verification sides; a mismatch is silently wrong, not an error.
pub trait FieldHasher: Send + Sync {
    fn hash2(&self, a: U256, b: U256) -> U256;
}

/// Pinned default hash: keccak256 over the two 32-byte big-endian operands.
///
/// Any field-friendly two-input permutation (e.g. a Poseidon variant) can be
/// substituted through [`FieldHasher`], as long as every side of the system
/// uses the same one.
#[derive(Debug, Clone, Copy, Default)]
pub struct Keccak2;

impl FieldHasher for Keccak2 {
    fn hash2(&self, a: U256, b: U256) -> U256 {
        let mut hasher = Keccak256::new();
        hasher.update(a.to_be_bytes::<32>());
        hasher.update(b.to_be_bytes::<32>());
        let digest: [u8; 32] = hasher.finalize().into();
        U256::from_be_bytes(digest)
    }
}

/// Single membership proof: recomputing the root from `leaf`, `index` and
/// `path` by repeated pairwise hashing must reproduce `root` exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub root: U256,
    /// Hashed leaf value at `index`.
    pub leaf: U256,
    pub index: usize,
    /// Sibling hashes from leaf level to the root, length = depth.
    pub path: Vec<U256>,
}

impl MerkleProof {
    /// Walk the sibling path back up, using the index bits to pick the
    /// left/right order at each level.
    pub fn recompute_root<H: FieldHasher>(&self, hasher: &H) -> U256 {
        let mut node = self.leaf;
        let mut position = self.index;

        for sibling in &self.path {
            node = if position & 1 == 0 {
                hasher.hash2(node, *sibling)
            } else {
                hasher.hash2(*sibling, node)
            };
            position >>= 1;
        }

        node
    }
}

/// Compute the Merkle root over `leaves`, padded with zeros to 2^depth.
pub fn compute_root<H: FieldHasher>(hasher: &H, leaves: &[U256], depth: usize) -> Result<U256> {
    let levels = build_levels(hasher, leaves, depth)?;
    Ok(levels[depth][0])
}

/// Compute the root plus the sibling path for the leaf at `index`.
pub fn compute_membership_proof<H: FieldHasher>(
    hasher: &H,
    leaves: &[U256],
    depth: usize,
    index: usize,
) -> Result<MerkleProof> {
    if index >= leaves.len() {
        return Err(ProofportError::LeafIndexOutOfRange {
            index,
            leaves: leaves.len(),
        });
    }

    let levels = build_levels(hasher, leaves, depth)?;

    let mut path = Vec::with_capacity(depth);
    let mut position = index;
    for level in levels.iter().take(depth) {
        path.push(level[position ^ 1]);
        position /= 2;
    }

    Ok(MerkleProof {
        root: levels[depth][0],
        leaf: levels[0][index],
        index,
        path,
    })
}

/// Hash each leaf with a fixed second input of 0 (preventing leaf/internal
/// ambiguity), pad to capacity, then reduce level by level.
fn build_levels<H: FieldHasher>(
    hasher: &H,
    leaves: &[U256],
    depth: usize,
) -> Result<Vec<Vec<U256>>> {
    let capacity = 1usize
        .checked_shl(depth as u32)
        .ok_or_else(|| ProofportError::Config(format!("Merkle depth {} too large", depth)))?;

    if leaves.len() > capacity {
        return Err(ProofportError::CapacityExceeded {
            leaves: leaves.len(),
            depth,
            capacity,
        });
    }

    let mut level: Vec<U256> = leaves.iter().map(|v| hasher.hash2(*v, U256::ZERO)).collect();
    level.resize(capacity, U256::ZERO);

    let mut levels = Vec::with_capacity(depth + 1);
    levels.push(level);

    for d in 0..depth {
        let prev = &levels[d];
        let next: Vec<U256> = prev
            .chunks_exact(2)
            .map(|pair| hasher.hash2(pair[0], pair[1]))
            .collect();
        levels.push(next);
    }

    Ok(levels)
}

/// Fixed-width field serialization: 32-byte, zero-padded, lowercase hex.
pub fn to_field_hex(value: U256) -> String {
    format!("0x{}", hex::encode(value.to_be_bytes::<32>()))
}

/// Parse a field value from 0x-prefixed hex or decimal text.
pub fn parse_field(s: &str) -> Result<U256> {
    let parsed = if let Some(hex_str) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        U256::from_str_radix(hex_str, 16)
    } else {
        U256::from_str_radix(s, 10)
    };

    parsed.map_err(|e| ProofportError::InvalidFieldValue(format!("{}: {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identities(n: u64) -> Vec<U256> {
        (1..=n).map(U256::from).collect()
    }

    #[test]
    fn root_is_deterministic() {
        let leaves = identities(4);
        let a = compute_root(&Keccak2, &leaves, 4).unwrap();
        let b = compute_root(&Keccak2, &leaves, 4).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn permuting_leaves_changes_root() {
        let leaves = identities(4);
        let mut shuffled = leaves.clone();
        shuffled.swap(0, 3);

        let a = compute_root(&Keccak2, &leaves, 4).unwrap();
        let b = compute_root(&Keccak2, &shuffled, 4).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn padding_matches_explicit_zero_leaves() {
        // Raw zero filler is appended after leaf hashing, so a short list
        // must hash identically to the same list with the padding made
        // explicit at the padded level.
        let leaves = identities(3);
        let root = compute_root(&Keccak2, &leaves, 2).unwrap();

        let l0: Vec<U256> = leaves
            .iter()
            .map(|v| Keccak2.hash2(*v, U256::ZERO))
            .chain(std::iter::once(U256::ZERO))
            .collect();
        let left = Keccak2.hash2(l0[0], l0[1]);
        let right = Keccak2.hash2(l0[2], l0[3]);
        assert_eq!(root, Keccak2.hash2(left, right));
    }

    #[test]
    fn capacity_overflow_is_an_error() {
        let leaves = identities(5);
        let err = compute_root(&Keccak2, &leaves, 2).unwrap_err();
        assert!(matches!(
            err,
            ProofportError::CapacityExceeded {
                leaves: 5,
                depth: 2,
                capacity: 4,
            }
        ));
    }

    #[test]
    fn membership_proof_round_trips_for_every_index() {
        let leaves = identities(4);
        let root = compute_root(&Keccak2, &leaves, 4).unwrap();

        for index in 0..leaves.len() {
            let proof = compute_membership_proof(&Keccak2, &leaves, 4, index).unwrap();
            assert_eq!(proof.path.len(), 4);
            assert_eq!(proof.root, root);
            assert_eq!(proof.recompute_root(&Keccak2), root, "index {}", index);
        }
    }

    #[test]
    fn membership_proof_rejects_out_of_range_index() {
        let leaves = identities(2);
        let err = compute_membership_proof(&Keccak2, &leaves, 4, 2).unwrap_err();
        assert!(matches!(err, ProofportError::LeafIndexOutOfRange { .. }));
    }

    #[test]
    fn tampered_path_fails_recompute() {
        let leaves = identities(4);
        let mut proof = compute_membership_proof(&Keccak2, &leaves, 4, 1).unwrap();
        proof.path[0] = proof.path[0].wrapping_add(U256::from(1));
        assert_ne!(proof.recompute_root(&Keccak2), proof.root);
    }

    #[test]
    fn field_hex_is_fixed_width_lowercase() {
        let value = U256::from(0xABCu64);
        let encoded = to_field_hex(value);
        assert_eq!(encoded.len(), 66);
        assert!(encoded.starts_with("0x"));
        assert!(encoded.ends_with("abc"));
        assert_eq!(parse_field(&encoded).unwrap(), value);
    }

    #[test]
    fn parse_field_accepts_decimal() {
        assert_eq!(parse_field("42").unwrap(), U256::from(42u64));
        assert!(parse_field("0xzz").is_err());
    }
}
