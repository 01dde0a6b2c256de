//! # Merkle Tree Construction and Proofs
//!
//! Standard binary Merkle tree over SHA-256 of event content hashes.
//!
//! ## Odd-node rule
//!
//! When a level has an odd number of nodes, the **last node is duplicated**
//! and hashed with itself: `parent = sha256(last || last)`. Every verifier
//! of these trees must use the same rule; a verifier that promotes the odd
//! node instead will compute a different root for the same leaves.
//!
//! ## Batch commitment
//!
//! The signed payload for a batch is
//! `sha256(batch_id_be || first_id_be || last_id_be || root_hash)`, binding
//! the root to its id range so a valid root cannot be replayed for a
//! different span of the ledger.

use thiserror::Error;
use warden_crypto::{sha256_concat, Sha256Hasher};
use warden_types::{EventId, Hash};

/// Errors from proof construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleError {
    /// The leaf index is outside the tree.
    #[error("Leaf index {index} out of range for {leaves} leaves")]
    IndexOutOfRange { index: usize, leaves: usize },

    /// A proof cannot be built over zero leaves.
    #[error("Cannot build a proof over an empty tree")]
    EmptyTree,
}

/// Which side a sibling hash sits on, viewed from the path node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Sibling is hashed on the left: `parent = H(sibling || node)`.
    Left,
    /// Sibling is hashed on the right: `parent = H(node || sibling)`.
    Right,
}

/// One step of an inclusion proof: a sibling hash and its side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofNode {
    /// The sibling hash.
    pub hash: Hash,
    /// The sibling's side.
    pub position: Position,
}

impl ProofNode {
    /// Sibling on the left.
    #[must_use]
    pub fn left(hash: Hash) -> Self {
        Self {
            hash,
            position: Position::Left,
        }
    }

    /// Sibling on the right.
    #[must_use]
    pub fn right(hash: Hash) -> Self {
        Self {
            hash,
            position: Position::Right,
        }
    }
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    sha256_concat(&[left, right])
}

fn next_level(level: &[Hash]) -> Vec<Hash> {
    let mut next = Vec::with_capacity(level.len().div_ceil(2));
    for chunk in level.chunks(2) {
        let left = &chunk[0];
        // Odd node: duplicate the last node to pair it.
        let right = chunk.get(1).unwrap_or(left);
        next.push(hash_pair(left, right));
    }
    next
}

/// Compute the Merkle root over leaf hashes.
///
/// An empty input yields the all-zero root; a single leaf is its own root.
#[must_use]
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return [0u8; 32];
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level[0]
}

/// Build the inclusion proof for `leaves[index]`: sibling hashes ordered
/// leaf to root.
pub fn build_proof(leaves: &[Hash], index: usize) -> Result<Vec<ProofNode>, MerkleError> {
    if leaves.is_empty() {
        return Err(MerkleError::EmptyTree);
    }
    if index >= leaves.len() {
        return Err(MerkleError::IndexOutOfRange {
            index,
            leaves: leaves.len(),
        });
    }

    let mut proof = Vec::new();
    let mut level = leaves.to_vec();
    let mut idx = index;

    while level.len() > 1 {
        let sibling = if idx % 2 == 0 { idx + 1 } else { idx - 1 };
        if sibling < level.len() {
            let position = if idx % 2 == 0 {
                Position::Right
            } else {
                Position::Left
            };
            proof.push(ProofNode {
                hash: level[sibling],
                position,
            });
        } else {
            // Odd tail: the node is its own sibling.
            proof.push(ProofNode::right(level[idx]));
        }
        level = next_level(&level);
        idx /= 2;
    }

    Ok(proof)
}

/// Recompute the root from a leaf hash and its proof and compare.
#[must_use]
pub fn verify_proof(leaf: &Hash, proof: &[ProofNode], expected_root: &Hash) -> bool {
    let mut current = *leaf;
    for node in proof {
        current = match node.position {
            Position::Left => hash_pair(&node.hash, &current),
            Position::Right => hash_pair(&current, &node.hash),
        };
    }
    current == *expected_root
}

/// The signed commitment bytes for a sealed batch.
#[must_use]
pub fn batch_commitment(
    batch_id: u64,
    first_event_id: EventId,
    last_event_id: EventId,
    root_hash: &Hash,
) -> Hash {
    let mut hasher = Sha256Hasher::new();
    hasher.update(&batch_id.to_be_bytes());
    hasher.update(&first_event_id.to_be_bytes());
    hasher.update(&last_event_id.to_be_bytes());
    hasher.update(root_hash);
    hasher.finalize()
}
