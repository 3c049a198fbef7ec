//! # Hashing
//!
//! Double SHA-256 identifiers and the block merkle root.
//!
//! ## Merkle Root
//!
//! Each level pairs adjacent hashes, `parent = SHA256d(left || right)`, and
//! duplicates the last hash of an odd-length level. Because of that
//! duplication two different transaction lists can share a root
//! (CVE-2012-2459), so the computation also reports whether any level held
//! two identical adjacent hashes ("mutated").

use sha2::{Digest, Sha256};

use crate::entities::{Hash, NULL_HASH};

/// SHA256(SHA256(data)).
pub fn sha256d(data: &[u8]) -> Hash {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// Single SHA-256.
pub fn sha256(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    sha256d(&buf)
}

/// Merkle root of `leaves` and whether the list is mutated.
///
/// An empty list yields the null hash.
pub fn compute_merkle_root(leaves: &[Hash]) -> (Hash, bool) {
    if leaves.is_empty() {
        return (NULL_HASH, false);
    }

    let mut mutated = false;
    let mut level: Vec<Hash> = leaves.to_vec();
    while level.len() > 1 {
        for pair in level.chunks_exact(2) {
            if pair[0] == pair[1] {
                mutated = true;
            }
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                hash_pair(left, right)
            })
            .collect();
    }
    (level[0], mutated)
}
