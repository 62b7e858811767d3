//! Consensus hash primitives
//!
//! Every hash feeding the name-trie Merkle root is a double-SHA256. The byte
//! layouts here are consensus-critical: the 8-byte height encoding keeps the
//! 32-bit height in the low four bytes, and child hashes are folded upward one
//! name byte at a time.

use sha2::{Digest, Sha256};

use crate::types::OutPoint;

/// Merkle hash of a trie with no active claims.
///
/// Consensus constant; distinct from the all-zero hash.
pub const EMPTY_TRIE_HASH: [u8; 32] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1,
];

/// All-zero hash, used as the "to be filled in" sentinel in proofs.
pub const NULL_HASH: [u8; 32] = [0; 32];

/// Double-SHA256 over a byte slice.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// Double-SHA256 over the concatenation of several byte ranges.
pub fn sha256d_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let first = hasher.finalize();
    Sha256::digest(first).into()
}

/// Encode a block height as 8 bytes, big endian, with the 32-bit value in the
/// low four bytes. The high four bytes are always zero.
pub fn height_to_vch(height: i32) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[4..].copy_from_slice(&(height as u32).to_be_bytes());
    out
}

/// Hash binding an outpoint to the height of the last takeover for its name.
///
/// `H( H(txid) || H(ascii(vout)) || H(heightToVch(takeover)) )` with `H` being
/// double-SHA256.
pub fn value_hash(outpoint: &OutPoint, takeover_height: i32) -> [u8; 32] {
    let h1 = sha256d(&outpoint.txid);
    let h2 = sha256d(outpoint.n.to_string().as_bytes());
    let h3 = sha256d(&height_to_vch(takeover_height));
    sha256d_parts(&[&h1, &h2, &h3])
}

/// Fold the bytes of `key` past offset `to` into `hash`, right to left.
///
/// Each step replaces the hash with `H(byte || hash)`. This lets a child node
/// several bytes deeper than its parent contribute as if every intermediate
/// byte had its own single-child node.
pub fn complete_hash(hash: &mut [u8; 32], key: &[u8], to: usize) {
    for i in (to + 1..key.len()).rev() {
        *hash = sha256d_parts(&[&[key[i]], &hash[..]]);
    }
}
