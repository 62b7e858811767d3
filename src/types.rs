//! Core data types for claims, supports, trie nodes and takeover records
//!
//! Row structs mirror the persisted tables one to one; the `*Value` structs
//! are the query-result shapes handed to callers.

use std::fmt;

use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 20-byte claim identifier
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClaimId(pub [u8; 20]);

impl ClaimId {
    /// Derive the claim id minted for a fresh claim output: RIPEMD160(SHA256)
    /// over the creating outpoint (txid followed by the little-endian vout).
    pub fn from_outpoint(point: &OutPoint) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(point.txid);
        hasher.update(point.n.to_le_bytes());
        let sha = hasher.finalize();
        let ripe = Ripemd160::digest(sha);
        let mut id = [0u8; 20];
        id.copy_from_slice(&ripe);
        ClaimId(id)
    }

    /// The id with its byte order reversed, as used by the reverse-prefix
    /// lookup index.
    pub fn reversed(&self) -> [u8; 20] {
        let mut out = self.0;
        out.reverse();
        out
    }
}

impl fmt::Debug for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Transaction output reference: creating transaction hash plus output index
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    /// Hash of the creating transaction
    pub txid: [u8; 32],
    /// Output index within that transaction
    pub n: u32,
}

impl OutPoint {
    /// Fixed-width ordered key encoding: txid followed by big-endian index.
    pub fn to_key(&self) -> [u8; 36] {
        let mut out = [0u8; 36];
        out[..32].copy_from_slice(&self.txid);
        out[32..].copy_from_slice(&self.n.to_be_bytes());
        out
    }

    /// Decode the encoding produced by [`OutPoint::to_key`].
    pub fn from_key(key: &[u8]) -> Option<Self> {
        if key.len() != 36 {
            return None;
        }
        let mut txid = [0u8; 32];
        txid.copy_from_slice(&key[..32]);
        let mut n = [0u8; 4];
        n.copy_from_slice(&key[32..]);
        Some(OutPoint { txid, n: u32::from_be_bytes(n) })
    }
}

impl fmt::Debug for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(self.txid), self.n)
    }
}

/// Persisted claim row, keyed by claim id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRow {
    /// Name as it appeared on chain
    pub name: Vec<u8>,
    /// Name the claim is filed under (differs from `name` only past the
    /// normalization fork)
    pub node_name: Vec<u8>,
    /// Creating transaction hash
    pub txid: [u8; 32],
    /// Creating output index
    pub tx_n: u32,
    /// Height at which this claim id first appeared
    pub original_height: i32,
    /// Height of the current version of the claim
    pub update_height: i32,
    /// Activation height as computed at insertion; rollback target
    pub valid_height: i32,
    /// Effective activation height; may be pulled down by a takeover
    pub activation_height: i32,
    /// First height at which the claim is no longer live
    pub expiration_height: i32,
    /// Amount in base units
    pub amount: i64,
}

impl ClaimRow {
    /// The claim's creating outpoint.
    pub fn outpoint(&self) -> OutPoint {
        OutPoint { txid: self.txid, n: self.tx_n }
    }

    /// Whether the claim is live at `height`.
    pub fn is_live(&self, height: i32) -> bool {
        self.activation_height < height && self.expiration_height >= height
    }
}

/// Persisted support row, keyed by outpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportRow {
    /// Claim this support adds amount to
    pub supported_claim_id: ClaimId,
    /// Name as it appeared on chain
    pub name: Vec<u8>,
    /// Name the support is filed under
    pub node_name: Vec<u8>,
    /// Creating transaction hash
    pub txid: [u8; 32],
    /// Creating output index
    pub tx_n: u32,
    /// Height of the block that carried the support
    pub block_height: i32,
    /// Activation height as computed at insertion; rollback target
    pub valid_height: i32,
    /// Effective activation height
    pub activation_height: i32,
    /// First height at which the support is no longer live
    pub expiration_height: i32,
    /// Amount in base units
    pub amount: i64,
}

impl SupportRow {
    /// The support's creating outpoint.
    pub fn outpoint(&self) -> OutPoint {
        OutPoint { txid: self.txid, n: self.tx_n }
    }

    /// Whether the support is live at `height`.
    pub fn is_live(&self, height: i32) -> bool {
        self.activation_height < height && self.expiration_height >= height
    }
}

/// Persisted trie-node row, keyed by the node's full name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeRow {
    /// Name of the parent node; always the longest strict prefix of this
    /// node's name that is itself a node. `None` for the root and for nodes
    /// whose parent has not been assigned yet.
    pub parent: Option<Vec<u8>>,
    /// Merkle hash of the subtree; `None` marks the node dirty.
    pub hash: Option<[u8; 32]>,
}

/// Claim as reported by queries, with its resolved effective amount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimValue {
    /// Creating outpoint
    pub outpoint: OutPoint,
    /// Claim id
    pub claim_id: ClaimId,
    /// Height of the current version of the claim
    pub height: i32,
    /// Activation height
    pub valid_at_height: i32,
    /// Amount in base units
    pub amount: i64,
    /// Amount plus all active supports
    pub effective_amount: i64,
}

/// Support as reported by queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportValue {
    /// Creating outpoint
    pub outpoint: OutPoint,
    /// Claim this support adds amount to
    pub supported_claim_id: ClaimId,
    /// Height of the block that carried the support
    pub height: i32,
    /// Activation height
    pub valid_at_height: i32,
    /// Amount in base units
    pub amount: i64,
}

/// One claim grouped with the supports that reference it
#[derive(Debug, Clone)]
pub struct ClaimNSupports {
    /// The claim
    pub claim: ClaimValue,
    /// Claim amount plus active support amounts
    pub effective_amount: i64,
    /// Height at which this claim id first appeared
    pub original_height: i32,
    /// Supports referencing the claim, active or pending
    pub supports: Vec<SupportValue>,
}

/// Full answer for a name: all claims, their supports, and leftovers
#[derive(Debug, Clone)]
pub struct ClaimsForName {
    /// The queried name
    pub name: Vec<u8>,
    /// Height of the latest takeover record, 0 when none exists
    pub last_takeover_height: i32,
    /// Claims in descending order of effective amount
    pub claims: Vec<ClaimNSupports>,
    /// Supports that reference no claim under this name
    pub unmatched_supports: Vec<SupportValue>,
}
