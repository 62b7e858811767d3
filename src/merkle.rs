//! Merkle engine: per-node hashes, root computation, inclusion proofs
//!
//! Node hashes are computed bottom-up over the dirty set, children before
//! parents. A child several bytes deeper than its parent folds its interior
//! name bytes into its hash, so the resulting root is identical to the one a
//! one-node-per-byte trie would produce.

use tracing::{debug, error};

use crate::cache::ClaimTrieCache;
use crate::db::CF_NODE;
use crate::error::{Error, Result};
use crate::hashes::{complete_hash, sha256d, value_hash, EMPTY_TRIE_HASH, NULL_HASH};
use crate::types::{ClaimId, OutPoint};

/// Upper bound on how many nodes one consistency check recomputes.
const CONSISTENCY_CHECK_SAMPLE: usize = 100_000;

/// One level of an inclusion proof
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofNode {
    /// Child entries in ascending byte order; the entry on the path to the
    /// proven name carries a zero hash, to be filled by the verifier
    pub children: Vec<(u8, [u8; 32])>,
    /// Whether a claim controls this node's name
    pub has_value: bool,
    /// The node's value hash, absent for the proven node itself
    pub value_hash: Option<[u8; 32]>,
}

/// Value data carried when the proven claim controls the name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofValue {
    /// Outpoint of the controlling claim
    pub outpoint: OutPoint,
    /// Height of the takeover that made it the controller
    pub last_takeover_height: i32,
}

/// Inclusion (or exclusion) proof for one name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrieProof {
    /// Proof levels from the root down to the deepest node on the path
    pub nodes: Vec<ProofNode>,
    /// Present iff the claim the proof was requested for controls the name
    pub value: Option<ProofValue>,
}

impl<'a> ClaimTrieCache<'a> {
    /// Compute the hash of one node from its children and, when a takeover
    /// is recorded, its winning claim.
    pub(crate) fn compute_node_hash(
        &self,
        name: &[u8],
        takeover_height: i32,
    ) -> Result<[u8; 32]> {
        let pos = name.len();
        let mut to_hash: Vec<u8> = Vec::new();
        for child in self.children_of(name)? {
            let row = self.get_node(&child)?.ok_or_else(|| {
                Error::InvalidData(format!(
                    "child {} has no node row",
                    String::from_utf8_lossy(&child)
                ))
            })?;
            let mut hash = row.hash.expect("child hash computed before its parent");
            complete_hash(&mut hash, &child, pos);
            to_hash.push(child[pos]);
            to_hash.extend_from_slice(&hash);
        }

        if takeover_height > 0 {
            if let Some(claim) = self.get_info_for_name(name)? {
                to_hash.extend_from_slice(&value_hash(&claim.outpoint, takeover_height));
            }
        }

        if to_hash.is_empty() {
            if !name.is_empty() {
                error!("Corrupt trie near: {}", String::from_utf8_lossy(name));
            }
            assert!(name.is_empty(), "only the root may hash an empty subtree");
            return Ok(EMPTY_TRIE_HASH);
        }
        Ok(sha256d(&to_hash))
    }

    /// Merkle root over all names. Reshapes the trie first, then fills in
    /// every dirty hash, children before parents.
    pub fn get_merkle_hash(&mut self) -> Result<[u8; 32]> {
        self.ensure_tree_structure()?;

        if let Some(root) = self.get_node(b"")? {
            if let Some(hash) = root.hash {
                return Ok(hash);
            }
        }
        assert!(self.transacting(), "dirty root hash outside of a transaction");

        let mut names: Vec<Vec<u8>> = self.dirty.iter().cloned().collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        for name in names {
            let mut row = match self.get_node(&name)? {
                Some(row) => row,
                None => continue, // deleted during maintenance
            };
            if row.hash.is_some() {
                continue;
            }
            let takeover_height = self.takeover_height_for_hash(&name)?;
            row.hash = Some(self.compute_node_hash(&name, takeover_height)?);
            self.write_node(&name, &row)?;
        }
        self.dirty.clear();

        let root = self.get_node(b"")?.expect("root node must exist");
        Ok(root.hash.expect("root hash just computed"))
    }

    /// Build an inclusion proof for `name`. The proof folds into the current
    /// Merkle root exactly when the claim `final_claim_id` controls `name`;
    /// for absent names the deepest level is a strict prefix and the proof
    /// demonstrates the absence.
    pub fn get_proof_for_name(
        &mut self,
        name: &[u8],
        final_claim_id: &ClaimId,
    ) -> Result<TrieProof> {
        // make sure every hash on the path is current
        self.get_merkle_hash()?;

        let mut proof = TrieProof { nodes: Vec::new(), value: None };
        for len in 0..=name.len() {
            let key = &name[..len];
            if self.get_node(key)?.is_none() {
                continue;
            }
            let takeover_height = self.takeover_height_for_hash(key)?;
            let claim = self.get_info_for_name(key)?;
            let has_value = claim.is_some();
            let value_hash_bytes =
                claim.as_ref().map(|c| value_hash(&c.outpoint, takeover_height));

            let pos = key.len();
            let mut children: Vec<(u8, [u8; 32])> = Vec::new();
            let mut interior_pad: Vec<u8> = Vec::new();
            for child in self.children_of(key)? {
                if name.starts_with(&child) {
                    // the child on the path: a hole here, one single-entry
                    // pad level per interior byte after this node
                    children.push((child[pos], NULL_HASH));
                    interior_pad = child[pos + 1..].to_vec();
                    continue;
                }
                let row = self.get_node(&child)?.ok_or_else(|| {
                    Error::InvalidData(format!(
                        "child {} has no node row",
                        String::from_utf8_lossy(&child)
                    ))
                })?;
                let mut hash = row.hash.expect("hashes current after merkle pass");
                complete_hash(&mut hash, &child, pos);
                children.push((child[pos], hash));
            }

            if key == name {
                let controls = matches!(&claim, Some(c) if c.claim_id == *final_claim_id);
                if controls {
                    let claim = claim.expect("controlling claim present");
                    proof.value = Some(ProofValue {
                        outpoint: claim.outpoint,
                        last_takeover_height: takeover_height,
                    });
                }
                // the verifier reconstructs the target's value hash itself
                proof.nodes.push(ProofNode { children, has_value, value_hash: None });
            } else {
                proof.nodes.push(ProofNode {
                    children,
                    has_value,
                    value_hash: value_hash_bytes,
                });
                for byte in interior_pad {
                    proof.nodes.push(ProofNode {
                        children: vec![(byte, NULL_HASH)],
                        has_value: false,
                        value_hash: None,
                    });
                }
            }
        }
        Ok(proof)
    }

    /// Recompute stored node hashes and compare, bounded to a sample of the
    /// node table. A mismatch anywhere means the persisted trie is corrupt.
    pub fn check_consistency(&self) -> Result<bool> {
        let mut names = Vec::new();
        self.view_scan(CF_NODE, &[], |key, _| {
            names.push(key.to_vec());
            Ok(names.len() < CONSISTENCY_CHECK_SAMPLE)
        })?;
        for name in names {
            let row = match self.get_node(&name)? {
                Some(row) => row,
                None => continue,
            };
            let stored = match row.hash {
                Some(hash) => hash,
                None => {
                    error!("Unhashed node at {}", String::from_utf8_lossy(&name));
                    return Ok(false);
                }
            };
            let takeover_height = self.takeover_height_for_hash(&name)?;
            if self.compute_node_hash(&name, takeover_height)? != stored {
                error!("Invalid hash at {}", String::from_utf8_lossy(&name));
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Check the persisted trie against a block's declared root at `height`.
    /// Moves the cache (and the base) to `height + 1` on the way.
    pub fn validate_db(&mut self, height: i32, root_hash: &[u8; 32]) -> Result<bool> {
        self.set_next_height(height + 1);
        self.base().set_next_height(height + 1);

        if !self.check_consistency()? {
            return Ok(false);
        }
        if self.get_merkle_hash()? != *root_hash {
            error!("the block's root claim hash doesn't match the persisted claim root hash");
            return Ok(false);
        }
        if self.next_height() > self.base().config().all_claims_in_merkle_fork_height {
            debug!("reverse claim-id lookups active");
        }
        Ok(true)
    }
}

/// Fold a proof back into a root hash and compare. Pure function: consults
/// no storage, only the proof, the name, and the claimed root.
pub fn verify_proof(proof: &TrieProof, name: &[u8], expected_root: &[u8; 32]) -> bool {
    let count = proof.nodes.len();
    if count == 0 {
        return false;
    }
    // a control claim requires the path to reach the name's full depth
    if proof.value.is_some() && count != name.len() + 1 {
        return false;
    }
    let mut deeper: Option<[u8; 32]> = None;
    for (depth, node) in proof.nodes.iter().enumerate().rev() {
        let mut to_hash: Vec<u8> = Vec::new();
        for (byte, hash) in &node.children {
            to_hash.push(*byte);
            if *hash == NULL_HASH {
                // the hole: must sit on the path and have a deeper hash ready
                if depth >= name.len() || *byte != name[depth] {
                    return false;
                }
                match deeper.take() {
                    Some(hash) => to_hash.extend_from_slice(&hash),
                    None => return false,
                }
            } else {
                to_hash.extend_from_slice(hash);
            }
        }
        // every level above the deepest must consume the deeper hash, or the
        // chain is broken and the lower levels prove nothing
        if depth != count - 1 && deeper.is_some() {
            return false;
        }
        let is_target = depth == name.len();
        if is_target {
            match &proof.value {
                Some(value) => to_hash
                    .extend_from_slice(&value_hash(&value.outpoint, value.last_takeover_height)),
                None if node.has_value => return false,
                None => {}
            }
        } else if node.has_value {
            match &node.value_hash {
                Some(hash) => to_hash.extend_from_slice(hash),
                None => return false,
            }
        }
        deeper = Some(if to_hash.is_empty() {
            if depth != 0 {
                return false;
            }
            EMPTY_TRIE_HASH
        } else {
            sha256d(&to_hash)
        });
    }
    deeper.as_ref() == Some(expected_root)
}
