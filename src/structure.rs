//! Trie-structure maintenance
//!
//! The node table is derived state: a node exists iff it holds a live claim
//! or branches into at least two subtrees. This pass runs lazily before any
//! Merkle computation and reshapes the dirty part of the trie: deletable
//! nodes go away (their sole child reparented upward), surviving claim
//! holders get a parent assigned, split nodes appear where a dirty name and
//! a sibling share a longer prefix, and dirtiness percolates to the root.

use std::collections::HashSet;

use tracing::debug;

use crate::cache::ClaimTrieCache;
use crate::db::{self, CF_CLAIM_NODE};
use crate::error::Result;
use crate::types::NodeRow;

/// Longest name a claim may carry; bounds subtree scans.
const MAX_CLAIM_NAME_SIZE: usize = 255;

/// Outcome of one removal attempt during the upward deletion walk
enum NodeRemoval {
    /// The node is gone; `parent` is its recorded parent, or `None` when the
    /// node row had already disappeared
    Removed { parent: Option<Vec<u8>> },
    /// The node stays; `live_claims` tells whether claims kept it alive
    Blocked { live_claims: bool },
}

impl<'a> ClaimTrieCache<'a> {
    /// Whether any live claim is filed under exactly `name`.
    pub(crate) fn node_has_live_claims(&self, name: &[u8]) -> Result<bool> {
        let mut live = false;
        self.view_scan(CF_CLAIM_NODE, name, |key, _| {
            if !key.starts_with(name) {
                return Ok(false);
            }
            if key.len() != name.len() + 20 {
                return Ok(true);
            }
            if let Some((_, claim_id)) = db::split_claim_node_key(key) {
                if let Some(row) = self.get_claim(&claim_id)? {
                    if row.is_live(self.next_height()) {
                        live = true;
                        return Ok(false);
                    }
                }
            }
            Ok(true)
        })?;
        Ok(live)
    }

    /// Whether the names strictly below `name` branch into at least
    /// `required_children` distinct next bytes among live claims. A live
    /// claim at `name` itself disqualifies the node from being "empty".
    pub(crate) fn empty_node_should_exist_at(
        &self,
        name: &[u8],
        required_children: usize,
    ) -> Result<bool> {
        if self.node_has_live_claims(name)? {
            return Ok(false);
        }
        let mut bound = name.to_vec();
        bound.extend(std::iter::repeat(0x7f).take(MAX_CLAIM_NAME_SIZE + 1));

        let mut next_bytes = HashSet::new();
        let mut enough = false;
        self.view_scan(CF_CLAIM_NODE, name, |key, _| {
            if !key.starts_with(name) {
                return Ok(false);
            }
            let (node_name, claim_id) = match db::split_claim_node_key(key) {
                Some(split) => split,
                None => return Ok(true),
            };
            if node_name.len() <= name.len() || node_name > &bound[..] {
                return Ok(true);
            }
            match self.get_claim(&claim_id)? {
                Some(row) if row.is_live(self.next_height()) => {}
                _ => return Ok(true),
            }
            next_bytes.insert(node_name[name.len()]);
            if next_bytes.len() >= required_children {
                enough = true;
                return Ok(false);
            }
            Ok(true)
        })?;
        Ok(enough)
    }

    /// Try to delete `name`: allowed when it holds no live claim and has at
    /// most one child. The sole child, if any, is reparented to the deleted
    /// node's parent, and the parent is marked dirty.
    fn try_delete_node(&mut self, name: &[u8]) -> Result<NodeRemoval> {
        if name.is_empty() {
            return Ok(NodeRemoval::Blocked { live_claims: false });
        }
        if self.node_has_live_claims(name)? {
            return Ok(NodeRemoval::Blocked { live_claims: true });
        }
        let children = self.children_of(name)?;
        if children.len() > 1 {
            return Ok(NodeRemoval::Blocked { live_claims: false });
        }
        let row = match self.get_node(name)? {
            Some(row) => row,
            // someone deleted this node previously and cleaned up after it
            None => return Ok(NodeRemoval::Removed { parent: None }),
        };
        debug!(
            "Removing node {} with {} children",
            String::from_utf8_lossy(name),
            children.len()
        );
        self.remove_node_row(name, &row)?;
        let parent = row.parent.unwrap_or_default();
        if let Some(child) = children.first() {
            // make the child skip us and point to its grandparent
            if let Some(mut child_row) = self.get_node(child)? {
                child_row.parent = Some(parent.clone());
                self.write_node(child, &child_row)?;
            }
        }
        self.mark_node_dirty(&parent)?;
        Ok(NodeRemoval::Removed { parent: Some(parent) })
    }

    /// Bring the node table back in line with the live claim set. Operates
    /// only on dirty nodes; a no-op outside a transaction.
    pub(crate) fn ensure_tree_structure(&mut self) -> Result<()> {
        if !self.transacting() {
            return Ok(());
        }
        let names: Vec<Vec<u8>> = self.dirty.iter().cloned().collect();
        if names.is_empty() {
            return Ok(());
        }

        for name in &names {
            // walk upward deleting as long as deletions succeed
            let mut node = name.clone();
            let mut last_parent = Vec::new();
            let live_claims = loop {
                match self.try_delete_node(&node)? {
                    NodeRemoval::Removed { parent } => {
                        if let Some(parent) = parent {
                            last_parent = parent;
                        }
                        node = last_parent.clone();
                    }
                    NodeRemoval::Blocked { live_claims } => break live_claims,
                }
            };
            // a dirty name that survived with no claims has legitimate
            // children and needs no reinsertion
            if node != *name || name.is_empty() || !live_claims {
                continue;
            }

            // candidate parent: the longest existing strict prefix
            let mut parent = Vec::new();
            for len in (0..name.len()).rev() {
                if self.get_node(&name[..len])?.is_some() {
                    parent = name[..len].to_vec();
                    break;
                }
            }

            // a sibling sharing the next byte forces a split node at the
            // common prefix
            let psize = parent.len() + 1;
            let mut final_parent = parent.clone();
            for sibling in self.children_of(&parent)? {
                if sibling.len() < psize || sibling[..psize] != name[..psize] {
                    continue;
                }
                let mut split = psize;
                while split < sibling.len() && split < name.len() && sibling[split] == name[split] {
                    split += 1;
                }
                let split_name = name[..split].to_vec();
                if let Some(mut sibling_row) = self.get_node(&sibling)? {
                    sibling_row.parent = Some(split_name.clone());
                    self.write_node(&sibling, &sibling_row)?;
                }
                if split == name.len() {
                    // the node to insert is itself the split point; the
                    // fostered sibling now hangs off it
                    break;
                }
                debug!(
                    "Inserting split node {} near {}, parent {}",
                    String::from_utf8_lossy(&split_name),
                    String::from_utf8_lossy(&sibling),
                    String::from_utf8_lossy(&parent)
                );
                self.write_node(&split_name, &NodeRow { parent: Some(parent.clone()), hash: None })?;
                self.dirty.insert(split_name.clone());
                final_parent = split_name;
                break;
            }

            debug!(
                "Inserting or updating node {}, parent {}",
                String::from_utf8_lossy(name),
                String::from_utf8_lossy(&final_parent)
            );
            self.write_node(name, &NodeRow { parent: Some(final_parent), hash: None })?;
            self.dirty.insert(name.clone());
        }

        // percolate dirtiness up: every ancestor of a dirty node is dirty
        let snapshot: Vec<Vec<u8>> = self.dirty.iter().cloned().collect();
        let mut visited: HashSet<Vec<u8>> = HashSet::new();
        for name in snapshot {
            let mut current = name;
            loop {
                let parent = match self.get_node(&current)? {
                    Some(NodeRow { parent: Some(parent), .. }) => parent,
                    _ => break,
                };
                if !visited.insert(parent.clone()) {
                    break;
                }
                self.mark_node_dirty(&parent)?;
                if parent.is_empty() {
                    break;
                }
                current = parent;
            }
        }
        Ok(())
    }
}
