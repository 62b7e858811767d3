//! Block state machine: forward and backward block application
//!
//! Per block the driver removes spent claims/supports, adds new ones, then
//! calls [`increment_block`](ClaimTrieCache::increment_block). Rewinding runs
//! [`decrement_block`](ClaimTrieCache::decrement_block), the undo operations,
//! then [`finalize_decrement`](ClaimTrieCache::finalize_decrement).

use std::collections::BTreeSet;

use tracing::debug;

use crate::cache::ClaimTrieCache;
use crate::db::{
    self, CF_CLAIM_ACTIVATION, CF_CLAIM_EXPIRATION, CF_SUPPORT_ACTIVATION, CF_SUPPORT_EXPIRATION,
    CF_TAKEOVER, CF_TAKEOVER_HEIGHT,
};
use crate::error::Result;
use crate::types::ClaimId;
use crate::workarounds::TAKEOVER_WORKAROUND_CUTOFF;

impl<'a> ClaimTrieCache<'a> {
    /// Apply the block at the current height: activate and expire claims and
    /// supports, resolve takeovers on every touched name, advance the height.
    pub fn increment_block(&mut self) -> Result<bool> {
        self.ensure_transacting();
        let height = self.next_height();

        // claims activating now get their node created if needed
        for claim_id in self.claim_ids_at(CF_CLAIM_ACTIVATION, height)? {
            if let Some(row) = self.get_claim(&claim_id)? {
                if row.activation_height == height && row.expiration_height > height {
                    self.upsert_dirty_node(&row.node_name)?;
                }
            }
        }

        // expirations and support transitions only mark existing nodes
        let mut touched: BTreeSet<Vec<u8>> = BTreeSet::new();
        for claim_id in self.claim_ids_at(CF_CLAIM_EXPIRATION, height)? {
            if let Some(row) = self.get_claim(&claim_id)? {
                touched.insert(row.node_name);
            }
        }
        for point in self.support_points_at(CF_SUPPORT_ACTIVATION, height)? {
            if let Some(row) = self.get_support(&point)? {
                touched.insert(row.node_name);
            }
        }
        for point in self.support_points_at(CF_SUPPORT_EXPIRATION, height)? {
            if let Some(row) = self.get_support(&point)? {
                touched.insert(row.node_name);
            }
        }
        for name in touched {
            self.mark_node_dirty(&name)?;
        }

        self.insert_takeovers()?;

        self.set_next_height(height + 1);
        Ok(true)
    }

    /// Resolve takeovers for every dirty name at the current height.
    fn insert_takeovers(&mut self) -> Result<()> {
        let height = self.next_height();
        let names: Vec<Vec<u8>> = self.dirty.iter().cloned().collect();
        for name in names {
            // the candidate is judged as of the next block
            let mut candidate = self.best_claim_at(&name, height + 1)?;
            let current = self.get_last_takeover_for_name(&name)?;
            let mut happening = candidate.is_none()
                || current.is_none()
                || current.as_ref().map(|(id, _)| id) != candidate.as_ref().map(|c| &c.claim_id);

            // a change of control activates everything under the name, which
            // may change who the candidate is
            if happening && self.activate_all_for(&name)? {
                candidate = self.best_claim_at(&name, height + 1)?;
            }

            if height < TAKEOVER_WORKAROUND_CUTOFF
                && self
                    .base()
                    .config()
                    .takeover_workarounds
                    .contains(&(height, name.clone()))
            {
                happening = true;
            }

            debug!(
                "Takeover on {} at {}, happening: {}, set before: {}",
                String::from_utf8_lossy(&name),
                height,
                happening,
                current.is_some()
            );

            if happening {
                let winner = candidate.as_ref().map(|c| c.claim_id);
                self.put_takeover(&name, height, winner.as_ref())?;
            }
        }
        Ok(())
    }

    /// Pull the activation of every pending claim and support under `name`
    /// down to the current height. Returns whether anything moved.
    fn activate_all_for(&mut self, name: &[u8]) -> Result<bool> {
        let height = self.next_height();
        let mut changed = false;
        for (claim_id, mut row) in self.claims_for_node(name)? {
            if row.activation_height > height && row.expiration_height > height {
                self.set_claim_activation(&claim_id, &mut row, height)?;
                changed = true;
            }
        }
        for mut row in self.supports_for_node(name)? {
            if row.activation_height > height && row.expiration_height > height {
                self.set_support_activation(&mut row, height)?;
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Rewind one block: step the height back, mark the nodes the block had
    /// touched, and restore every activation the block's takeovers pulled
    /// down.
    pub fn decrement_block(&mut self) -> Result<bool> {
        self.ensure_transacting();
        let height = self.next_height() - 1;
        self.set_next_height(height);

        // names whose claims had expired at this height come back
        for claim_id in self.claim_ids_at(CF_CLAIM_EXPIRATION, height)? {
            if let Some(row) = self.get_claim(&claim_id)? {
                self.upsert_dirty_node(&row.node_name)?;
            }
        }

        let mut touched: BTreeSet<Vec<u8>> = BTreeSet::new();
        for point in self.support_points_at(CF_SUPPORT_EXPIRATION, height)? {
            if let Some(row) = self.get_support(&point)? {
                touched.insert(row.node_name);
            }
        }
        for point in self.support_points_at(CF_SUPPORT_ACTIVATION, height)? {
            if let Some(row) = self.get_support(&point)? {
                touched.insert(row.node_name);
            }
        }
        for claim_id in self.claim_ids_at(CF_CLAIM_ACTIVATION, height)? {
            if let Some(row) = self.get_claim(&claim_id)? {
                touched.insert(row.node_name);
            }
        }
        for name in touched {
            self.mark_node_dirty(&name)?;
        }

        // reverse forced activations back to their computed heights
        for claim_id in self.claim_ids_at(CF_CLAIM_ACTIVATION, height)? {
            if let Some(mut row) = self.get_claim(&claim_id)? {
                if row.activation_height != row.valid_height {
                    let valid_height = row.valid_height;
                    self.set_claim_activation(&claim_id, &mut row, valid_height)?;
                }
            }
        }
        for point in self.support_points_at(CF_SUPPORT_ACTIVATION, height)? {
            if let Some(mut row) = self.get_support(&point)? {
                if row.activation_height != row.valid_height {
                    let valid_height = row.valid_height;
                    self.set_support_activation(&mut row, valid_height)?;
                }
            }
        }

        Ok(true)
    }

    /// Finish a rewind after all undo operations at this height: mark the
    /// remaining touched nodes and drop every takeover record at or past the
    /// current height.
    pub fn finalize_decrement(&mut self) -> Result<bool> {
        self.ensure_transacting();
        let height = self.next_height();

        let mut touched: BTreeSet<Vec<u8>> = BTreeSet::new();
        for claim_id in self.claim_ids_at(CF_CLAIM_ACTIVATION, height)? {
            if let Some(row) = self.get_claim(&claim_id)? {
                if row.expiration_height > height {
                    touched.insert(row.node_name);
                }
            }
        }
        for point in self.support_points_at(CF_SUPPORT_ACTIVATION, height)? {
            if let Some(row) = self.get_support(&point)? {
                if row.expiration_height > height {
                    touched.insert(row.node_name);
                }
            }
        }

        let mut stale: Vec<(i32, Vec<u8>)> = Vec::new();
        self.view_scan(CF_TAKEOVER_HEIGHT, &db::height_prefix(height), |key, _| {
            if key.len() >= 6 {
                let mut prefix = [0u8; 4];
                prefix.copy_from_slice(&key[..4]);
                let row_height = u32::from_be_bytes(prefix) as i32;
                if let Some(name) = db::takeover_height_key_name(key) {
                    stale.push((row_height, name.to_vec()));
                }
            }
            Ok(true)
        })?;
        for (row_height, name) in &stale {
            if *row_height == height {
                touched.insert(name.clone());
            }
        }
        for name in touched {
            self.mark_node_dirty(&name)?;
        }
        for (row_height, name) in stale {
            self.del(CF_TAKEOVER, &db::takeover_key(&name, row_height))?;
            self.del(CF_TAKEOVER_HEIGHT, &db::takeover_height_key(row_height, &name))?;
        }

        Ok(true)
    }

    /// Takeover-protection delay for adding `claim_id` under `name`.
    ///
    /// The incumbent re-adding its own claim pays nothing; challengers wait
    /// proportionally to how long the incumbent has held the name, capped at
    /// 4032 blocks.
    pub fn get_delay_for_name(&mut self, name: &[u8], claim_id: &ClaimId) -> Result<i32> {
        let winner = self.get_last_takeover_for_name(name)?;
        if let Some((winner_id, takeover_height)) = &winner {
            if winner_id == claim_id {
                assert!(
                    *takeover_height <= self.next_height(),
                    "takeover recorded past the current height"
                );
                return Ok(0);
            }
        }

        let config = self.base().config();
        if self.next_height() > config.max_removal_workaround_height {
            if winner.is_none() {
                return Ok(0);
            }
            // TODO: hard fork this rule out; names with an implicit branch
            // node keep a zero delay for compatibility with old chains
            if self.empty_node_should_exist_at(name, 2)? {
                return Ok(0);
            }
        } else if self.removal_workaround.remove(name) {
            return Ok(0);
        }

        match winner {
            None => Ok(0),
            Some((_, takeover_height)) => Ok(std::cmp::min(
                (self.next_height() - takeover_height) / config.proportional_delay_factor,
                4032,
            )),
        }
    }
}
