//! Claim-trie cache: transactional view over the base trie
//!
//! A cache instance is the single writer for one logical sequence of block
//! operations. It opens a write transaction lazily on the first mutation,
//! reads its own uncommitted writes, and either publishes everything with
//! [`flush`](ClaimTrieCache::flush) or rolls back when dropped.

use std::collections::{BTreeSet, HashSet};

use rocksdb::{Direction, IteratorMode, Transaction, TransactionDB};
use tracing::{error, warn};

use crate::db::{
    self, CF_CLAIM, CF_CLAIM_ACTIVATION, CF_CLAIM_EXPIRATION, CF_CLAIM_NODE, CF_CLAIM_REVERSE,
    CF_NODE, CF_NODE_PARENT, CF_SUPPORT, CF_SUPPORT_ACTIVATION, CF_SUPPORT_CLAIM,
    CF_SUPPORT_EXPIRATION, CF_SUPPORT_NODE, CF_TAKEOVER, CF_TAKEOVER_HEIGHT,
};
use crate::error::Result;
use crate::trie::ClaimTrie;
use crate::types::{
    ClaimId, ClaimNSupports, ClaimRow, ClaimValue, ClaimsForName, NodeRow, OutPoint, SupportRow,
    SupportValue,
};

/// Data returned by a successful claim removal, needed to undo it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedClaim {
    /// Name the claim was filed under
    pub node_name: Vec<u8>,
    /// Activation height at removal time; the undo re-add restores it
    pub valid_height: i32,
    /// Height at which the claim id first appeared
    pub original_height: i32,
}

/// Data returned by a successful support removal, needed to undo it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedSupport {
    /// Name the support was filed under
    pub node_name: Vec<u8>,
    /// Activation height at removal time
    pub valid_height: i32,
}

/// Single-writer transactional cache over a [`ClaimTrie`]
pub struct ClaimTrieCache<'a> {
    base: &'a ClaimTrie,
    tx: Option<Transaction<'a, TransactionDB>>,
    next_height: i32,
    pub(crate) dirty: BTreeSet<Vec<u8>>,
    pub(crate) removal_workaround: HashSet<Vec<u8>>,
}

impl<'a> ClaimTrieCache<'a> {
    /// Create a cache over `base`. The cache observes the committed state as
    /// of its first read plus its own writes.
    pub fn new(base: &'a ClaimTrie) -> Self {
        Self {
            base,
            tx: None,
            next_height: base.next_height(),
            dirty: BTreeSet::new(),
            removal_workaround: HashSet::new(),
        }
    }

    /// The base trie this cache borrows.
    pub fn base(&self) -> &'a ClaimTrie {
        self.base
    }

    /// Height the next applied block will have.
    pub fn next_height(&self) -> i32 {
        self.next_height
    }

    pub(crate) fn set_next_height(&mut self, height: i32) {
        self.next_height = height;
    }

    /// Claim lifetime in blocks at the current height.
    pub fn expiration_time(&self) -> i32 {
        let config = self.base.config();
        if self.next_height >= config.extended_expiration_fork_height {
            config.extended_expiration_time
        } else {
            config.original_expiration_time
        }
    }

    /// The name a record inserted with `valid_height` is filed under.
    pub fn adjust_name_for_valid_height(&self, name: &[u8], valid_height: i32) -> Vec<u8> {
        self.base.adjust_name_for_valid_height(name, valid_height)
    }

    // ── Transaction plumbing ────────────────────────────────────────────

    pub(crate) fn transacting(&self) -> bool {
        self.tx.is_some()
    }

    pub(crate) fn ensure_transacting(&mut self) {
        if self.tx.is_none() {
            self.tx = Some(self.base.db().transaction());
        }
    }

    fn write_tx(&self) -> &Transaction<'a, TransactionDB> {
        self.tx.as_ref().expect("claim-trie mutation outside of a transaction")
    }

    pub(crate) fn put(&self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<()> {
        Ok(self.write_tx().put_cf(self.base.db().cf(cf_name), key, value)?)
    }

    pub(crate) fn del(&self, cf_name: &str, key: &[u8]) -> Result<()> {
        Ok(self.write_tx().delete_cf(self.base.db().cf(cf_name), key)?)
    }

    pub(crate) fn view_get(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.base.db().cf(cf_name);
        match &self.tx {
            Some(tx) => Ok(tx.get_cf(cf, key)?),
            None => Ok(self.base.db().raw().get_cf(cf, key)?),
        }
    }

    /// Ordered scan of `cf_name` from `start`; `f` returns false to stop.
    pub(crate) fn view_scan<F>(&self, cf_name: &str, start: &[u8], mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        let cf = self.base.db().cf(cf_name);
        match &self.tx {
            Some(tx) => {
                for item in tx.iterator_cf(cf, IteratorMode::From(start, Direction::Forward)) {
                    let (key, value) = item?;
                    if !f(&key, &value)? {
                        break;
                    }
                }
            }
            None => {
                let raw = self.base.db().raw();
                for item in raw.iterator_cf(cf, IteratorMode::From(start, Direction::Forward)) {
                    let (key, value) = item?;
                    if !f(&key, &value)? {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Publish all pending changes. Recomputes the Merkle root first so no
    /// dirty node hash is ever committed. Returns false if the commit failed;
    /// the transaction is rolled back in that case.
    pub fn flush(&mut self) -> Result<bool> {
        if self.tx.is_some() {
            self.get_merkle_hash()?;
            let tx = self.tx.take().expect("transaction vanished during flush");
            if let Err(e) = tx.commit() {
                error!("Failed to commit claim-trie transaction: {}", e);
                return Ok(false);
            }
        }
        self.base.set_next_height(self.next_height);
        self.removal_workaround.clear();
        Ok(true)
    }

    // ── Node rows ───────────────────────────────────────────────────────

    pub(crate) fn get_node(&self, name: &[u8]) -> Result<Option<NodeRow>> {
        match self.view_get(CF_NODE, name)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Write a node row, keeping the children index in step with the
    /// node's parent reference.
    pub(crate) fn write_node(&self, name: &[u8], row: &NodeRow) -> Result<()> {
        if let Some(existing) = self.get_node(name)? {
            if existing.parent != row.parent {
                if let Some(old_parent) = &existing.parent {
                    self.del(CF_NODE_PARENT, &db::node_parent_key(old_parent, name))?;
                }
            }
        }
        if let Some(parent) = &row.parent {
            self.put(CF_NODE_PARENT, &db::node_parent_key(parent, name), &[])?;
        }
        self.put(CF_NODE, name, &bincode::serialize(row)?)
    }

    pub(crate) fn remove_node_row(&self, name: &[u8], row: &NodeRow) -> Result<()> {
        if let Some(parent) = &row.parent {
            self.del(CF_NODE_PARENT, &db::node_parent_key(parent, name))?;
        }
        self.del(CF_NODE, name)
    }

    /// Names of the children of `name`, in ascending order.
    pub(crate) fn children_of(&self, name: &[u8]) -> Result<Vec<Vec<u8>>> {
        let prefix = db::node_parent_prefix(name);
        let mut children = Vec::new();
        self.view_scan(CF_NODE_PARENT, &prefix, |key, _| {
            if !key.starts_with(&prefix) {
                return Ok(false);
            }
            children.push(key[prefix.len()..].to_vec());
            Ok(true)
        })?;
        Ok(children)
    }

    /// Clear the stored hash of an existing node; absent nodes are left
    /// absent.
    pub(crate) fn mark_node_dirty(&mut self, name: &[u8]) -> Result<()> {
        if let Some(mut row) = self.get_node(name)? {
            if row.hash.is_some() {
                row.hash = None;
                self.write_node(name, &row)?;
            }
            self.dirty.insert(name.to_vec());
        }
        Ok(())
    }

    /// Clear the stored hash of a node, inserting the node if absent. A
    /// fresh node starts without a parent; the structure pass assigns one.
    pub(crate) fn upsert_dirty_node(&mut self, name: &[u8]) -> Result<()> {
        let mut row = self.get_node(name)?.unwrap_or_default();
        row.hash = None;
        self.write_node(name, &row)?;
        self.dirty.insert(name.to_vec());
        Ok(())
    }

    // ── Claim rows and their indexes ────────────────────────────────────

    pub(crate) fn get_claim(&self, claim_id: &ClaimId) -> Result<Option<ClaimRow>> {
        match self.view_get(CF_CLAIM, &claim_id.0)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn insert_claim_row(&self, claim_id: &ClaimId, row: &ClaimRow) -> Result<()> {
        self.put(CF_CLAIM, &claim_id.0, &bincode::serialize(row)?)?;
        self.put(CF_CLAIM_NODE, &db::claim_node_key(&row.node_name, claim_id), &[])?;
        self.put(CF_CLAIM_ACTIVATION, &db::height_key(row.activation_height, &claim_id.0), &[])?;
        self.put(CF_CLAIM_EXPIRATION, &db::height_key(row.expiration_height, &claim_id.0), &[])?;
        self.put(CF_CLAIM_REVERSE, &claim_id.reversed(), &[])
    }

    pub(crate) fn delete_claim_row(&self, claim_id: &ClaimId, row: &ClaimRow) -> Result<()> {
        self.del(CF_CLAIM, &claim_id.0)?;
        self.del(CF_CLAIM_NODE, &db::claim_node_key(&row.node_name, claim_id))?;
        self.del(CF_CLAIM_ACTIVATION, &db::height_key(row.activation_height, &claim_id.0))?;
        self.del(CF_CLAIM_EXPIRATION, &db::height_key(row.expiration_height, &claim_id.0))?;
        self.del(CF_CLAIM_REVERSE, &claim_id.reversed())
    }

    /// Move a claim's activation height, keeping the activation index exact.
    pub(crate) fn set_claim_activation(
        &self,
        claim_id: &ClaimId,
        row: &mut ClaimRow,
        activation_height: i32,
    ) -> Result<()> {
        self.del(CF_CLAIM_ACTIVATION, &db::height_key(row.activation_height, &claim_id.0))?;
        row.activation_height = activation_height;
        self.put(CF_CLAIM_ACTIVATION, &db::height_key(row.activation_height, &claim_id.0), &[])?;
        self.put(CF_CLAIM, &claim_id.0, &bincode::serialize(row)?)
    }

    /// All claims filed under exactly `node_name`, in claim-id order.
    pub(crate) fn claims_for_node(&self, node_name: &[u8]) -> Result<Vec<(ClaimId, ClaimRow)>> {
        let mut ids = Vec::new();
        self.view_scan(CF_CLAIM_NODE, node_name, |key, _| {
            if !key.starts_with(node_name) {
                return Ok(false);
            }
            if key.len() == node_name.len() + 20 {
                if let Some((_, id)) = db::split_claim_node_key(key) {
                    ids.push(id);
                }
            }
            Ok(true)
        })?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_claim(&id)? {
                Some(row) => out.push((id, row)),
                None => warn!("claim index entry without a row: {}", id),
            }
        }
        Ok(out)
    }

    /// Claim ids listed in a height index at exactly `height`.
    pub(crate) fn claim_ids_at(&self, cf_name: &str, height: i32) -> Result<Vec<ClaimId>> {
        let prefix = db::height_prefix(height);
        let mut ids = Vec::new();
        self.view_scan(cf_name, &prefix, |key, _| {
            if !key.starts_with(&prefix) {
                return Ok(false);
            }
            if key.len() == 4 + 20 {
                let mut bytes = [0u8; 20];
                bytes.copy_from_slice(&key[4..]);
                ids.push(ClaimId(bytes));
            }
            Ok(true)
        })?;
        Ok(ids)
    }

    // ── Support rows and their indexes ──────────────────────────────────

    pub(crate) fn get_support(&self, outpoint: &OutPoint) -> Result<Option<SupportRow>> {
        match self.view_get(CF_SUPPORT, &outpoint.to_key())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn insert_support_row(&self, row: &SupportRow) -> Result<()> {
        let point = row.outpoint().to_key();
        self.put(CF_SUPPORT, &point, &bincode::serialize(row)?)?;
        self.put(CF_SUPPORT_NODE, &db::support_node_key(&row.node_name, &point), &[])?;
        self.put(CF_SUPPORT_CLAIM, &db::support_claim_key(&row.supported_claim_id, &point), &[])?;
        self.put(CF_SUPPORT_ACTIVATION, &db::height_key(row.activation_height, &point), &[])?;
        self.put(CF_SUPPORT_EXPIRATION, &db::height_key(row.expiration_height, &point), &[])
    }

    pub(crate) fn delete_support_row(&self, row: &SupportRow) -> Result<()> {
        let point = row.outpoint().to_key();
        self.del(CF_SUPPORT, &point)?;
        self.del(CF_SUPPORT_NODE, &db::support_node_key(&row.node_name, &point))?;
        self.del(CF_SUPPORT_CLAIM, &db::support_claim_key(&row.supported_claim_id, &point))?;
        self.del(CF_SUPPORT_ACTIVATION, &db::height_key(row.activation_height, &point))?;
        self.del(CF_SUPPORT_EXPIRATION, &db::height_key(row.expiration_height, &point))
    }

    /// Move a support's activation height, keeping the activation index
    /// exact.
    pub(crate) fn set_support_activation(
        &self,
        row: &mut SupportRow,
        activation_height: i32,
    ) -> Result<()> {
        let point = row.outpoint().to_key();
        self.del(CF_SUPPORT_ACTIVATION, &db::height_key(row.activation_height, &point))?;
        row.activation_height = activation_height;
        self.put(CF_SUPPORT_ACTIVATION, &db::height_key(row.activation_height, &point), &[])?;
        self.put(CF_SUPPORT, &point, &bincode::serialize(row)?)
    }

    /// All supports filed under exactly `node_name`.
    pub(crate) fn supports_for_node(&self, node_name: &[u8]) -> Result<Vec<SupportRow>> {
        let mut points = Vec::new();
        self.view_scan(CF_SUPPORT_NODE, node_name, |key, _| {
            if !key.starts_with(node_name) {
                return Ok(false);
            }
            if key.len() == node_name.len() + 36 {
                if let Some((_, point)) = db::split_support_node_key(key) {
                    if let Some(point) = OutPoint::from_key(point) {
                        points.push(point);
                    }
                }
            }
            Ok(true)
        })?;
        let mut out = Vec::with_capacity(points.len());
        for point in points {
            match self.get_support(&point)? {
                Some(row) => out.push(row),
                None => warn!("support index entry without a row: {:?}", point),
            }
        }
        Ok(out)
    }

    /// All supports referencing `claim_id`, regardless of the name they are
    /// filed under.
    pub(crate) fn supports_for_claim(&self, claim_id: &ClaimId) -> Result<Vec<SupportRow>> {
        let mut points = Vec::new();
        self.view_scan(CF_SUPPORT_CLAIM, &claim_id.0, |key, _| {
            if !key.starts_with(&claim_id.0) {
                return Ok(false);
            }
            if let Some(point) = OutPoint::from_key(&key[20..]) {
                points.push(point);
            }
            Ok(true)
        })?;
        let mut out = Vec::with_capacity(points.len());
        for point in points {
            match self.get_support(&point)? {
                Some(row) => out.push(row),
                None => warn!("support index entry without a row: {:?}", point),
            }
        }
        Ok(out)
    }

    /// Outpoints listed in a support height index at exactly `height`.
    pub(crate) fn support_points_at(&self, cf_name: &str, height: i32) -> Result<Vec<OutPoint>> {
        let prefix = db::height_prefix(height);
        let mut points = Vec::new();
        self.view_scan(cf_name, &prefix, |key, _| {
            if !key.starts_with(&prefix) {
                return Ok(false);
            }
            if let Some(point) = OutPoint::from_key(&key[4..]) {
                points.push(point);
            }
            Ok(true)
        })?;
        Ok(points)
    }

    // ── Takeover rows ───────────────────────────────────────────────────

    /// Latest takeover record for `name`: the recorded winner (None when the
    /// name went uncontrolled) and the height it was recorded at.
    pub(crate) fn last_takeover_entry(&self, name: &[u8]) -> Result<Option<(Option<ClaimId>, i32)>> {
        let prefix = db::takeover_prefix(name);
        let mut entry = None;
        self.view_scan(CF_TAKEOVER, &prefix, |key, value| {
            if key.starts_with(&prefix) {
                if let Some(height) = db::takeover_key_height(key) {
                    entry = Some((db::decode_takeover(value), height));
                }
            }
            Ok(false)
        })?;
        Ok(entry)
    }

    /// Current winner of `name`, if the name is controlled.
    pub fn get_last_takeover_for_name(&self, name: &[u8]) -> Result<Option<(ClaimId, i32)>> {
        Ok(self
            .last_takeover_entry(name)?
            .and_then(|(claim_id, height)| claim_id.map(|id| (id, height))))
    }

    /// Takeover height as used by node hashing: the latest record's height,
    /// or 0 when there is no record or the name is uncontrolled.
    pub(crate) fn takeover_height_for_hash(&self, name: &[u8]) -> Result<i32> {
        Ok(match self.last_takeover_entry(name)? {
            Some((Some(_), height)) => height,
            _ => 0,
        })
    }

    pub(crate) fn put_takeover(
        &self,
        name: &[u8],
        height: i32,
        claim_id: Option<&ClaimId>,
    ) -> Result<()> {
        self.put(CF_TAKEOVER, &db::takeover_key(name, height), &db::encode_takeover(claim_id))?;
        self.put(CF_TAKEOVER_HEIGHT, &db::takeover_height_key(height, name), &[])
    }

    // ── Claim and support operations ────────────────────────────────────

    /// Insert a claim. A `valid_height` of zero or less is computed from the
    /// takeover-delay rule; an `original_height` of zero or less defaults to
    /// `height`. Always succeeds barring storage failure.
    #[allow(clippy::too_many_arguments)]
    pub fn add_claim(
        &mut self,
        name: &[u8],
        outpoint: &OutPoint,
        claim_id: &ClaimId,
        amount: i64,
        height: i32,
        mut valid_height: i32,
        mut original_height: i32,
    ) -> Result<bool> {
        self.ensure_transacting();

        if valid_height <= 0 {
            valid_height = height + self.get_delay_for_name(name, claim_id)?;
        }
        if original_height <= 0 {
            original_height = height;
        }

        let node_name = self.adjust_name_for_valid_height(name, valid_height);
        let expires = self.expiration_time() + height;

        let row = ClaimRow {
            name: name.to_vec(),
            node_name: node_name.clone(),
            txid: outpoint.txid,
            tx_n: outpoint.n,
            original_height,
            update_height: height,
            valid_height,
            activation_height: valid_height,
            expiration_height: expires,
            amount,
        };
        self.insert_claim_row(claim_id, &row)?;

        if valid_height < self.next_height {
            self.upsert_dirty_node(&node_name)?;
        }
        Ok(true)
    }

    /// Insert a support. A negative `valid_height` is computed from the
    /// takeover-delay rule.
    pub fn add_support(
        &mut self,
        name: &[u8],
        outpoint: &OutPoint,
        supported_claim_id: &ClaimId,
        amount: i64,
        height: i32,
        mut valid_height: i32,
    ) -> Result<bool> {
        self.ensure_transacting();

        if valid_height < 0 {
            valid_height = height + self.get_delay_for_name(name, supported_claim_id)?;
        }

        let node_name = self.adjust_name_for_valid_height(name, valid_height);
        let expires = self.expiration_time() + height;

        let row = SupportRow {
            supported_claim_id: *supported_claim_id,
            name: name.to_vec(),
            node_name: node_name.clone(),
            txid: outpoint.txid,
            tx_n: outpoint.n,
            block_height: height,
            valid_height,
            activation_height: valid_height,
            expiration_height: expires,
            amount,
        };
        self.insert_support_row(&row)?;

        if valid_height < self.next_height {
            self.mark_node_dirty(&node_name)?;
        }
        Ok(true)
    }

    /// Delete the unexpired claim matching `claim_id` and `outpoint`.
    /// Returns the data an undo needs, or `None` when no such claim exists.
    pub fn remove_claim(
        &mut self,
        claim_id: &ClaimId,
        outpoint: &OutPoint,
    ) -> Result<Option<RemovedClaim>> {
        self.ensure_transacting();

        let row = match self.get_claim(claim_id)? {
            Some(row)
                if row.txid == outpoint.txid
                    && row.tx_n == outpoint.n
                    && row.expiration_height >= self.next_height =>
            {
                row
            }
            _ => return Ok(None),
        };

        self.delete_claim_row(claim_id, &row)?;
        self.mark_node_dirty(&row.node_name)?;

        // when a parent node keeps the name alive after this removal, a
        // re-add inside the legacy window must not pay a takeover delay
        let config = self.base.config();
        if self.next_height >= config.min_removal_workaround_height
            && self.next_height < config.max_removal_workaround_height
            && self.empty_node_should_exist_at(&row.node_name, 1)?
        {
            self.removal_workaround.insert(row.node_name.clone());
        }

        Ok(Some(RemovedClaim {
            node_name: row.node_name,
            valid_height: row.activation_height,
            original_height: row.original_height,
        }))
    }

    /// Delete the unexpired support at `outpoint`. Returns the data an undo
    /// needs, or `None` when no such support exists.
    pub fn remove_support(&mut self, outpoint: &OutPoint) -> Result<Option<RemovedSupport>> {
        let row = match self.get_support(outpoint)? {
            Some(row) if row.expiration_height >= self.next_height => row,
            _ => return Ok(None),
        };
        self.ensure_transacting();

        self.delete_support_row(&row)?;
        self.mark_node_dirty(&row.node_name)?;

        Ok(Some(RemovedSupport {
            node_name: row.node_name,
            valid_height: row.activation_height,
        }))
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Whether a live claim with `outpoint` is filed under `name`.
    pub fn have_claim(&self, name: &[u8], outpoint: &OutPoint) -> Result<bool> {
        Ok(self.claims_for_node(name)?.iter().any(|(_, row)| {
            row.txid == outpoint.txid && row.tx_n == outpoint.n && row.is_live(self.next_height)
        }))
    }

    /// Whether a live support with `outpoint` is filed under `name`.
    pub fn have_support(&self, name: &[u8], outpoint: &OutPoint) -> Result<bool> {
        Ok(self.supports_for_node(name)?.iter().any(|row| {
            row.txid == outpoint.txid && row.tx_n == outpoint.n && row.is_live(self.next_height)
        }))
    }

    /// Activation height of a pending (not yet active) claim under `name`
    /// with `outpoint`, if one exists.
    pub fn have_claim_in_queue(&self, name: &[u8], outpoint: &OutPoint) -> Result<Option<i32>> {
        Ok(self
            .claims_for_node(name)?
            .iter()
            .find(|(_, row)| {
                row.txid == outpoint.txid
                    && row.tx_n == outpoint.n
                    && row.activation_height >= self.next_height
                    && row.expiration_height >= row.activation_height
            })
            .map(|(_, row)| row.activation_height))
    }

    /// Activation height of a pending support under `name` with `outpoint`,
    /// if one exists.
    pub fn have_support_in_queue(&self, name: &[u8], outpoint: &OutPoint) -> Result<Option<i32>> {
        Ok(self
            .supports_for_node(name)?
            .iter()
            .find(|row| {
                row.txid == outpoint.txid
                    && row.tx_n == outpoint.n
                    && row.activation_height >= self.next_height
                    && row.expiration_height >= row.activation_height
            })
            .map(|row| row.activation_height))
    }

    /// All unexpired supports filed under `name`, including ones that are
    /// not yet active.
    pub fn get_supports_for_name(&self, name: &[u8]) -> Result<Vec<SupportValue>> {
        Ok(self
            .supports_for_node(name)?
            .into_iter()
            .filter(|row| row.expiration_height >= self.next_height)
            .map(|row| SupportValue {
                outpoint: row.outpoint(),
                supported_claim_id: row.supported_claim_id,
                height: row.block_height,
                valid_at_height: row.activation_height,
                amount: row.amount,
            })
            .collect())
    }

    /// Best live claim under `name` at `at_height`, by effective amount with
    /// update-height and outpoint tie-breakers.
    pub(crate) fn best_claim_at(&self, name: &[u8], at_height: i32) -> Result<Option<ClaimValue>> {
        let mut best: Option<ClaimValue> = None;
        for (claim_id, row) in self.claims_for_node(name)? {
            if !(row.activation_height < at_height && row.expiration_height >= at_height) {
                continue;
            }
            let support_amount: i64 = self
                .supports_for_claim(&claim_id)?
                .iter()
                .filter(|s| {
                    s.node_name == row.node_name
                        && s.activation_height < at_height
                        && s.expiration_height >= at_height
                })
                .map(|s| s.amount)
                .sum();
            let candidate = ClaimValue {
                outpoint: row.outpoint(),
                claim_id,
                height: row.update_height,
                valid_at_height: row.activation_height,
                amount: row.amount,
                effective_amount: row.amount + support_amount,
            };
            best = Some(match best.take() {
                Some(current) if !claim_value_outranks(&candidate, &current) => current,
                _ => candidate,
            });
        }
        Ok(best)
    }

    /// The claim currently controlling `name`, if any.
    pub fn get_info_for_name(&self, name: &[u8]) -> Result<Option<ClaimValue>> {
        self.best_claim_at(name, self.next_height)
    }

    /// Every unexpired claim under `name` with its supports, ordered by
    /// descending effective amount, plus the supports matching no claim.
    pub fn get_claims_for_name(&self, name: &[u8]) -> Result<ClaimsForName> {
        let last_takeover_height =
            self.last_takeover_entry(name)?.map(|(_, height)| height).unwrap_or(0);
        let mut supports = self.get_supports_for_name(name)?;

        let mut claims = Vec::new();
        for (claim_id, row) in self.claims_for_node(name)? {
            if row.expiration_height < self.next_height {
                continue;
            }
            let mut effective_amount =
                if row.activation_height < self.next_height { row.amount } else { 0 };
            let mut mine = Vec::new();
            supports.retain(|support| {
                if support.supported_claim_id == claim_id {
                    if support.valid_at_height < self.next_height {
                        effective_amount += support.amount;
                    }
                    mine.push(support.clone());
                    false
                } else {
                    true
                }
            });
            claims.push(ClaimNSupports {
                claim: ClaimValue {
                    outpoint: row.outpoint(),
                    claim_id,
                    height: row.update_height,
                    valid_at_height: row.activation_height,
                    amount: row.amount,
                    effective_amount,
                },
                effective_amount,
                original_height: row.original_height,
                supports: mine,
            });
        }
        claims.sort_by(|a, b| {
            b.effective_amount
                .cmp(&a.effective_amount)
                .then(a.claim.height.cmp(&b.claim.height))
                .then(a.claim.outpoint.to_key().cmp(&b.claim.outpoint.to_key()))
        });

        Ok(ClaimsForName {
            name: name.to_vec(),
            last_takeover_height,
            claims,
            unmatched_supports: supports,
        })
    }

    /// Resolve a reversed-claim-id prefix to its unique live claim. Returns
    /// `None` when no live claim matches or more than one does.
    pub fn find_name_for_claim(&self, prefix: &[u8]) -> Result<Option<(Vec<u8>, ClaimValue)>> {
        if prefix.len() > 20 {
            return Ok(None);
        }
        let mut ids = Vec::new();
        self.view_scan(CF_CLAIM_REVERSE, prefix, |key, _| {
            if !key.starts_with(prefix) || key.len() != 20 {
                return Ok(false);
            }
            let mut reversed = [0u8; 20];
            reversed.copy_from_slice(key);
            reversed.reverse();
            ids.push(ClaimId(reversed));
            Ok(true)
        })?;

        let mut found = None;
        for claim_id in ids {
            let row = match self.get_claim(&claim_id)? {
                Some(row) if row.is_live(self.next_height) => row,
                _ => continue,
            };
            if found.is_some() {
                return Ok(None);
            }
            found = Some((
                row.node_name.clone(),
                ClaimValue {
                    outpoint: row.outpoint(),
                    claim_id,
                    height: row.update_height,
                    valid_at_height: row.activation_height,
                    amount: row.amount,
                    effective_amount: 0,
                },
            ));
        }
        Ok(found)
    }

    /// Distinct names holding at least one live claim, in ascending order.
    pub fn get_names_in_trie(&self) -> Result<Vec<Vec<u8>>> {
        let mut names = BTreeSet::new();
        self.view_scan(CF_CLAIM, &[], |_, value| {
            let row: ClaimRow = bincode::deserialize(value)?;
            if row.is_live(self.next_height) {
                names.insert(row.node_name);
            }
            Ok(true)
        })?;
        Ok(names.into_iter().collect())
    }

    /// Count of distinct names holding at least one live claim.
    pub fn get_total_names_in_trie(&self) -> Result<usize> {
        Ok(self.get_names_in_trie()?.len())
    }

    /// Count of live claims.
    pub fn get_total_claims_in_trie(&self) -> Result<usize> {
        let mut count = 0usize;
        self.view_scan(CF_CLAIM, &[], |_, value| {
            let row: ClaimRow = bincode::deserialize(value)?;
            if row.is_live(self.next_height) {
                count += 1;
            }
            Ok(true)
        })?;
        Ok(count)
    }

    /// Total amount held by live claims; with `controlling_only`, only each
    /// name's winning claim counts.
    pub fn get_total_value_of_claims_in_trie(&self, controlling_only: bool) -> Result<i64> {
        if !controlling_only {
            let mut total = 0i64;
            self.view_scan(CF_CLAIM, &[], |_, value| {
                let row: ClaimRow = bincode::deserialize(value)?;
                if row.is_live(self.next_height) {
                    total += row.amount;
                }
                Ok(true)
            })?;
            return Ok(total);
        }
        let mut total = 0i64;
        for name in self.get_names_in_trie()? {
            if let Some(winner) = self.best_claim_at(&name, self.next_height)? {
                total += winner.amount;
            }
        }
        Ok(total)
    }

    /// Claims whose activation arrived at `height` without being fresh
    /// inserts at that height.
    pub fn get_activated_claims(&self, height: i32) -> Result<Vec<ClaimId>> {
        let mut out = Vec::new();
        for claim_id in self.claim_ids_at(CF_CLAIM_ACTIVATION, height)? {
            if let Some(row) = self.get_claim(&claim_id)? {
                if row.update_height < height {
                    out.push(claim_id);
                }
            }
        }
        Ok(out)
    }

    /// Claims that expired at `height`.
    pub fn get_expired_claims(&self, height: i32) -> Result<Vec<ClaimId>> {
        let mut out = Vec::new();
        for claim_id in self.claim_ids_at(CF_CLAIM_EXPIRATION, height)? {
            if let Some(row) = self.get_claim(&claim_id)? {
                if row.update_height < height {
                    out.push(claim_id);
                }
            }
        }
        Ok(out)
    }

    /// Claims that gained an activating support at `height`.
    pub fn get_claims_with_activated_supports(&self, height: i32) -> Result<Vec<ClaimId>> {
        let mut ids = BTreeSet::new();
        for point in self.support_points_at(CF_SUPPORT_ACTIVATION, height)? {
            if let Some(row) = self.get_support(&point)? {
                if row.block_height < height {
                    ids.insert(row.supported_claim_id);
                }
            }
        }
        Ok(ids.into_iter().collect())
    }

    /// Claims that lost an expiring support at `height`.
    pub fn get_claims_with_expired_supports(&self, height: i32) -> Result<Vec<ClaimId>> {
        let mut ids = BTreeSet::new();
        for point in self.support_points_at(CF_SUPPORT_EXPIRATION, height)? {
            if let Some(row) = self.get_support(&point)? {
                if row.block_height < height {
                    ids.insert(row.supported_claim_id);
                }
            }
        }
        Ok(ids.into_iter().collect())
    }

    /// Names the cache considers dirty; exposed for diagnostics.
    pub fn dirty_names(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.dirty.iter()
    }
}

/// Ordering used to pick a name's winner: effective amount descending, then
/// update height ascending, then outpoint ascending.
fn claim_value_outranks(a: &ClaimValue, b: &ClaimValue) -> bool {
    (std::cmp::Reverse(a.effective_amount), a.height, a.outpoint.to_key())
        < (std::cmp::Reverse(b.effective_amount), b.height, b.outpoint.to_key())
}
