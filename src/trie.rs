//! Base claim trie: store ownership, consensus parameters, schema seeding
//!
//! A [`ClaimTrie`] owns the database and the consensus configuration. All
//! reads and mutations go through [`ClaimTrieCache`](crate::ClaimTrieCache)
//! instances borrowing it; the base only tracks the committed `next_height`
//! and seeds the schema at open time.

use std::collections::BTreeSet;
use std::path::Path;

use parking_lot::RwLock;
use tracing::{error, info};

use crate::db::{TrieDb, CF_CLAIM, CF_NODE};
use crate::error::Result;
use crate::hashes::EMPTY_TRIE_HASH;
use crate::types::{ClaimRow, NodeRow};
use crate::workarounds;

/// Injectable name-normalization hook applied past the normalization fork.
pub type NameNormalizer = Box<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// Consensus parameters, fixed at construction
#[derive(Debug, Clone)]
pub struct ClaimTrieConfig {
    /// Storage cache budget in bytes
    pub cache_bytes: usize,
    /// Height the trie starts at; the first block applied is this height
    pub height: i32,
    /// Height at which claim names start being normalized for filing
    pub normalization_fork_height: i32,
    /// First height of the legacy removal-workaround window
    pub min_removal_workaround_height: i32,
    /// First height past the legacy removal-workaround window
    pub max_removal_workaround_height: i32,
    /// Claim lifetime in blocks before the expiration fork
    pub original_expiration_time: i32,
    /// Claim lifetime in blocks at and after the expiration fork
    pub extended_expiration_time: i32,
    /// Height at which the extended expiration time applies
    pub extended_expiration_fork_height: i32,
    /// Height at which every claim participates in the Merkle root
    pub all_claims_in_merkle_fork_height: i32,
    /// Divisor turning ownership duration into takeover delay
    pub proportional_delay_factor: i32,
    /// Forced takeovers keyed by (height, name); consulted only below the
    /// workaround cutoff height
    pub takeover_workarounds: BTreeSet<(i32, Vec<u8>)>,
}

impl Default for ClaimTrieConfig {
    fn default() -> Self {
        Self {
            cache_bytes: 32 * 1024 * 1024,
            height: 0,
            normalization_fork_height: 539_940,
            min_removal_workaround_height: 297_706,
            max_removal_workaround_height: 658_300,
            original_expiration_time: 262_974,
            extended_expiration_time: 2_102_400,
            extended_expiration_fork_height: 400_155,
            all_claims_in_merkle_fork_height: 658_310,
            proportional_delay_factor: 32,
            takeover_workarounds: workarounds::builtin_takeover_workarounds(),
        }
    }
}

/// Persistent claim trie bound to a database directory
pub struct ClaimTrie {
    db: TrieDb,
    config: ClaimTrieConfig,
    next_height: RwLock<i32>,
    normalizer: Option<NameNormalizer>,
}

impl ClaimTrie {
    /// Open or create the trie at `path`. With `wipe` set, all four tables
    /// are cleared before the root is seeded.
    pub fn open<P: AsRef<Path>>(path: P, config: ClaimTrieConfig, wipe: bool) -> Result<Self> {
        let db = TrieDb::open(path, config.cache_bytes)?;
        if wipe {
            db.wipe()?;
        }

        // ensure that we always have our root node
        if db.get(CF_NODE, b"")?.is_none() {
            let root = NodeRow { parent: None, hash: Some(EMPTY_TRIE_HASH) };
            db.put(CF_NODE, b"", &bincode::serialize(&root)?)?;
        }

        info!("Claim trie opened at height {}", config.height);
        Ok(Self {
            db,
            next_height: RwLock::new(config.height),
            config,
            normalizer: None,
        })
    }

    /// Install a name-normalization hook. The hook is applied to names filed
    /// at or past the normalization fork height.
    pub fn with_normalizer(mut self, normalizer: NameNormalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// The underlying database.
    pub(crate) fn db(&self) -> &TrieDb {
        &self.db
    }

    /// Consensus configuration.
    pub fn config(&self) -> &ClaimTrieConfig {
        &self.config
    }

    /// Height the next applied block will have, as of the last flush.
    pub fn next_height(&self) -> i32 {
        *self.next_height.read()
    }

    pub(crate) fn set_next_height(&self, height: i32) {
        *self.next_height.write() = height;
    }

    /// Configured storage cache budget in bytes.
    pub fn cache_bytes(&self) -> usize {
        self.config.cache_bytes
    }

    /// Force WAL durability. Returns false on storage failure.
    pub fn sync_to_disk(&self) -> bool {
        match self.db.sync_to_disk() {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to sync claim trie to disk: {}", e);
                false
            }
        }
    }

    /// Whether any claim is live at the current height. Reads committed
    /// state only; used by tests and sanity checks.
    pub fn empty(&self) -> Result<bool> {
        let height = self.next_height();
        let mut any_live = false;
        self.db.scan_from(CF_CLAIM, &[], |_, value| {
            let row: ClaimRow = bincode::deserialize(value)?;
            if row.is_live(height) {
                any_live = true;
                return Ok(false);
            }
            Ok(true)
        })?;
        Ok(!any_live)
    }

    /// The name a record inserted with `valid_height` is filed under.
    pub fn adjust_name_for_valid_height(&self, name: &[u8], valid_height: i32) -> Vec<u8> {
        match &self.normalizer {
            Some(normalize) if valid_height >= self.config.normalization_fork_height => {
                normalize(name)
            }
            _ => name.to_vec(),
        }
    }
}
