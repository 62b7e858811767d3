//! RocksDB wrapper for the claim-trie tables
//!
//! This module provides the storage backend for the claim trie:
//! - One column family per logical table: nodes, claims, supports, takeovers
//! - One column family per secondary index used by the hot queries
//! - Pessimistic transactions so a cache can read its own uncommitted writes
//! - Bloom filters and LZ4 compression on every column family
//! - Write-ahead logging; an explicit sync call forces disk durability

use crate::error::Result;
use crate::types::ClaimId;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, IteratorMode, Options,
    Transaction, TransactionDB, TransactionDBOptions, TransactionOptions, WriteOptions,
};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Node table: name -> parent + subtree hash
pub const CF_NODE: &str = "node";
/// Node children index: (parent length, parent, child name) -> ()
pub const CF_NODE_PARENT: &str = "node_parent";
/// Claim table: claim id -> row
pub const CF_CLAIM: &str = "claim";
/// Claim node-name index: (node name, claim id) -> ()
pub const CF_CLAIM_NODE: &str = "claim_node_name";
/// Claim activation index: (height, claim id) -> ()
pub const CF_CLAIM_ACTIVATION: &str = "claim_activation_height";
/// Claim expiration index: (height, claim id) -> ()
pub const CF_CLAIM_EXPIRATION: &str = "claim_expiration_height";
/// Reversed-claim-id index: reversed id -> ()
pub const CF_CLAIM_REVERSE: &str = "claim_reverse_id";
/// Support table: outpoint -> row
pub const CF_SUPPORT: &str = "support";
/// Support node-name index: (node name, outpoint) -> ()
pub const CF_SUPPORT_NODE: &str = "support_node_name";
/// Supported-claim index: (claim id, outpoint) -> ()
pub const CF_SUPPORT_CLAIM: &str = "support_claim_id";
/// Support activation index: (height, outpoint) -> ()
pub const CF_SUPPORT_ACTIVATION: &str = "support_activation_height";
/// Support expiration index: (height, outpoint) -> ()
pub const CF_SUPPORT_EXPIRATION: &str = "support_expiration_height";
/// Takeover table: (name, descending height) -> winning claim id or empty
pub const CF_TAKEOVER: &str = "takeover";
/// Takeover height index: (height, name) -> ()
pub const CF_TAKEOVER_HEIGHT: &str = "takeover_height";

/// All column families backing the trie
pub const COLUMN_FAMILIES: &[&str] = &[
    CF_NODE,
    CF_NODE_PARENT,
    CF_CLAIM,
    CF_CLAIM_NODE,
    CF_CLAIM_ACTIVATION,
    CF_CLAIM_EXPIRATION,
    CF_CLAIM_REVERSE,
    CF_SUPPORT,
    CF_SUPPORT_NODE,
    CF_SUPPORT_CLAIM,
    CF_SUPPORT_ACTIVATION,
    CF_SUPPORT_EXPIRATION,
    CF_TAKEOVER,
    CF_TAKEOVER_HEIGHT,
];

/// Transactional RocksDB database holding the claim-trie tables
pub struct TrieDb {
    db: TransactionDB,
    path: PathBuf,
    // shared block cache must outlive the column family options
    _cache: Cache,
}

impl TrieDb {
    /// Open or create the database at `path` with a shared block cache of
    /// `cache_bytes`.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created or the database
    /// cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, cache_bytes: usize) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening claim-trie database at: {}", path.display());

        if !path.exists() {
            std::fs::create_dir_all(path)?;
        }

        let cache = Cache::new_lru_cache(cache_bytes);
        let cf_descriptors = Self::column_family_descriptors(&cache);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.increase_parallelism(num_cpus::get() as i32);
        // commits do not fsync; the block driver syncs explicitly
        db_opts.set_wal_bytes_per_sync(1024 * 1024);

        let txn_opts = TransactionDBOptions::default();
        let db = TransactionDB::open_cf_descriptors(&db_opts, &txn_opts, path, cf_descriptors)
            .map_err(|e| {
                error!("Failed to open claim-trie database: {}", e);
                e
            })?;

        debug!("Claim-trie database opened with {} column families", COLUMN_FAMILIES.len());
        Ok(Self { db, path: path.to_path_buf(), _cache: cache })
    }

    fn column_family_descriptors(cache: &Cache) -> Vec<ColumnFamilyDescriptor> {
        COLUMN_FAMILIES
            .iter()
            .map(|cf_name| {
                let mut block_opts = BlockBasedOptions::default();
                block_opts.set_block_cache(cache);
                block_opts.set_bloom_filter(10.0, false);
                block_opts.set_cache_index_and_filter_blocks(true);

                let mut cf_opts = Options::default();
                cf_opts.set_block_based_table_factory(&block_opts);
                cf_opts.set_compression_type(DBCompressionType::Lz4);
                ColumnFamilyDescriptor::new(*cf_name, cf_opts)
            })
            .collect()
    }

    /// Path the database was opened at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying transactional database.
    pub fn raw(&self) -> &TransactionDB {
        &self.db
    }

    /// Get a column family handle.
    ///
    /// # Panics
    /// Panics if the column family doesn't exist; the schema is fixed at
    /// open time so this indicates a programming error.
    pub fn cf(&self, name: &str) -> &rocksdb::ColumnFamily {
        self.db
            .cf_handle(name)
            .unwrap_or_else(|| panic!("Column family '{}' not found", name))
    }

    /// Begin a write transaction.
    pub fn transaction(&self) -> Transaction<'_, TransactionDB> {
        self.db.transaction()
    }

    /// Read a value from the committed state.
    pub fn get(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get_cf(self.cf(cf_name), key)?)
    }

    /// Write a value to the committed state outside any cache transaction.
    /// Used only for schema seeding at open time.
    pub fn put(&self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<()> {
        Ok(self.db.put_cf(self.cf(cf_name), key, value)?)
    }

    /// Iterate the committed state of `cf_name` from `start`, calling `f`
    /// until it returns `false` or the column family is exhausted.
    pub fn scan_from<F>(&self, cf_name: &str, start: &[u8], mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        let iter = self
            .db
            .iterator_cf(self.cf(cf_name), IteratorMode::From(start, rocksdb::Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !f(&key, &value)? {
                break;
            }
        }
        Ok(())
    }

    /// Delete every row of every column family. Used when the trie is opened
    /// with the wipe flag for a reindex.
    pub fn wipe(&self) -> Result<()> {
        info!("Wiping claim-trie database at {}", self.path.display());
        let tx = self.db.transaction();
        for cf_name in COLUMN_FAMILIES {
            let mut keys = Vec::new();
            self.scan_from(cf_name, &[], |key, _| {
                keys.push(key.to_vec());
                Ok(true)
            })?;
            let cf = self.cf(cf_name);
            for key in keys {
                tx.delete_cf(cf, &key)?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Force WAL durability by committing a synchronous no-op write.
    pub fn sync_to_disk(&self) -> Result<()> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        let tx = self.db.transaction_opt(&write_opts, &TransactionOptions::default());
        // rewriting the root row unchanged forces a synced WAL entry
        let cf = self.cf(CF_NODE);
        if let Some(root) = tx.get_cf(cf, b"")? {
            tx.put_cf(cf, b"", &root)?;
        }
        tx.commit()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ordered key encodings
// ---------------------------------------------------------------------------

/// Big-endian height used as an index-key prefix.
pub fn height_prefix(height: i32) -> [u8; 4] {
    (height as u32).to_be_bytes()
}

/// Height index key: big-endian height followed by a fixed-width suffix.
pub fn height_key(height: i32, suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + suffix.len());
    key.extend_from_slice(&height_prefix(height));
    key.extend_from_slice(suffix);
    key
}

/// Claim node-name index key: name bytes followed by the 20-byte claim id.
/// The split point is recoverable because the id width is fixed.
pub fn claim_node_key(node_name: &[u8], claim_id: &ClaimId) -> Vec<u8> {
    let mut key = Vec::with_capacity(node_name.len() + 20);
    key.extend_from_slice(node_name);
    key.extend_from_slice(&claim_id.0);
    key
}

/// Split a claim node-name index key back into (name, claim id).
pub fn split_claim_node_key(key: &[u8]) -> Option<(&[u8], ClaimId)> {
    if key.len() < 20 {
        return None;
    }
    let (name, id) = key.split_at(key.len() - 20);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(id);
    Some((name, ClaimId(bytes)))
}

/// Support node-name index key: name bytes followed by the 36-byte outpoint.
pub fn support_node_key(node_name: &[u8], outpoint_key: &[u8; 36]) -> Vec<u8> {
    let mut key = Vec::with_capacity(node_name.len() + 36);
    key.extend_from_slice(node_name);
    key.extend_from_slice(outpoint_key);
    key
}

/// Split a support node-name index key back into (name, outpoint key).
pub fn split_support_node_key(key: &[u8]) -> Option<(&[u8], &[u8])> {
    if key.len() < 36 {
        return None;
    }
    Some(key.split_at(key.len() - 36))
}

/// Supported-claim index key: claim id followed by the outpoint.
pub fn support_claim_key(claim_id: &ClaimId, outpoint_key: &[u8; 36]) -> Vec<u8> {
    let mut key = Vec::with_capacity(20 + 36);
    key.extend_from_slice(&claim_id.0);
    key.extend_from_slice(outpoint_key);
    key
}

/// Children index key: length-prefixed parent name followed by the child
/// name. The length prefix keeps the children of different parents apart
/// even when one parent is a prefix of another.
pub fn node_parent_key(parent: &[u8], child: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + parent.len() + child.len());
    key.extend_from_slice(&(parent.len() as u16).to_be_bytes());
    key.extend_from_slice(parent);
    key.extend_from_slice(child);
    key
}

/// Prefix covering every child of `parent` in the children index.
pub fn node_parent_prefix(parent: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + parent.len());
    key.extend_from_slice(&(parent.len() as u16).to_be_bytes());
    key.extend_from_slice(parent);
    key
}

/// Takeover key: length-prefixed name followed by the bitwise-inverted
/// big-endian height, so the latest takeover for a name sorts first.
pub fn takeover_key(name: &[u8], height: i32) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + name.len() + 4);
    key.extend_from_slice(&(name.len() as u16).to_be_bytes());
    key.extend_from_slice(name);
    key.extend_from_slice(&(u32::MAX - height as u32).to_be_bytes());
    key
}

/// Prefix covering every takeover record of `name`, latest first.
pub fn takeover_prefix(name: &[u8]) -> Vec<u8> {
    node_parent_prefix(name)
}

/// Recover the height stored in a takeover key.
pub fn takeover_key_height(key: &[u8]) -> Option<i32> {
    if key.len() < 6 {
        return None;
    }
    let mut inv = [0u8; 4];
    inv.copy_from_slice(&key[key.len() - 4..]);
    Some((u32::MAX - u32::from_be_bytes(inv)) as i32)
}

/// Takeover height index key: big-endian height, then the length-prefixed
/// name.
pub fn takeover_height_key(height: i32, name: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + 2 + name.len());
    key.extend_from_slice(&height_prefix(height));
    key.extend_from_slice(&(name.len() as u16).to_be_bytes());
    key.extend_from_slice(name);
    key
}

/// Recover the name stored in a takeover height index key.
pub fn takeover_height_key_name(key: &[u8]) -> Option<&[u8]> {
    if key.len() < 6 {
        return None;
    }
    Some(&key[6..])
}

/// Encode a takeover winner: the claim id bytes, or empty for "uncontrolled".
pub fn encode_takeover(claim_id: Option<&ClaimId>) -> Vec<u8> {
    match claim_id {
        Some(id) => id.0.to_vec(),
        None => Vec::new(),
    }
}

/// Decode a takeover winner written by [`encode_takeover`].
pub fn decode_takeover(value: &[u8]) -> Option<ClaimId> {
    if value.len() == 20 {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(value);
        Some(ClaimId(bytes))
    } else {
        None
    }
}
