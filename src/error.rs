//! Error types for claim-trie storage operations

use thiserror::Error;

/// Claim-trie error type
#[derive(Debug, Error)]
pub enum Error {
    /// Storage backend error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(#[from] rocksdb::Error),

    /// Row serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Invalid or corrupt on-disk data
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for claim-trie operations
pub type Result<T> = std::result::Result<T, Error>;
