//! # claimtrie
//!
//! Persistent, authenticated radix-trie index of blockchain name claims.
//!
//! This crate provides:
//! - Durable claim, support, node and takeover tables over RocksDB
//! - A single-writer transactional cache with lazy write transactions
//! - The activation/expiration/takeover state machine driven per block
//! - Consensus-identical Merkle roots and inclusion proofs over all names
//!
//! The blockchain node around this crate decodes transaction scripts and
//! drives the cache per block: remove spent claims and supports, add new
//! ones, then [`ClaimTrieCache::increment_block`] and
//! [`ClaimTrieCache::flush`]. Rewinding a block runs
//! [`ClaimTrieCache::decrement_block`], the undo operations, then
//! [`ClaimTrieCache::finalize_decrement`].

#![warn(missing_docs, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod block;
pub mod cache;
pub mod db;
pub mod error;
pub mod hashes;
pub mod merkle;
pub mod scriptop;
mod structure;
pub mod trie;
pub mod types;
pub mod workarounds;

pub use cache::{ClaimTrieCache, RemovedClaim, RemovedSupport};
pub use error::{Error, Result};
pub use hashes::EMPTY_TRIE_HASH;
pub use merkle::{verify_proof, ProofNode, ProofValue, TrieProof};
pub use scriptop::{ClaimScriptHandler, ClaimScriptOp, ClaimScriptOutcome};
pub use trie::{ClaimTrie, ClaimTrieConfig, NameNormalizer};
pub use types::{
    ClaimId, ClaimNSupports, ClaimValue, ClaimsForName, OutPoint, SupportValue,
};
