//! Script-operation dispatcher
//!
//! The surrounding node decodes transaction outputs into claim operations;
//! this module maps those operations onto the cache. Four handlers cover the
//! four directions a block driver needs: applying an output, undoing an
//! applied output, spending an input, and undoing a spend during disconnect.

use crate::cache::ClaimTrieCache;
use crate::error::Result;
use crate::types::{ClaimId, OutPoint};

/// A decoded claim operation carried by a transaction output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimScriptOp {
    /// `CLAIM_NAME`: mint a fresh claim; its id derives from the outpoint
    ClaimName {
        /// Claimed name
        name: Vec<u8>,
    },
    /// `UPDATE_CLAIM`: a new version of an existing claim
    UpdateClaim {
        /// Claimed name
        name: Vec<u8>,
        /// Id of the claim being updated
        claim_id: ClaimId,
    },
    /// `SUPPORT_CLAIM`: add amount behind an existing claim
    SupportClaim {
        /// Supported name
        name: Vec<u8>,
        /// Id of the supported claim
        claim_id: ClaimId,
    },
}

/// Direction a claim operation is applied in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimScriptHandler {
    /// Apply a fresh output at `height`
    Add {
        /// Creating outpoint
        point: OutPoint,
        /// Output amount
        amount: i64,
        /// Height of the containing block
        height: i32,
    },
    /// Undo an applied output during block disconnect
    UndoAdd {
        /// Creating outpoint
        point: OutPoint,
    },
    /// Spend an input that carried a claim operation
    Spend {
        /// Spent outpoint
        point: OutPoint,
    },
    /// Re-add a spent output during block disconnect, restoring the heights
    /// captured when it was spent
    UndoSpend {
        /// Spent outpoint
        point: OutPoint,
        /// Original output amount
        amount: i64,
        /// Height of the block that created the output
        height: i32,
        /// Activation height captured at spend time
        valid_height: i32,
        /// First height of the claim id, captured at spend time
        original_height: i32,
    },
}

/// What applying a handler did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimScriptOutcome {
    /// The operation took effect
    Applied,
    /// A spend took effect; the captured heights feed the matching undo
    AppliedSpend {
        /// Activation height of the removed record
        valid_height: i32,
        /// First height of the removed claim id; zero for supports
        original_height: i32,
    },
    /// The precondition failed (unknown outpoint); no state changed
    Rejected,
}

impl ClaimScriptHandler {
    /// Dispatch `op` against `cache` in this handler's direction.
    pub fn apply(
        &self,
        cache: &mut ClaimTrieCache<'_>,
        op: &ClaimScriptOp,
    ) -> Result<ClaimScriptOutcome> {
        match self {
            ClaimScriptHandler::Add { point, amount, height } => match op {
                ClaimScriptOp::ClaimName { name } => {
                    let claim_id = ClaimId::from_outpoint(point);
                    cache.add_claim(name, point, &claim_id, *amount, *height, 0, 0)?;
                    Ok(ClaimScriptOutcome::Applied)
                }
                ClaimScriptOp::UpdateClaim { name, claim_id } => {
                    cache.add_claim(name, point, claim_id, *amount, *height, 0, 0)?;
                    Ok(ClaimScriptOutcome::Applied)
                }
                ClaimScriptOp::SupportClaim { name, claim_id } => {
                    cache.add_support(name, point, claim_id, *amount, *height, -1)?;
                    Ok(ClaimScriptOutcome::Applied)
                }
            },
            ClaimScriptHandler::UndoAdd { point } => match op {
                ClaimScriptOp::ClaimName { name: _ } => {
                    let claim_id = ClaimId::from_outpoint(point);
                    Ok(outcome_of(cache.remove_claim(&claim_id, point)?.is_some()))
                }
                ClaimScriptOp::UpdateClaim { claim_id, .. } => {
                    Ok(outcome_of(cache.remove_claim(claim_id, point)?.is_some()))
                }
                ClaimScriptOp::SupportClaim { .. } => {
                    Ok(outcome_of(cache.remove_support(point)?.is_some()))
                }
            },
            ClaimScriptHandler::Spend { point } => match op {
                ClaimScriptOp::ClaimName { name: _ } => {
                    let claim_id = ClaimId::from_outpoint(point);
                    Ok(spend_outcome(cache.remove_claim(&claim_id, point)?))
                }
                ClaimScriptOp::UpdateClaim { claim_id, .. } => {
                    Ok(spend_outcome(cache.remove_claim(claim_id, point)?))
                }
                ClaimScriptOp::SupportClaim { .. } => {
                    Ok(match cache.remove_support(point)? {
                        Some(removed) => ClaimScriptOutcome::AppliedSpend {
                            valid_height: removed.valid_height,
                            original_height: 0,
                        },
                        None => ClaimScriptOutcome::Rejected,
                    })
                }
            },
            ClaimScriptHandler::UndoSpend { point, amount, height, valid_height, original_height } => {
                match op {
                    ClaimScriptOp::ClaimName { name } => {
                        let claim_id = ClaimId::from_outpoint(point);
                        cache.add_claim(
                            name,
                            point,
                            &claim_id,
                            *amount,
                            *height,
                            *valid_height,
                            *original_height,
                        )?;
                        Ok(ClaimScriptOutcome::Applied)
                    }
                    ClaimScriptOp::UpdateClaim { name, claim_id } => {
                        cache.add_claim(
                            name,
                            point,
                            claim_id,
                            *amount,
                            *height,
                            *valid_height,
                            *original_height,
                        )?;
                        Ok(ClaimScriptOutcome::Applied)
                    }
                    ClaimScriptOp::SupportClaim { name, claim_id } => {
                        cache.add_support(name, point, claim_id, *amount, *height, *valid_height)?;
                        Ok(ClaimScriptOutcome::Applied)
                    }
                }
            }
        }
    }
}

fn outcome_of(applied: bool) -> ClaimScriptOutcome {
    if applied {
        ClaimScriptOutcome::Applied
    } else {
        ClaimScriptOutcome::Rejected
    }
}

fn spend_outcome(removed: Option<crate::cache::RemovedClaim>) -> ClaimScriptOutcome {
    match removed {
        Some(removed) => ClaimScriptOutcome::AppliedSpend {
            valid_height: removed.valid_height,
            original_height: removed.original_height,
        },
        None => ClaimScriptOutcome::Rejected,
    }
}
