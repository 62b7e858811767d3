//! Consensus workaround tables
//!
//! Old versions of the chain software mishandled a few takeover-height
//! computations. The affected `(height, name)` pairs force a takeover even
//! when the normal rule would not fire; none exist at or past the cutoff.

use std::collections::BTreeSet;

/// No forced takeover exists at or past this height.
pub const TAKEOVER_WORKAROUND_CUTOFF: i32 = 658_300;

/// The built-in forced-takeover pairs.
// TODO: import the historical mainnet pair list before enabling mainnet sync
pub fn builtin_takeover_workarounds() -> BTreeSet<(i32, Vec<u8>)> {
    BTreeSet::new()
}
