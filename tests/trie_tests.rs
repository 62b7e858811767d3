//! Integration tests for the claim-trie engine
//!
//! These drive complete workflows against a temporary database:
//! - Empty-trie and single-claim Merkle roots against hand-built fixtures
//! - Takeover delays, forced activations and reorgs across takeovers
//! - Support aggregation and query ordering
//! - Undo operations restoring roots and rows exactly
//! - Proof generation and pure verification
//! - Flush, reopen and consistency validation

use claimtrie::hashes::{complete_hash, sha256d, value_hash};
use claimtrie::{
    verify_proof, ClaimId, ClaimScriptHandler, ClaimScriptOp, ClaimScriptOutcome, ClaimTrie,
    ClaimTrieCache, ClaimTrieConfig, OutPoint, EMPTY_TRIE_HASH,
};
use tempfile::TempDir;

/// Config with no takeover delay scaling and the legacy windows disabled
fn test_config() -> ClaimTrieConfig {
    ClaimTrieConfig {
        height: 0,
        proportional_delay_factor: 1,
        min_removal_workaround_height: 0,
        max_removal_workaround_height: 0,
        ..ClaimTrieConfig::default()
    }
}

fn open_trie(config: ClaimTrieConfig) -> (TempDir, ClaimTrie) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let trie = ClaimTrie::open(dir.path().join("claims"), config, false)
        .expect("Failed to open claim trie");
    (dir, trie)
}

fn outpoint(seed: u8, n: u32) -> OutPoint {
    OutPoint { txid: [seed; 32], n }
}

fn claim_id(seed: u8) -> ClaimId {
    ClaimId([seed; 20])
}

fn advance(cache: &mut ClaimTrieCache<'_>, blocks: usize) {
    for _ in 0..blocks {
        assert!(cache.increment_block().unwrap());
    }
}

/// Hash of a childless node holding one claim
fn leaf_hash(point: &OutPoint, takeover_height: i32) -> [u8; 32] {
    sha256d(&value_hash(point, takeover_height))
}

/// Parent hash over (first byte, folded child hash) entries plus an optional
/// value hash
fn parent_hash(children: &[(u8, [u8; 32])], value: Option<[u8; 32]>) -> [u8; 32] {
    let mut vch = Vec::new();
    for (byte, hash) in children {
        vch.push(*byte);
        vch.extend_from_slice(hash);
    }
    if let Some(value) = value {
        vch.extend_from_slice(&value);
    }
    sha256d(&vch)
}

#[test]
fn empty_trie_hashes_to_the_sentinel() {
    let (_dir, trie) = open_trie(test_config());
    let mut cache = ClaimTrieCache::new(&trie);
    assert_eq!(cache.get_merkle_hash().unwrap(), EMPTY_TRIE_HASH);
    assert!(trie.empty().unwrap());
}

#[test]
fn single_claim_root_matches_hand_folded_fixture() {
    let (_dir, trie) = open_trie(test_config());
    let mut cache = ClaimTrieCache::new(&trie);
    advance(&mut cache, 10);

    let point = outpoint(0x11, 0);
    let id = claim_id(0xAA);
    assert!(cache.add_claim(b"foo", &point, &id, 100, 10, 0, 0).unwrap());
    advance(&mut cache, 1); // activates and takes over at 10

    let winner = cache.get_info_for_name(b"foo").unwrap().expect("claim active");
    assert_eq!(winner.claim_id, id);
    assert_eq!(winner.valid_at_height, 10);
    assert_eq!(cache.get_last_takeover_for_name(b"foo").unwrap(), Some((id, 10)));

    // root = H('f' || fold("oo" into the foo leaf))
    let mut folded = leaf_hash(&point, 10);
    complete_hash(&mut folded, b"foo", 0);
    let expected = parent_hash(&[(b'f', folded)], None);
    assert_eq!(cache.get_merkle_hash().unwrap(), expected);
    assert!(!trie.empty().unwrap());
}

#[test]
fn takeover_delay_is_proportional_to_ownership() {
    let config = ClaimTrieConfig { proportional_delay_factor: 32, ..test_config() };
    let (_dir, trie) = open_trie(config);
    let mut cache = ClaimTrieCache::new(&trie);

    advance(&mut cache, 100);
    let incumbent = claim_id(0x01);
    assert!(cache.add_claim(b"bar", &outpoint(1, 0), &incumbent, 100, 100, 0, 0).unwrap());
    advance(&mut cache, 64); // winner recorded at 100, now at height 164

    let challenger = claim_id(0x02);
    let challenger_point = outpoint(2, 0);
    assert!(cache.add_claim(b"bar", &challenger_point, &challenger, 500, 164, 0, 0).unwrap());

    // delay = min((164 - 100) / 32, 4032) = 2, so activation at 166
    assert_eq!(cache.have_claim_in_queue(b"bar", &challenger_point).unwrap(), Some(166));
    assert_eq!(
        cache.get_info_for_name(b"bar").unwrap().map(|c| c.claim_id),
        Some(incumbent)
    );

    advance(&mut cache, 2); // blocks 164 and 165: still the incumbent
    assert_eq!(
        cache.get_info_for_name(b"bar").unwrap().map(|c| c.claim_id),
        Some(incumbent)
    );

    advance(&mut cache, 1); // block 166 flips the winner
    assert_eq!(
        cache.get_info_for_name(b"bar").unwrap().map(|c| c.claim_id),
        Some(challenger)
    );
    assert_eq!(cache.get_last_takeover_for_name(b"bar").unwrap(), Some((challenger, 166)));
}

#[test]
fn incumbent_pays_no_delay_on_its_own_update() {
    let (_dir, trie) = open_trie(test_config());
    let mut cache = ClaimTrieCache::new(&trie);

    advance(&mut cache, 10);
    let id = claim_id(0x01);
    assert!(cache.add_claim(b"bar", &outpoint(1, 0), &id, 100, 10, 0, 0).unwrap());
    advance(&mut cache, 90); // now at height 100, incumbent since 10

    let removed = cache.remove_claim(&id, &outpoint(1, 0)).unwrap().expect("claim exists");
    assert_eq!(removed.valid_height, 10);
    assert_eq!(removed.original_height, 10);
    // the same id re-added pays nothing despite 90 blocks of ownership
    assert!(cache.add_claim(b"bar", &outpoint(3, 0), &id, 150, 100, 0, 0).unwrap());
    assert!(cache.have_claim(b"bar", &outpoint(3, 0)).unwrap());
}

#[test]
fn supports_aggregate_into_effective_amount() {
    let (_dir, trie) = open_trie(test_config());
    let mut cache = ClaimTrieCache::new(&trie);
    advance(&mut cache, 10);

    let id = claim_id(0x10);
    assert!(cache.add_claim(b"foo", &outpoint(1, 0), &id, 100, 10, 0, 0).unwrap());
    assert!(cache.add_support(b"foo", &outpoint(2, 0), &id, 40, 10, -1).unwrap());
    assert!(cache.add_support(b"foo", &outpoint(2, 1), &id, 60, 10, -1).unwrap());
    // a support for a claim that does not exist under the name
    assert!(cache.add_support(b"foo", &outpoint(3, 0), &claim_id(0x99), 500, 10, -1).unwrap());
    advance(&mut cache, 1);

    let result = cache.get_claims_for_name(b"foo").unwrap();
    assert_eq!(result.claims.len(), 1);
    assert_eq!(result.claims[0].effective_amount, 200);
    assert_eq!(result.claims[0].claim.effective_amount, 200);
    assert_eq!(result.claims[0].supports.len(), 2);
    assert_eq!(result.unmatched_supports.len(), 1);
    assert_eq!(result.unmatched_supports[0].amount, 500);
    assert_eq!(result.last_takeover_height, 10);

    // the dangling support adds nothing to anyone
    let winner = cache.get_info_for_name(b"foo").unwrap().unwrap();
    assert_eq!(winner.effective_amount, 200);
}

#[test]
fn claims_for_name_orders_by_effective_amount() {
    let (_dir, trie) = open_trie(test_config());
    let mut cache = ClaimTrieCache::new(&trie);
    advance(&mut cache, 10);

    let small = claim_id(0x01);
    let large = claim_id(0x02);
    assert!(cache.add_claim(b"foo", &outpoint(1, 0), &small, 100, 10, 0, 0).unwrap());
    assert!(cache.add_claim(b"foo", &outpoint(2, 0), &large, 50, 10, 0, 0).unwrap());
    assert!(cache.add_support(b"foo", &outpoint(3, 0), &large, 100, 10, -1).unwrap());
    advance(&mut cache, 1);

    let result = cache.get_claims_for_name(b"foo").unwrap();
    assert_eq!(result.claims.len(), 2);
    assert_eq!(result.claims[0].claim.claim_id, large);
    assert_eq!(result.claims[0].effective_amount, 150);
    assert_eq!(result.claims[1].claim.claim_id, small);
    assert_eq!(result.claims[1].effective_amount, 100);
    assert_eq!(cache.get_info_for_name(b"foo").unwrap().unwrap().claim_id, large);
}

#[test]
fn undo_add_restores_the_previous_root() {
    let (_dir, trie) = open_trie(test_config());
    let mut cache = ClaimTrieCache::new(&trie);

    advance(&mut cache, 50);
    let anchor = claim_id(0x05);
    assert!(cache.add_claim(b"anchor", &outpoint(9, 0), &anchor, 10, 50, 0, 0).unwrap());
    advance(&mut cache, 1);
    let before = cache.get_merkle_hash().unwrap();

    // block 51 adds a fresh claim through the script dispatcher
    let point = outpoint(1, 0);
    let add = ClaimScriptHandler::Add { point, amount: 100, height: 51 };
    let op = ClaimScriptOp::ClaimName { name: b"foo".to_vec() };
    assert_eq!(add.apply(&mut cache, &op).unwrap(), ClaimScriptOutcome::Applied);
    advance(&mut cache, 1);
    assert_ne!(cache.get_merkle_hash().unwrap(), before);

    // disconnect block 51
    assert!(cache.decrement_block().unwrap());
    let undo = ClaimScriptHandler::UndoAdd { point };
    assert_eq!(undo.apply(&mut cache, &op).unwrap(), ClaimScriptOutcome::Applied);
    assert!(cache.finalize_decrement().unwrap());

    assert_eq!(cache.get_merkle_hash().unwrap(), before);
    assert!(!cache.have_claim(b"foo", &point).unwrap());
    let minted = ClaimId::from_outpoint(&point);
    assert!(cache.find_name_for_claim(&minted.reversed()).unwrap().is_none());
}

#[test]
fn spend_and_undo_spend_restore_activation_heights() {
    let (_dir, trie) = open_trie(test_config());
    let mut cache = ClaimTrieCache::new(&trie);

    advance(&mut cache, 10);
    let point = outpoint(1, 0);
    let add = ClaimScriptHandler::Add { point, amount: 100, height: 10 };
    let op = ClaimScriptOp::ClaimName { name: b"foo".to_vec() };
    assert_eq!(add.apply(&mut cache, &op).unwrap(), ClaimScriptOutcome::Applied);
    advance(&mut cache, 1);
    let root = cache.get_merkle_hash().unwrap();

    // spend the claim at block 11
    let spend = ClaimScriptHandler::Spend { point };
    let outcome = spend.apply(&mut cache, &op).unwrap();
    let (valid_height, original_height) = match outcome {
        ClaimScriptOutcome::AppliedSpend { valid_height, original_height } => {
            (valid_height, original_height)
        }
        other => panic!("expected a spend, got {:?}", other),
    };
    assert_eq!(valid_height, 10);
    assert_eq!(original_height, 10);
    assert!(cache.get_info_for_name(b"foo").unwrap().is_none());

    // spending an unknown outpoint is rejected with no state change
    assert_eq!(
        spend.apply(&mut cache, &op).unwrap(),
        ClaimScriptOutcome::Rejected
    );

    // undo the spend with the captured heights
    let undo = ClaimScriptHandler::UndoSpend {
        point,
        amount: 100,
        height: 10,
        valid_height,
        original_height,
    };
    assert_eq!(undo.apply(&mut cache, &op).unwrap(), ClaimScriptOutcome::Applied);
    assert_eq!(cache.get_merkle_hash().unwrap(), root);
    let winner = cache.get_info_for_name(b"foo").unwrap().unwrap();
    assert_eq!(winner.valid_at_height, 10);
}

#[test]
fn reorg_across_a_takeover_restores_everything() {
    let (_dir, trie) = open_trie(test_config());
    let mut cache = ClaimTrieCache::new(&trie);

    // incumbent takes "bar" at height 8
    advance(&mut cache, 8);
    let incumbent = claim_id(0x01);
    assert!(cache.add_claim(b"bar", &outpoint(1, 0), &incumbent, 100, 8, 0, 0).unwrap());
    advance(&mut cache, 2); // heights 8 and 9 applied; next is 10

    let root_before = cache.get_merkle_hash().unwrap();
    let claims_before = cache.get_claims_for_name(b"bar").unwrap();
    assert_eq!(cache.get_last_takeover_for_name(b"bar").unwrap(), Some((incumbent, 8)));

    // block 10: challenger claim, delay (10-8)/1 = 2, activates at 12
    let challenger = claim_id(0x02);
    let challenger_point = outpoint(2, 0);
    assert!(cache.add_claim(b"bar", &challenger_point, &challenger, 500, 10, 0, 0).unwrap());
    advance(&mut cache, 1);

    // block 11: a support for the challenger, delay (11-8)/1 = 3, activates at 14
    let support_point = outpoint(3, 0);
    assert!(cache.add_support(b"bar", &support_point, &challenger, 50, 11, -1).unwrap());
    assert_eq!(cache.have_support_in_queue(b"bar", &support_point).unwrap(), Some(14));
    advance(&mut cache, 1);

    // block 12: the challenger activates and takes over; the takeover pulls
    // the pending support down to 12
    advance(&mut cache, 1);
    assert_eq!(cache.get_last_takeover_for_name(b"bar").unwrap(), Some((challenger, 12)));
    let during = cache.get_claims_for_name(b"bar").unwrap();
    let challenger_entry = during
        .claims
        .iter()
        .find(|c| c.claim.claim_id == challenger)
        .expect("challenger listed");
    assert_eq!(challenger_entry.effective_amount, 550);
    assert_eq!(challenger_entry.supports[0].valid_at_height, 12);

    // blocks 13 and 14: nothing else happens
    advance(&mut cache, 2);

    // disconnect 14 and 13
    for _ in 0..2 {
        assert!(cache.decrement_block().unwrap());
        assert!(cache.finalize_decrement().unwrap());
    }
    // disconnect 12: the forced activation rolls back to 14
    assert!(cache.decrement_block().unwrap());
    assert!(cache.finalize_decrement().unwrap());
    assert_eq!(cache.have_support_in_queue(b"bar", &support_point).unwrap(), Some(14));

    // disconnect 11: undo the support add
    assert!(cache.decrement_block().unwrap());
    assert!(cache.remove_support(&support_point).unwrap().is_some());
    assert!(cache.finalize_decrement().unwrap());

    // disconnect 10: undo the challenger add
    assert!(cache.decrement_block().unwrap());
    assert!(cache.remove_claim(&challenger, &challenger_point).unwrap().is_some());
    assert!(cache.finalize_decrement().unwrap());

    assert_eq!(cache.next_height(), 10);
    assert_eq!(cache.get_merkle_hash().unwrap(), root_before);
    assert_eq!(cache.get_last_takeover_for_name(b"bar").unwrap(), Some((incumbent, 8)));
    let claims_after = cache.get_claims_for_name(b"bar").unwrap();
    assert_eq!(claims_after.claims.len(), claims_before.claims.len());
    assert_eq!(
        claims_after.claims[0].claim.valid_at_height,
        claims_before.claims[0].claim.valid_at_height
    );
}

#[test]
fn split_nodes_fold_into_the_root_exactly() {
    let (_dir, trie) = open_trie(test_config());
    let mut cache = ClaimTrieCache::new(&trie);
    advance(&mut cache, 10);

    let abc = claim_id(0x01);
    let abd = claim_id(0x02);
    let abc_point = outpoint(1, 0);
    let abd_point = outpoint(2, 0);
    assert!(cache.add_claim(b"abc", &abc_point, &abc, 100, 10, 0, 0).unwrap());
    assert!(cache.add_claim(b"abd", &abd_point, &abd, 100, 10, 0, 0).unwrap());
    advance(&mut cache, 1);

    // shape: root -> "ab" (split node) -> {"abc", "abd"}
    let h_abc = leaf_hash(&abc_point, 10);
    let h_abd = leaf_hash(&abd_point, 10);
    let h_ab = parent_hash(&[(b'c', h_abc), (b'd', h_abd)], None);
    let mut folded = h_ab;
    complete_hash(&mut folded, b"ab", 0);
    let expected = parent_hash(&[(b'a', folded)], None);
    assert_eq!(cache.get_merkle_hash().unwrap(), expected);

    // removing "abd" collapses the split node away
    assert!(cache.remove_claim(&abd, &abd_point).unwrap().is_some());
    let mut folded = h_abc;
    complete_hash(&mut folded, b"abc", 0);
    let expected = parent_hash(&[(b'a', folded)], None);
    assert_eq!(cache.get_merkle_hash().unwrap(), expected);
}

#[test]
fn proofs_verify_for_the_controller_only() {
    let (_dir, trie) = open_trie(test_config());
    let mut cache = ClaimTrieCache::new(&trie);
    advance(&mut cache, 10);

    let winner = claim_id(0x01);
    let loser = claim_id(0x02);
    assert!(cache.add_claim(b"abc", &outpoint(1, 0), &winner, 500, 10, 0, 0).unwrap());
    assert!(cache.add_claim(b"abc", &outpoint(2, 0), &loser, 100, 10, 0, 0).unwrap());
    assert!(cache.add_claim(b"abx", &outpoint(3, 0), &claim_id(0x03), 100, 10, 0, 0).unwrap());
    advance(&mut cache, 1);
    let root = cache.get_merkle_hash().unwrap();

    // the controller's proof folds into the root
    let proof = cache.get_proof_for_name(b"abc", &winner).unwrap();
    let value = proof.value.as_ref().expect("controller proof carries the value");
    assert_eq!(value.outpoint, outpoint(1, 0));
    assert_eq!(value.last_takeover_height, 10);
    assert!(verify_proof(&proof, b"abc", &root));
    assert!(!verify_proof(&proof, b"abd", &root));
    assert!(!verify_proof(&proof, b"abc", &EMPTY_TRIE_HASH));

    // a non-controlling claim yields a proof that cannot fold into the root
    let losing = cache.get_proof_for_name(b"abc", &loser).unwrap();
    assert!(losing.value.is_none());
    assert!(!verify_proof(&losing, b"abc", &root));

    // absence proof: "abz" shares the split node but has no claim
    let absent = cache.get_proof_for_name(b"abz", &winner).unwrap();
    assert!(absent.value.is_none());
    assert!(verify_proof(&absent, b"abz", &root));
}

#[test]
fn absence_proof_below_an_existing_leaf() {
    let (_dir, trie) = open_trie(test_config());
    let mut cache = ClaimTrieCache::new(&trie);
    advance(&mut cache, 10);

    let id = claim_id(0x01);
    assert!(cache.add_claim(b"foo", &outpoint(1, 0), &id, 100, 10, 0, 0).unwrap());
    advance(&mut cache, 1);
    let root = cache.get_merkle_hash().unwrap();

    let proof = cache.get_proof_for_name(b"fooz", &id).unwrap();
    assert!(proof.value.is_none());
    assert!(verify_proof(&proof, b"fooz", &root));
    assert!(!verify_proof(&proof, b"foo", &root));
}

#[test]
fn find_name_for_claim_requires_a_unique_prefix() {
    let (_dir, trie) = open_trie(test_config());
    let mut cache = ClaimTrieCache::new(&trie);
    advance(&mut cache, 10);

    // ids that share their trailing (reversed leading) byte
    let mut a = [0x01u8; 20];
    a[19] = 0xEE;
    let mut b = [0x02u8; 20];
    b[19] = 0xEE;
    let id_a = ClaimId(a);
    let id_b = ClaimId(b);
    assert!(cache.add_claim(b"one", &outpoint(1, 0), &id_a, 100, 10, 0, 0).unwrap());
    assert!(cache.add_claim(b"two", &outpoint(2, 0), &id_b, 100, 10, 0, 0).unwrap());
    advance(&mut cache, 1);

    // the shared one-byte prefix is ambiguous
    assert!(cache.find_name_for_claim(&[0xEE]).unwrap().is_none());
    // two bytes disambiguate
    let (name, value) = cache.find_name_for_claim(&[0xEE, 0x01]).unwrap().unwrap();
    assert_eq!(name, b"one".to_vec());
    assert_eq!(value.claim_id, id_a);
    // no match at all
    assert!(cache.find_name_for_claim(&[0xDD]).unwrap().is_none());
    // over-long prefixes never match
    assert!(cache.find_name_for_claim(&[0u8; 21]).unwrap().is_none());
}

#[test]
fn flush_then_reopen_reproduces_the_root() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("claims");
    let root = {
        let trie = ClaimTrie::open(&path, test_config(), false).unwrap();
        let mut cache = ClaimTrieCache::new(&trie);
        advance(&mut cache, 10);
        assert!(cache.add_claim(b"foo", &outpoint(1, 0), &claim_id(0x01), 100, 10, 0, 0).unwrap());
        assert!(cache.add_claim(b"bar", &outpoint(2, 0), &claim_id(0x02), 200, 10, 0, 0).unwrap());
        advance(&mut cache, 1);
        let root = cache.get_merkle_hash().unwrap();
        assert!(cache.flush().unwrap());
        assert!(trie.sync_to_disk());
        root
    };

    let config = ClaimTrieConfig { height: 11, ..test_config() };
    let trie = ClaimTrie::open(&path, config, false).unwrap();
    let mut cache = ClaimTrieCache::new(&trie);
    assert_eq!(cache.get_merkle_hash().unwrap(), root);
    assert!(cache.check_consistency().unwrap());
    assert!(cache.validate_db(10, &root).unwrap());
    let mut wrong = root;
    wrong[0] ^= 1;
    let mut cache = ClaimTrieCache::new(&trie);
    assert!(!cache.validate_db(10, &wrong).unwrap());
}

#[test]
fn unflushed_changes_stay_invisible_and_roll_back() {
    let (_dir, trie) = open_trie(test_config());
    {
        let mut cache = ClaimTrieCache::new(&trie);
        advance(&mut cache, 10);
        assert!(cache.add_claim(b"foo", &outpoint(1, 0), &claim_id(0x01), 100, 10, 0, 0).unwrap());
        advance(&mut cache, 1);
        // dropped without flush: everything rolls back
    }
    let mut cache = ClaimTrieCache::new(&trie);
    assert_eq!(cache.next_height(), 0);
    assert_eq!(cache.get_merkle_hash().unwrap(), EMPTY_TRIE_HASH);
    assert!(!cache.have_claim(b"foo", &outpoint(1, 0)).unwrap());
}

#[test]
fn expiration_removes_claims_and_their_nodes() {
    let config = ClaimTrieConfig {
        original_expiration_time: 5,
        extended_expiration_time: 5,
        ..test_config()
    };
    let (_dir, trie) = open_trie(config);
    let mut cache = ClaimTrieCache::new(&trie);
    advance(&mut cache, 10);

    let id = claim_id(0x01);
    assert!(cache.add_claim(b"foo", &outpoint(1, 0), &id, 100, 10, 0, 0).unwrap());
    advance(&mut cache, 1);
    assert!(cache.get_info_for_name(b"foo").unwrap().is_some());

    // expires at 15: live through block 15, gone when 16 begins
    advance(&mut cache, 5);
    assert!(cache.get_info_for_name(b"foo").unwrap().is_none());
    assert_eq!(cache.get_merkle_hash().unwrap(), EMPTY_TRIE_HASH);
    assert_eq!(cache.get_expired_claims(15).unwrap(), vec![id]);
    assert_eq!(cache.get_total_claims_in_trie().unwrap(), 0);
}

#[test]
fn activation_queries_report_matured_records() {
    let config = ClaimTrieConfig { proportional_delay_factor: 2, ..test_config() };
    let (_dir, trie) = open_trie(config);
    let mut cache = ClaimTrieCache::new(&trie);

    advance(&mut cache, 10);
    let incumbent = claim_id(0x01);
    assert!(cache.add_claim(b"bar", &outpoint(1, 0), &incumbent, 100, 10, 0, 0).unwrap());
    advance(&mut cache, 10); // incumbent since 10, now at 20

    let challenger = claim_id(0x02);
    assert!(cache.add_claim(b"bar", &outpoint(2, 0), &challenger, 50, 20, 0, 0).unwrap());
    assert!(cache.add_support(b"bar", &outpoint(3, 0), &challenger, 10, 20, -1).unwrap());
    // delay (20-10)/2 = 5: both mature at 25
    advance(&mut cache, 5);
    assert_eq!(cache.get_activated_claims(25).unwrap(), vec![challenger]);
    assert_eq!(cache.get_claims_with_activated_supports(25).unwrap(), vec![challenger]);
}

#[test]
fn removal_workaround_grants_one_free_readd() {
    let config = ClaimTrieConfig {
        min_removal_workaround_height: 0,
        max_removal_workaround_height: 1_000,
        ..test_config()
    };
    let (_dir, trie) = open_trie(config);
    let mut cache = ClaimTrieCache::new(&trie);
    advance(&mut cache, 10);

    let parent = claim_id(0x01);
    let child = claim_id(0x02);
    assert!(cache.add_claim(b"ab", &outpoint(1, 0), &parent, 100, 10, 0, 0).unwrap());
    assert!(cache.add_claim(b"abc", &outpoint(2, 0), &child, 100, 10, 0, 0).unwrap());
    advance(&mut cache, 10); // both owned since 10, now at 20

    // the removed name stays alive as an interior prefix of "abc"
    assert!(cache.remove_claim(&parent, &outpoint(1, 0)).unwrap().is_some());

    // first re-add inside the window: no delay
    let newcomer = claim_id(0x03);
    assert!(cache.add_claim(b"ab", &outpoint(3, 0), &newcomer, 100, 20, 0, 0).unwrap());
    let during = cache.get_claims_for_name(b"ab").unwrap();
    assert_eq!(during.claims[0].claim.valid_at_height, 20);

    // the workaround entry is consumed: a second add pays the full delay
    let latecomer = claim_id(0x04);
    assert!(cache.add_claim(b"ab", &outpoint(4, 0), &latecomer, 100, 20, 0, 0).unwrap());
    let row = cache
        .get_claims_for_name(b"ab")
        .unwrap()
        .claims
        .into_iter()
        .find(|c| c.claim.claim_id == latecomer)
        .unwrap();
    assert_eq!(row.claim.valid_at_height, 30); // 20 + (20 - 10) / 1
}

#[test]
fn configured_takeover_workarounds_force_a_record() {
    let mut config = test_config();
    config.takeover_workarounds.insert((20, b"x".to_vec()));
    let (_dir, trie) = open_trie(config);
    let mut cache = ClaimTrieCache::new(&trie);

    advance(&mut cache, 10);
    let id = claim_id(0x01);
    assert!(cache.add_claim(b"x", &outpoint(1, 0), &id, 100, 10, 0, 0).unwrap());
    advance(&mut cache, 10); // takeover recorded at 10; now at 20

    // a support for the standing winner changes nothing by the normal rule
    assert!(cache.add_support(b"x", &outpoint(2, 0), &id, 10, 20, -1).unwrap());
    advance(&mut cache, 1);
    // but the configured workaround forces a fresh takeover record at 20
    assert_eq!(cache.get_last_takeover_for_name(b"x").unwrap(), Some((id, 20)));
}

#[test]
fn normalization_hook_changes_the_filed_name_past_the_fork() {
    let config = ClaimTrieConfig { normalization_fork_height: 5, ..test_config() };
    let (_dir, trie) = open_trie(config);
    let trie = trie.with_normalizer(Box::new(|name: &[u8]| name.to_ascii_lowercase()));
    let mut cache = ClaimTrieCache::new(&trie);
    advance(&mut cache, 10);

    let id = claim_id(0x01);
    assert!(cache.add_claim(b"FOO", &outpoint(1, 0), &id, 100, 10, 0, 0).unwrap());
    advance(&mut cache, 1);

    assert!(cache.get_info_for_name(b"foo").unwrap().is_some());
    assert!(cache.get_info_for_name(b"FOO").unwrap().is_none());
    assert_eq!(cache.get_names_in_trie().unwrap(), vec![b"foo".to_vec()]);
}

#[test]
fn totals_and_names_track_live_claims() {
    let (_dir, trie) = open_trie(test_config());
    let mut cache = ClaimTrieCache::new(&trie);
    advance(&mut cache, 10);

    assert!(cache.add_claim(b"a", &outpoint(1, 0), &claim_id(0x01), 100, 10, 0, 0).unwrap());
    assert!(cache.add_claim(b"a", &outpoint(2, 0), &claim_id(0x02), 300, 10, 0, 0).unwrap());
    assert!(cache.add_claim(b"b", &outpoint(3, 0), &claim_id(0x03), 50, 10, 0, 0).unwrap());
    advance(&mut cache, 1);

    assert_eq!(cache.get_total_names_in_trie().unwrap(), 2);
    assert_eq!(cache.get_total_claims_in_trie().unwrap(), 3);
    assert_eq!(cache.get_total_value_of_claims_in_trie(false).unwrap(), 450);
    // controlling only: 300 for "a", 50 for "b"
    assert_eq!(cache.get_total_value_of_claims_in_trie(true).unwrap(), 350);
    assert_eq!(cache.get_names_in_trie().unwrap(), vec![b"a".to_vec(), b"b".to_vec()]);
}

#[test]
fn readers_see_only_committed_state() {
    let (_dir, trie) = open_trie(test_config());
    let mut writer = ClaimTrieCache::new(&trie);
    advance(&mut writer, 10);
    assert!(writer.add_claim(b"foo", &outpoint(1, 0), &claim_id(0x01), 100, 10, 0, 0).unwrap());
    advance(&mut writer, 1);

    // the writer reads its own writes
    assert!(writer.have_claim(b"foo", &outpoint(1, 0)).unwrap());

    // a fresh reader sees nothing until the writer flushes
    {
        let reader = ClaimTrieCache::new(&trie);
        assert!(!reader.have_claim(b"foo", &outpoint(1, 0)).unwrap());
    }
    assert!(writer.flush().unwrap());
    let reader = ClaimTrieCache::new(&trie);
    assert!(reader.have_claim(b"foo", &outpoint(1, 0)).unwrap());
    assert_eq!(reader.next_height(), 11);
}
