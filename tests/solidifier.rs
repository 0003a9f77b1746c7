// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

mod common;

use pretty_assertions::assert_eq;
use weave::{
    dag::{cone_root_indexes, AbortSignal},
    tangle::{is_solid, Requester},
    types::tangle::MilestoneIndex,
    whiteflag::{confirm_milestone, DefaultTransactionValidator},
};

use self::common::{block, random_block_id, TestTangle};

#[test]
fn solid_queue_check_solidifies_and_confirms_cone() {
    let entry_point = random_block_id();
    let test = TestTangle::new(&[entry_point]);
    let x = test.store(block(&[entry_point]));
    let y = test.store(block(&[x]));

    let check = test
        .tangle
        .solid_queue_check(MilestoneIndex(1), &[y], false, &AbortSignal::new())
        .unwrap();
    assert!(check.solid);
    assert!(!check.aborted);
    assert!(check.requested.is_empty());
    assert!(test.metadata(&x).is_solid());
    assert!(test.metadata(&y).is_solid());

    let milestone_block = test.milestone(1, &[y]);
    test.store(milestone_block.clone());
    let milestone = test.register_milestone(&milestone_block);
    confirm_milestone(
        test.storage(),
        test.tangle.ledger(),
        &DefaultTransactionValidator,
        &milestone,
        &AbortSignal::new(),
        |_| (),
    )
    .unwrap();

    assert_eq!(test.metadata(&x).referenced(), Some((MilestoneIndex(1), 0)));
    assert_eq!(test.metadata(&y).referenced(), Some((MilestoneIndex(1), 1)));
    let metadata = test.metadata(&y);
    assert_eq!(
        cone_root_indexes(test.storage(), &metadata, MilestoneIndex(1), &AbortSignal::new()).unwrap(),
        (MilestoneIndex(1), MilestoneIndex(1))
    );
}

#[test]
fn solid_queue_check_requests_missing_blocks() {
    let entry_point = random_block_id();
    let test = TestTangle::new(&[entry_point]);
    let x = block(&[entry_point]);
    let y = test.store(block(&[x.id()]));

    let check = test
        .tangle
        .solid_queue_check(MilestoneIndex(1), &[y], false, &AbortSignal::new())
        .unwrap();
    assert!(!check.solid);
    assert!(!check.aborted);
    assert_eq!(check.missing, vec![x.id()]);
    assert_eq!(check.requested, vec![x.id()]);
    assert!(!test.metadata(&y).is_solid());
    assert!(!test.requests.is_empty());

    // Nothing new arrived, nothing new is requested.
    let again = test
        .tangle
        .solid_queue_check(MilestoneIndex(1), &[y], false, &AbortSignal::new())
        .unwrap();
    assert!(!again.solid);
    assert!(!again.aborted);
    assert!(again.requested.is_empty());

    test.add(x.clone());
    assert!(test.requests.is_empty());
    let done = test
        .tangle
        .solid_queue_check(MilestoneIndex(1), &[y], false, &AbortSignal::new())
        .unwrap();
    assert!(done.solid);
    assert!(test.metadata(&x.id()).is_solid());
    assert!(test.metadata(&y).is_solid());
}

#[test]
fn aborted_check_marks_nothing() {
    let entry_point = random_block_id();
    let test = TestTangle::new(&[entry_point]);
    let x = test.store(block(&[entry_point]));

    let abort = AbortSignal::new();
    abort.abort();
    let check = test
        .tangle
        .solid_queue_check(MilestoneIndex(1), &[x], false, &abort)
        .unwrap();
    assert!(check.aborted);
    assert!(!check.solid);
    assert!(!test.metadata(&x).is_solid());
}

#[test]
fn solidity_check_looks_at_direct_parents_only() {
    let entry_point = random_block_id();
    let test = TestTangle::new(&[entry_point]);
    let x = test.store(block(&[entry_point]));
    let y = test.store(block(&[x]));

    assert!(is_solid(test.storage(), &test.metadata(&x)).unwrap());
    assert!(!is_solid(test.storage(), &test.metadata(&y)).unwrap());
    // The check does not mark anything.
    assert!(!test.metadata(&x).is_solid());
}

#[test]
fn solidity_propagates_into_future_cone() {
    let entry_point = random_block_id();
    let test = TestTangle::new(&[entry_point]);
    // Not synced yet: blocks stay non-solid on arrival.
    let x = block(&[entry_point]);
    let y = test.attach(&[x.id()]);
    let z = test.attach(&[y]);
    assert!(!test.metadata(&y).is_solid());

    // A first milestone makes the node almost synced.
    let milestone = test.milestone(1, &[entry_point]);
    test.add(milestone);
    assert!(test.tangle.sync().is_node_almost_synced());

    // The missing block arrives and its whole future cone becomes solid.
    test.add(x.clone());
    assert!(test.metadata(&x.id()).is_solid());
    assert!(test.metadata(&y).is_solid());
    assert!(test.metadata(&z).is_solid());
}

#[test]
fn milestone_arrival_updates_latest_index() {
    let entry_point = random_block_id();
    let test = TestTangle::new(&[entry_point]);
    let mut events = test.tangle.events().subscribe();

    let milestone = test.milestone(3, &[entry_point]);
    let milestone_id = test.add(milestone);
    assert_eq!(test.tangle.sync().latest_milestone_index(), MilestoneIndex(3));
    assert!(test.metadata(&milestone_id).is_milestone());
    assert!(test.storage().contains_milestone(MilestoneIndex(3)).unwrap());
    assert_eq!(
        test.storage().unreferenced_block_ids(MilestoneIndex(1)).unwrap(),
        vec![milestone_id]
    );

    let mut saw_latest = false;
    while let Ok(event) = events.try_recv() {
        saw_latest |= event == weave::tangle::TangleEvent::LatestMilestoneIndexChanged(MilestoneIndex(3));
    }
    assert!(saw_latest);
}
