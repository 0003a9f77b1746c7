// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

mod common;

use pretty_assertions::assert_eq;
use weave::{
    tangle::TipScore,
    types::{
        block::BlockId,
        tangle::{MilestoneIndex, ProtocolParameters},
    },
};

use self::common::{block, random_block_id, TestTangle};

/// Confirms milestones `1..=count`, each referencing one fresh block. Returns the blocks by milestone index.
fn confirmed_tangle(count: u32) -> (TestTangle, Vec<BlockId>) {
    let entry_point = random_block_id();
    let test = TestTangle::new(&[entry_point]);
    let mut referenced = vec![entry_point];
    for index in 1..=count {
        let x = test.store(block(&[entry_point]));
        test.confirm(index, &[x]);
        referenced.push(x);
    }
    (test, referenced)
}

#[test]
fn tips_are_scored_by_their_cone_root_indexes() {
    let (test, referenced) = confirmed_tangle(20);
    let cmi = MilestoneIndex(20);
    let healthy = test.store(block(&[referenced[20]]));
    let lazy = test.store(block(&[referenced[10]]));
    let semi_lazy = test.store(block(&[referenced[20], referenced[5]]));
    let too_old = test.store(block(&[referenced[2]]));
    let on_top = test.store(block(&[healthy, semi_lazy]));

    let calculator = test.tangle.tip_score_calculator().unwrap();
    assert_eq!(calculator.tip_score(&healthy, cmi).unwrap(), TipScore::Healthy);
    assert_eq!(
        calculator.tip_score(&lazy, cmi).unwrap(),
        TipScore::YoungestConeRootIndexThresholdReached
    );
    assert_eq!(
        calculator.tip_score(&semi_lazy, cmi).unwrap(),
        TipScore::OldestConeRootIndexThresholdReached
    );
    assert_eq!(calculator.tip_score(&too_old, cmi).unwrap(), TipScore::BelowMaxDepth);
    assert_eq!(
        calculator.tip_score(&on_top, cmi).unwrap(),
        TipScore::OldestConeRootIndexThresholdReached
    );
    assert_eq!(calculator.tip_score(&random_block_id(), cmi).unwrap(), TipScore::NotFound);

    // A referenced block scores by its own milestone.
    assert_eq!(calculator.tip_score(&referenced[20], cmi).unwrap(), TipScore::Healthy);
    assert_eq!(calculator.tip_score(&referenced[1], cmi).unwrap(), TipScore::BelowMaxDepth);
}

#[test]
fn below_max_depth_follows_protocol_parameters() {
    let (test, referenced) = confirmed_tangle(12);
    let cmi = MilestoneIndex(12);
    let tip = test.store(block(&[referenced[12], referenced[6]]));

    let calculator = test.tangle.tip_score_calculator().unwrap();
    assert_eq!(calculator.tip_score(&tip, cmi).unwrap(), TipScore::Healthy);

    let params = ProtocolParameters {
        below_max_depth: 5,
        ..Default::default()
    };
    test.storage().store_protocol_parameters(&params).unwrap();
    let calculator = test.tangle.tip_score_calculator().unwrap();
    assert_eq!(calculator.tip_score(&tip, cmi).unwrap(), TipScore::BelowMaxDepth);

    let calculator = calculator.with_protocol_parameters(&ProtocolParameters::default());
    assert_eq!(calculator.tip_score(&tip, cmi).unwrap(), TipScore::Healthy);
}

#[test]
fn scores_move_with_the_confirmed_milestone_index() {
    let (test, referenced) = confirmed_tangle(4);
    let tip = test.store(block(&[referenced[4]]));
    let calculator = test.tangle.tip_score_calculator().unwrap();
    assert_eq!(calculator.tip_score(&tip, MilestoneIndex(4)).unwrap(), TipScore::Healthy);
    assert_eq!(
        calculator.tip_score(&tip, MilestoneIndex(13)).unwrap(),
        TipScore::YoungestConeRootIndexThresholdReached
    );
    assert_eq!(calculator.tip_score(&tip, MilestoneIndex(20)).unwrap(), TipScore::BelowMaxDepth);
}
