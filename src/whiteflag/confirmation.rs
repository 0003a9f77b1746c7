// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};

use tracing::{debug, instrument};

use super::{compute_white_flag_mutations, ConfirmationError, CriticalError, TransactionValidator, WhiteFlagMutations};
use crate::{
    dag::{AbortSignal, MemcachedTraverserStorage, TraverserStorage},
    ledger::{Ledger, LedgerState},
    storage::{CachedMetadata, Storage},
    types::{
        block::MilestonePayload,
        ledger::{ConflictReason, LedgerInclusionState},
        tangle::{Milestone, MilestoneIndex},
    },
};

/// What a milestone confirmation did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfirmedMilestoneStats {
    pub index: MilestoneIndex,
    pub referenced: usize,
    pub included_with_transactions: usize,
    pub excluded_without_transactions: usize,
    pub excluded_conflicting: usize,
    pub duration: Duration,
}

/// Confirms the past cone of a milestone and applies its mutations to the ledger.
///
/// The ledger write lock is held for the whole confirmation. Every block of the cone is stamped as referenced by the
/// milestone with its white-flag index and handed to `on_block_referenced`. The milestone must directly follow the
/// ledger index.
#[instrument(skip_all, fields(milestone_index = %milestone.index), level = "debug")]
pub fn confirm_milestone(
    storage: &Storage,
    ledger: &Ledger,
    validator: &dyn TransactionValidator,
    milestone: &Milestone,
    abort: &AbortSignal,
    on_block_referenced: impl FnMut(&CachedMetadata),
) -> Result<(ConfirmedMilestoneStats, WhiteFlagMutations), ConfirmationError> {
    let start = Instant::now();
    let mut ledger = ledger.write();
    let ledger_index = ledger.ledger_index();
    if milestone.index != ledger_index + 1 {
        return Err(ConfirmationError::NodeNotSynced {
            confirmed: ledger_index,
            requested: milestone.index,
        });
    }

    let payload = milestone_payload(storage, milestone)?;

    let traverser_storage = MemcachedTraverserStorage::new(storage);
    let result = apply(
        &traverser_storage,
        &mut ledger,
        validator,
        &payload,
        abort,
        on_block_referenced,
    );
    traverser_storage.cleanup(true);
    let mutations = result?;

    let stats = ConfirmedMilestoneStats {
        index: milestone.index,
        referenced: mutations.referenced_blocks.len(),
        included_with_transactions: mutations.included_blocks.len(),
        excluded_without_transactions: mutations.excluded_without_transactions.len(),
        excluded_conflicting: mutations.excluded_conflicting.len(),
        duration: start.elapsed(),
    };
    debug!("confirmed {} blocks", stats.referenced);
    Ok((stats, mutations))
}

/// Loads the payload of a milestone and checks it against its block.
fn milestone_payload(storage: &Storage, milestone: &Milestone) -> Result<MilestonePayload, ConfirmationError> {
    let block = storage
        .cached_block(&milestone.block_id)?
        .ok_or(CriticalError::BlockNotFound(milestone.block_id))?;
    let payload = block
        .milestone()
        .ok_or(CriticalError::NotAMilestone(milestone.block_id))?;
    if payload.index != milestone.index {
        return Err(CriticalError::MilestoneIndexMismatch {
            block_id: milestone.block_id,
            expected: milestone.index,
            actual: payload.index,
        }
        .into());
    }
    if payload.parents[..] != block.parents()[..] {
        return Err(CriticalError::ParentsMismatch(milestone.index).into());
    }
    Ok(payload.clone())
}

fn apply(
    storage: &MemcachedTraverserStorage<'_>,
    ledger: &mut LedgerState,
    validator: &dyn TransactionValidator,
    payload: &MilestonePayload,
    abort: &AbortSignal,
    mut on_block_referenced: impl FnMut(&CachedMetadata),
) -> Result<WhiteFlagMutations, ConfirmationError> {
    let mutations = compute_white_flag_mutations(
        storage,
        ledger,
        validator,
        payload.index,
        payload.timestamp,
        &payload.parents,
        abort,
    )?;

    if mutations.inclusion_merkle_root != payload.inclusion_merkle_root {
        return Err(CriticalError::InclusionMerkleRootMismatch {
            expected: payload.inclusion_merkle_root,
            computed: mutations.inclusion_merkle_root,
        }
        .into());
    }
    if mutations.applied_merkle_root != payload.applied_merkle_root {
        return Err(CriticalError::AppliedMerkleRootMismatch {
            expected: payload.applied_merkle_root,
            computed: mutations.applied_merkle_root,
        }
        .into());
    }

    ledger.apply_milestone_diff(payload.index, &mutations.new_outputs, &mutations.new_spents)?;

    let included = mutations.included_blocks.iter().collect::<HashSet<_>>();
    let conflicting = mutations
        .excluded_conflicting
        .iter()
        .map(|(id, reason)| (id, *reason))
        .collect::<HashMap<_, _>>();
    for (white_flag_index, block_id) in mutations.referenced_blocks.iter().enumerate() {
        let metadata = storage
            .cached_block_metadata(block_id)?
            .ok_or(CriticalError::BlockNotFound(*block_id))?;
        let (inclusion_state, conflict_reason) = if included.contains(block_id) {
            (LedgerInclusionState::Included, ConflictReason::None)
        } else if let Some(reason) = conflicting.get(block_id) {
            (LedgerInclusionState::Conflicting, *reason)
        } else {
            (LedgerInclusionState::NoTransaction, ConflictReason::None)
        };
        metadata.set_referenced(payload.index, white_flag_index as u32, inclusion_state, conflict_reason);
        on_block_referenced(&metadata);
    }
    Ok(mutations)
}
