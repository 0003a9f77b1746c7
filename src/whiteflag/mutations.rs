// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashMap, HashSet};

use tracing::trace;

use super::{ConfirmationError, CriticalError, MerkleHasher, TransactionValidator};
use crate::{
    dag::{AbortSignal, MemcachedTraverserStorage, ParentsTraverser, ParentsVisitor},
    ledger::LedgerState,
    storage::CachedMetadata,
    types::{
        block::{BlockId, MerkleRoot, TransactionPayload},
        ledger::{ConflictReason, LedgerOutput, LedgerSpent, OutputId},
        tangle::MilestoneIndex,
    },
};

/// The ledger mutations of a milestone, computed but not applied.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WhiteFlagMutations {
    /// Every block referenced by the milestone, in white-flag order.
    pub referenced_blocks: Vec<BlockId>,
    /// Blocks whose transaction was applied.
    pub included_blocks: Vec<BlockId>,
    pub excluded_without_transactions: Vec<BlockId>,
    pub excluded_conflicting: Vec<(BlockId, ConflictReason)>,
    pub new_outputs: Vec<LedgerOutput>,
    pub new_spents: Vec<LedgerSpent>,
    pub inclusion_merkle_root: MerkleRoot,
    pub applied_merkle_root: MerkleRoot,
}

impl WhiteFlagMutations {
    /// The conflict reason of a referenced block. `None` if the block was not referenced by this milestone.
    pub fn conflict_reason(&self, block_id: &BlockId) -> Option<ConflictReason> {
        if !self.referenced_blocks.contains(block_id) {
            return None;
        }
        Some(
            self.excluded_conflicting
                .iter()
                .find(|(id, _)| id == block_id)
                .map_or(ConflictReason::None, |(_, reason)| *reason),
        )
    }
}

struct WhiteFlagVisitor<'a> {
    storage: &'a MemcachedTraverserStorage<'a>,
    ledger: &'a LedgerState,
    validator: &'a dyn TransactionValidator,
    index: MilestoneIndex,
    timestamp: u32,
    mutations: WhiteFlagMutations,
    /// Outputs created by earlier transactions of this milestone.
    created: HashMap<OutputId, LedgerOutput>,
    /// Outputs consumed by earlier transactions of this milestone.
    consumed: HashSet<OutputId>,
}

impl<'a> WhiteFlagVisitor<'a> {
    /// Resolves the inputs of a transaction against the ledger patched with the earlier transactions of the
    /// milestone.
    fn resolve_inputs(
        &self,
        transaction: &TransactionPayload,
    ) -> Result<Result<Vec<LedgerOutput>, ConflictReason>, ConfirmationError> {
        let mut inputs = Vec::with_capacity(transaction.inputs.len());
        let mut resolved = HashSet::with_capacity(transaction.inputs.len());
        for output_id in &transaction.inputs {
            // An output listed twice would be counted twice by the amount check.
            if self.consumed.contains(output_id) || !resolved.insert(*output_id) {
                return Ok(Err(ConflictReason::InputUtxoAlreadySpentInThisMilestone));
            }
            if let Some(output) = self.created.get(output_id) {
                inputs.push(output.clone());
                continue;
            }
            match self.ledger.output(output_id)? {
                Some(_) if !self.ledger.is_unspent(output_id)? => {
                    return Ok(Err(ConflictReason::InputUtxoAlreadySpent));
                }
                Some(output) => inputs.push(output),
                None => return Ok(Err(ConflictReason::InputUtxoNotFound)),
            }
        }
        Ok(Ok(inputs))
    }

    fn apply_transaction(
        &mut self,
        block_id: BlockId,
        transaction: &TransactionPayload,
    ) -> Result<ConflictReason, ConfirmationError> {
        let inputs = match self.resolve_inputs(transaction)? {
            Ok(inputs) => inputs,
            Err(reason) => return Ok(reason),
        };
        let reason = self.validator.validate(transaction, &inputs);
        if reason.is_conflicting() {
            return Ok(reason);
        }

        let transaction_id = transaction.id();
        for input in inputs {
            self.consumed.insert(input.output_id);
            self.mutations.new_spents.push(LedgerSpent {
                output: input,
                transaction_id_spent: transaction_id,
                milestone_index_spent: self.index,
                milestone_timestamp_spent: self.timestamp,
            });
        }
        for (output_id, output) in transaction.output_ids().zip(&transaction.outputs) {
            let output = LedgerOutput {
                output_id,
                output: *output,
                block_id,
                milestone_index_booked: self.index,
                milestone_timestamp_booked: self.timestamp,
            };
            self.created.insert(output_id, output.clone());
            self.mutations.new_outputs.push(output);
        }
        Ok(ConflictReason::None)
    }
}

impl<'a> ParentsVisitor for WhiteFlagVisitor<'a> {
    type Error = ConfirmationError;

    fn condition(&mut self, metadata: &CachedMetadata) -> Result<bool, Self::Error> {
        Ok(!metadata.is_referenced())
    }

    fn consume(&mut self, metadata: &CachedMetadata) -> Result<(), Self::Error> {
        let block_id = metadata.block_id();
        let block = self
            .storage
            .storage()
            .cached_block(&block_id)?
            .ok_or(CriticalError::BlockNotFound(block_id))?;

        self.mutations.referenced_blocks.push(block_id);
        match block.transaction() {
            Some(transaction) => match self.apply_transaction(block_id, transaction)? {
                ConflictReason::None => self.mutations.included_blocks.push(block_id),
                reason => {
                    trace!("block {block_id} conflicts: {reason:?}");
                    self.mutations.excluded_conflicting.push((block_id, reason));
                }
            },
            None => self.mutations.excluded_without_transactions.push(block_id),
        }
        Ok(())
    }
}

/// Computes the ledger mutations of a milestone with the given parents, without applying them.
///
/// The past cone of `parents` is walked in white-flag order: parents before children, and the parents of the
/// milestone one after another in the given order. Blocks referenced by earlier milestones are not part of the cone.
pub fn compute_white_flag_mutations(
    storage: &MemcachedTraverserStorage<'_>,
    ledger: &LedgerState,
    validator: &dyn TransactionValidator,
    index: MilestoneIndex,
    timestamp: u32,
    parents: &[BlockId],
    abort: &AbortSignal,
) -> Result<WhiteFlagMutations, ConfirmationError> {
    if parents.is_empty() {
        return Err(ConfirmationError::NoParents);
    }

    let mut visitor = WhiteFlagVisitor {
        storage,
        ledger,
        validator,
        index,
        timestamp,
        mutations: Default::default(),
        created: Default::default(),
        consumed: Default::default(),
    };
    ParentsTraverser::new(storage).traverse(parents, false, &mut visitor, abort)?;

    let mut mutations = visitor.mutations;
    mutations.inclusion_merkle_root = MerkleHasher::hash_block_ids(&mutations.referenced_blocks);
    mutations.applied_merkle_root = MerkleHasher::hash_block_ids(&mutations.included_blocks);
    Ok(mutations)
}
