// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

use crate::{
    dag::{SolidEntryPointError, TraversalError},
    db::StorageError,
    ledger::LedgerError,
    types::{
        block::{BlockId, MerkleRoot},
        tangle::MilestoneIndex,
    },
};

/// Errors that indicate an inconsistent database. The node must not confirm anything after one of these.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum CriticalError {
    #[error("block {0} of a solid cone is missing")]
    BlockNotFound(BlockId),
    #[error("milestone {0} not found")]
    MilestoneNotFound(MilestoneIndex),
    #[error("block {0} does not carry a milestone payload")]
    NotAMilestone(BlockId),
    #[error("block {block_id} carries milestone {actual} instead of {expected}")]
    MilestoneIndexMismatch {
        block_id: BlockId,
        expected: MilestoneIndex,
        actual: MilestoneIndex,
    },
    #[error("parents of milestone {0} do not match the parents of its block")]
    ParentsMismatch(MilestoneIndex),
    #[error("inclusion merkle root mismatch: milestone has {expected}, computed {computed}")]
    InclusionMerkleRootMismatch { expected: MerkleRoot, computed: MerkleRoot },
    #[error("applied merkle root mismatch: milestone has {expected}, computed {computed}")]
    AppliedMerkleRootMismatch { expected: MerkleRoot, computed: MerkleRoot },
    #[error("ledger index mismatch: expected {expected}, got {actual}")]
    LedgerIndexMismatch {
        expected: MilestoneIndex,
        actual: MilestoneIndex,
    },
    #[error("solid entry points are inconsistent: {0}")]
    SolidEntryPoint(SolidEntryPointError),
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ConfirmationError {
    #[error("node is not synced: confirmed milestone index is {confirmed}, requested {requested}")]
    NodeNotSynced {
        confirmed: MilestoneIndex,
        requested: MilestoneIndex,
    },
    #[error("confirmation was aborted")]
    Aborted,
    #[error("no parents given")]
    NoParents,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("critical error: {0}")]
    Critical(#[from] CriticalError),
}

impl ConfirmationError {
    /// Whether the node has to stop confirming milestones.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical(_) | Self::Storage(_))
    }
}

impl From<TraversalError> for ConfirmationError {
    fn from(e: TraversalError) -> Self {
        match e {
            TraversalError::Aborted => Self::Aborted,
            TraversalError::BlockNotFound(block_id) => CriticalError::BlockNotFound(block_id).into(),
            TraversalError::Storage(e) => Self::Storage(e),
        }
    }
}

impl From<LedgerError> for ConfirmationError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Storage(e) => Self::Storage(e),
            LedgerError::IndexMismatch { expected, actual } => {
                CriticalError::LedgerIndexMismatch { expected, actual }.into()
            }
        }
    }
}

impl From<SolidEntryPointError> for ConfirmationError {
    fn from(e: SolidEntryPointError) -> Self {
        match e {
            SolidEntryPointError::Traversal(e) => e.into(),
            e => CriticalError::SolidEntryPoint(e).into(),
        }
    }
}
