// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

use crate::{
    dag::TraversalError,
    db::StorageError,
    ledger::LedgerError,
    types::tangle::MilestoneIndex,
    whiteflag::{ConfirmationError, CriticalError},
};

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum TangleError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Traversal(#[from] TraversalError),
    #[error(transparent)]
    Confirmation(#[from] ConfirmationError),
    #[error("parents of milestone {0} did not become solid in time")]
    ParentsNotSolid(MilestoneIndex),
    #[error("the milestone solidifier was already started")]
    SolidifierAlreadyRunning,
    #[error("milestone solidifier task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl TangleError {
    /// Whether the error indicates an inconsistent database.
    pub fn is_critical(&self) -> bool {
        match self {
            Self::Confirmation(e) => e.is_critical(),
            _ => false,
        }
    }
}

impl From<CriticalError> for TangleError {
    fn from(e: CriticalError) -> Self {
        Self::Confirmation(e.into())
    }
}
