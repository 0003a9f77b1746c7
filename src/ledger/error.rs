// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

use crate::{db::StorageError, types::tangle::MilestoneIndex};

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("ledger index mismatch: expected {expected}, got {actual}")]
    IndexMismatch {
        expected: MilestoneIndex,
        actual: MilestoneIndex,
    },
}

impl From<bincode::Error> for LedgerError {
    fn from(e: bincode::Error) -> Self {
        Self::Storage(e.into())
    }
}
