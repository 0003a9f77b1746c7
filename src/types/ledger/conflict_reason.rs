// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// The reason a referenced transaction was excluded from the ledger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConflictReason {
    #[default]
    None = 0,
    InputUtxoAlreadySpent = 1,
    InputUtxoAlreadySpentInThisMilestone = 2,
    InputUtxoNotFound = 3,
    CreatedConsumedAmountMismatch = 4,
    InvalidSignature = 5,
    TimelockNotExpired = 6,
    InvalidNativeTokens = 7,
    StorageDepositReturnUnfulfilled = 8,
    InvalidUnlockBlock = 9,
    InputsCommitmentsMismatch = 10,
    UnverifiedSender = 11,
    InvalidChainStateTransition = 12,
    SemanticValidationFailed = 255,
}

impl ConflictReason {
    pub fn is_conflicting(&self) -> bool {
        *self != ConflictReason::None
    }
}

impl From<ConflictReason> for u8 {
    fn from(value: ConflictReason) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for ConflictReason {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => ConflictReason::None,
            1 => ConflictReason::InputUtxoAlreadySpent,
            2 => ConflictReason::InputUtxoAlreadySpentInThisMilestone,
            3 => ConflictReason::InputUtxoNotFound,
            4 => ConflictReason::CreatedConsumedAmountMismatch,
            5 => ConflictReason::InvalidSignature,
            6 => ConflictReason::TimelockNotExpired,
            7 => ConflictReason::InvalidNativeTokens,
            8 => ConflictReason::StorageDepositReturnUnfulfilled,
            9 => ConflictReason::InvalidUnlockBlock,
            10 => ConflictReason::InputsCommitmentsMismatch,
            11 => ConflictReason::UnverifiedSender,
            12 => ConflictReason::InvalidChainStateTransition,
            255 => ConflictReason::SemanticValidationFailed,
            other => return Err(other),
        })
    }
}
