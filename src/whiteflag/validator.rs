// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use crate::types::{
    block::TransactionPayload,
    ledger::{ConflictReason, LedgerOutput},
};

/// Semantic validation of a transaction against the outputs it consumes.
///
/// Called during white-flag confirmation once all inputs were found unspent. The result must only depend on the
/// arguments, otherwise confirmation is not reproducible.
pub trait TransactionValidator: Send + Sync {
    /// Returns [`ConflictReason::None`] if the transaction is valid.
    fn validate(&self, transaction: &TransactionPayload, inputs: &[LedgerOutput]) -> ConflictReason;
}

/// Requires balanced amounts and a non empty unlock.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultTransactionValidator;

impl TransactionValidator for DefaultTransactionValidator {
    fn validate(&self, transaction: &TransactionPayload, inputs: &[LedgerOutput]) -> ConflictReason {
        let consumed = inputs
            .iter()
            .try_fold(0u64, |sum, input| sum.checked_add(input.output.amount));
        let created = transaction
            .outputs
            .iter()
            .try_fold(0u64, |sum, output| sum.checked_add(output.amount));
        match (consumed, created) {
            (Some(consumed), Some(created)) if consumed == created => (),
            _ => return ConflictReason::CreatedConsumedAmountMismatch,
        }
        if transaction.unlock.is_empty() {
            return ConflictReason::InvalidUnlockBlock;
        }
        ConflictReason::None
    }
}
