// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{
    block::{BlockError, BlockId},
    tangle::MilestoneIndex,
};

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub [u8; Self::LENGTH]);

impl TransactionId {
    pub const LENGTH: usize = 32;
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TransactionId({})", prefix_hex::encode(self.0.as_ref()))
    }
}

/// Identifies an output by the transaction that created it and its position.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputId {
    pub transaction_id: TransactionId,
    pub index: u16,
}

impl OutputId {
    pub const LENGTH: usize = TransactionId::LENGTH + 2;

    pub fn new(transaction_id: TransactionId, index: u16) -> Self {
        Self { transaction_id, index }
    }

    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        let mut bytes = [0; Self::LENGTH];
        bytes[..TransactionId::LENGTH].copy_from_slice(&self.transaction_id.0);
        bytes[TransactionId::LENGTH..].copy_from_slice(&self.index.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlockError> {
        if bytes.len() != Self::LENGTH {
            return Err(BlockError::InvalidLength {
                expected: Self::LENGTH,
                actual: bytes.len(),
            });
        }
        let mut transaction_id = [0; TransactionId::LENGTH];
        transaction_id.copy_from_slice(&bytes[..TransactionId::LENGTH]);
        Ok(Self {
            transaction_id: TransactionId(transaction_id),
            index: u16::from_le_bytes([bytes[TransactionId::LENGTH], bytes[TransactionId::LENGTH + 1]]),
        })
    }
}

impl fmt::Debug for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "OutputId({}:{})", prefix_hex::encode(self.transaction_id.0.as_ref()), self.index)
    }
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub [u8; 32]);

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Address({})", prefix_hex::encode(self.0.as_ref()))
    }
}

/// An amount of tokens owned by an address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Output {
    pub address: Address,
    pub amount: u64,
}

impl Output {
    pub fn new(address: Address, amount: u64) -> Self {
        Self { address, amount }
    }
}

/// An output as recorded in the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerOutput {
    pub output_id: OutputId,
    pub output: Output,
    /// The block whose transaction created the output.
    pub block_id: BlockId,
    pub milestone_index_booked: MilestoneIndex,
    pub milestone_timestamp_booked: u32,
}

/// A consumed output as recorded in the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSpent {
    pub output: LedgerOutput,
    pub transaction_id_spent: TransactionId,
    pub milestone_index_spent: MilestoneIndex,
    pub milestone_timestamp_spent: u32,
}
