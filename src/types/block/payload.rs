// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use blake2::Digest;
use serde::{Deserialize, Serialize};

use super::{Blake2b256, BlockId};
use crate::types::{
    ledger::{Output, OutputId, TransactionId},
    tangle::MilestoneIndex,
};

/// The payload carried by a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Transaction(Box<TransactionPayload>),
    Milestone(Box<MilestonePayload>),
    TaggedData(Box<TaggedDataPayload>),
}

impl From<TransactionPayload> for Payload {
    fn from(value: TransactionPayload) -> Self {
        Self::Transaction(Box::new(value))
    }
}

impl From<MilestonePayload> for Payload {
    fn from(value: MilestonePayload) -> Self {
        Self::Milestone(Box::new(value))
    }
}

impl From<TaggedDataPayload> for Payload {
    fn from(value: TaggedDataPayload) -> Self {
        Self::TaggedData(Box::new(value))
    }
}

/// The root of a Merkle tree over block ids.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MerkleRoot(pub [u8; 32]);

impl fmt::Display for MerkleRoot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&prefix_hex::encode(self.0.as_ref()))
    }
}

impl fmt::Debug for MerkleRoot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MerkleRoot({self})")
    }
}

/// Confirms the past cone of its block at `index`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestonePayload {
    pub index: MilestoneIndex,
    pub timestamp: u32,
    /// Must equal the parents of the enclosing block.
    pub parents: Vec<BlockId>,
    /// Merkle root over every block referenced by this milestone, in white-flag order.
    pub inclusion_merkle_root: MerkleRoot,
    /// Merkle root over the blocks whose transactions were applied to the ledger.
    pub applied_merkle_root: MerkleRoot,
}

/// Arbitrary data without ledger effect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedDataPayload {
    pub tag: Vec<u8>,
    pub data: Vec<u8>,
}

/// A value transfer consuming `inputs` and creating `outputs`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPayload {
    pub inputs: Vec<OutputId>,
    pub outputs: Vec<Output>,
    /// Opaque unlock data, checked by the configured transaction validator.
    pub unlock: Vec<u8>,
}

impl TransactionPayload {
    /// Computes the transaction id over a canonical encoding of all fields.
    pub fn id(&self) -> TransactionId {
        let mut hasher = Blake2b256::new();
        hasher.update((self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            hasher.update(input.to_bytes());
        }
        hasher.update((self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            hasher.update(output.address.0);
            hasher.update(output.amount.to_le_bytes());
        }
        hasher.update((self.unlock.len() as u32).to_le_bytes());
        hasher.update(&self.unlock);
        let mut id = [0; TransactionId::LENGTH];
        id.copy_from_slice(&hasher.finalize());
        TransactionId(id)
    }

    pub fn output_ids(&self) -> impl Iterator<Item = OutputId> + '_ {
        let transaction_id = self.id();
        (0..self.outputs.len()).map(move |index| OutputId::new(transaction_id, index as u16))
    }
}
