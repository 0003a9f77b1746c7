// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Module containing the block types.

mod block_id;
mod parents;
mod payload;

use blake2::{digest::consts::U32, Blake2b, Digest};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::{
    block_id::BlockId,
    parents::Parents,
    payload::{MerkleRoot, MilestonePayload, Payload, TaggedDataPayload, TransactionPayload},
};

pub(crate) type Blake2b256 = Blake2b<U32>;

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("invalid parent count: {0}")]
    InvalidParentCount(usize),
    #[error("parents are not sorted and unique")]
    UnsortedParents,
    #[error("invalid conflict reason code: {0}")]
    InvalidConflictReason(u8),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// The part of a block that is hashed and transmitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    pub protocol_version: u8,
    pub parents: Parents,
    pub payload: Option<Payload>,
    pub nonce: u64,
}

/// An immutable block together with its id and serialized bytes.
///
/// There are no mutators: once created, a block only ever changes hands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    id: BlockId,
    data: BlockData,
    raw: Box<[u8]>,
}

impl Block {
    pub const PROTOCOL_VERSION: u8 = 2;

    /// Creates a block with the given parents and payload.
    pub fn build(parents: Parents, payload: Option<Payload>) -> Result<Self, BlockError> {
        Self::new(BlockData {
            protocol_version: Self::PROTOCOL_VERSION,
            parents,
            payload,
            nonce: 0,
        })
    }

    pub fn new(data: BlockData) -> Result<Self, BlockError> {
        let raw = bincode::serialize(&data)?.into_boxed_slice();
        Ok(Self {
            id: Self::hash(&raw),
            data,
            raw,
        })
    }

    /// Decodes a block from its serialized bytes.
    pub fn from_raw(raw: impl Into<Box<[u8]>>) -> Result<Self, BlockError> {
        let raw = raw.into();
        let data = bincode::deserialize::<BlockData>(&raw)?;
        Ok(Self {
            id: Self::hash(&raw),
            data,
            raw,
        })
    }

    fn hash(raw: &[u8]) -> BlockId {
        let mut id = [0; BlockId::LENGTH];
        id.copy_from_slice(&Blake2b256::digest(raw));
        BlockId(id)
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn parents(&self) -> &Parents {
        &self.data.parents
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.data.payload.as_ref()
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn data(&self) -> &BlockData {
        &self.data
    }

    pub fn milestone(&self) -> Option<&MilestonePayload> {
        match self.payload() {
            Some(Payload::Milestone(ms)) => Some(ms),
            _ => None,
        }
    }

    pub fn transaction(&self) -> Option<&TransactionPayload> {
        match self.payload() {
            Some(Payload::Transaction(tx)) => Some(tx),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn id_is_content_derived() {
        let parents = Parents::new([BlockId([1; 32])]).unwrap();
        let a = Block::build(parents.clone(), None).unwrap();
        let b = Block::build(parents.clone(), None).unwrap();
        assert_eq!(a.id(), b.id());

        let c = Block::new(BlockData {
            nonce: 1,
            ..a.data().clone()
        })
        .unwrap();
        assert_ne!(a.id(), c.id());

        let decoded = Block::from_raw(a.raw().to_vec()).unwrap();
        assert_eq!(decoded, a);
    }

    #[test]
    fn malformed_parents_rejected_on_decode() {
        let mut data = Block::build(Parents::new([BlockId([1; 32])]).unwrap(), None)
            .unwrap()
            .data()
            .clone();
        data.parents = Parents::new([BlockId([1; 32]), BlockId([2; 32])]).unwrap();
        let mut raw = bincode::serialize(&data).unwrap();
        // Swap the two parent ids so the encoded list is no longer ascending.
        let first = raw.iter().position(|b| *b == 1).unwrap();
        let (a, b) = raw[first..first + 64].split_at_mut(32);
        a.swap_with_slice(b);
        assert!(Block::from_raw(raw).is_err());
    }
}
