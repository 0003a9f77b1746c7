// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use super::MilestoneIndex;
use crate::types::block::{BlockId, BlockError};

/// A milestone known to the node, pointing to the block that carries its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Milestone {
    pub index: MilestoneIndex,
    /// The block carrying the milestone payload.
    pub block_id: BlockId,
    pub timestamp: u32,
}

impl Milestone {
    const ENCODED_LENGTH: usize = BlockId::LENGTH + 4;

    pub fn new(index: MilestoneIndex, block_id: BlockId, timestamp: u32) -> Self {
        Self {
            index,
            block_id,
            timestamp,
        }
    }

    /// Encodes the milestone without its index, which serves as the storage key.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::ENCODED_LENGTH);
        bytes.extend_from_slice(self.block_id.as_ref());
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes
    }

    pub fn from_bytes(index: MilestoneIndex, bytes: &[u8]) -> Result<Self, BlockError> {
        if bytes.len() != Self::ENCODED_LENGTH {
            return Err(BlockError::InvalidLength {
                expected: Self::ENCODED_LENGTH,
                actual: bytes.len(),
            });
        }
        let (id, timestamp) = bytes.split_at(BlockId::LENGTH);
        Ok(Self {
            index,
            block_id: BlockId::from_slice(id)?,
            timestamp: u32::from_le_bytes([timestamp[0], timestamp[1], timestamp[2], timestamp[3]]),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_truncated_record() {
        let milestone = Milestone::new(7.into(), BlockId([3; 32]), 1_660_000_000);
        let bytes = milestone.to_bytes();
        assert_eq!(Milestone::from_bytes(7.into(), &bytes).unwrap(), milestone);
        assert!(Milestone::from_bytes(7.into(), &bytes[..10]).is_err());
    }
}
