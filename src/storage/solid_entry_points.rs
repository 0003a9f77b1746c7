// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use blake2::Digest;

use crate::types::{
    block::{Blake2b256, BlockError, BlockId},
    tangle::MilestoneIndex,
};

/// The blocks at the local horizon of the tangle, mapped to the milestone index that referenced them.
///
/// Traversals treat solid entry points as solid and never descend into their past.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SolidEntryPoints {
    inner: HashMap<BlockId, MilestoneIndex>,
}

impl SolidEntryPoints {
    const ENTRY_LENGTH: usize = BlockId::LENGTH + 4;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, block_id: &BlockId) -> bool {
        self.inner.contains_key(block_id)
    }

    pub fn index(&self, block_id: &BlockId) -> Option<MilestoneIndex> {
        self.inner.get(block_id).copied()
    }

    pub fn add(&mut self, block_id: BlockId, index: MilestoneIndex) {
        self.inner.insert(block_id, index);
    }

    pub fn remove(&mut self, block_id: &BlockId) -> Option<MilestoneIndex> {
        self.inner.remove(block_id)
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// The entry points ordered by block id.
    pub fn sorted(&self) -> Vec<(BlockId, MilestoneIndex)> {
        let mut entries = self.inner.iter().map(|(id, index)| (*id, *index)).collect::<Vec<_>>();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries
    }

    /// Canonical encoding: every entry as its id followed by the index (u32 LE), sorted by id.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.len() * Self::ENTRY_LENGTH);
        for (id, index) in self.sorted() {
            bytes.extend_from_slice(id.as_ref());
            bytes.extend_from_slice(&index.0.to_le_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlockError> {
        if bytes.len() % Self::ENTRY_LENGTH != 0 {
            return Err(BlockError::InvalidLength {
                expected: bytes.len() / Self::ENTRY_LENGTH * Self::ENTRY_LENGTH,
                actual: bytes.len(),
            });
        }
        let mut sep = Self::new();
        for entry in bytes.chunks_exact(Self::ENTRY_LENGTH) {
            let (id, index) = entry.split_at(BlockId::LENGTH);
            sep.add(
                BlockId::from_slice(id)?,
                MilestoneIndex(u32::from_le_bytes([index[0], index[1], index[2], index[3]])),
            );
        }
        Ok(sep)
    }

    /// The Blake2b-256 digest of the canonical encoding.
    pub fn digest(&self) -> [u8; 32] {
        let mut digest = [0; 32];
        digest.copy_from_slice(&Blake2b256::digest(self.to_bytes()));
        digest
    }
}

impl FromIterator<(BlockId, MilestoneIndex)> for SolidEntryPoints {
    fn from_iter<I: IntoIterator<Item = (BlockId, MilestoneIndex)>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}
