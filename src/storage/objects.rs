// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use super::cache::{CachedObject, StorableObject};
use crate::{
    db::{StorageError, StorePrefix},
    types::{
        block::{Block, BlockId},
        ledger::BlockMetadata,
        tangle::{Milestone, MilestoneIndex},
    },
};

pub type CachedBlock = CachedObject<Block>;
pub type CachedMetadata = CachedObject<BlockMetadata>;
pub type CachedMilestone = CachedObject<Milestone>;

impl StorableObject for Block {
    type Key = BlockId;

    const PREFIX: StorePrefix = StorePrefix::Blocks;

    fn key(&self) -> Self::Key {
        self.id()
    }

    fn key_bytes(key: &Self::Key) -> Vec<u8> {
        key.0.to_vec()
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.raw().to_vec()
    }

    fn from_bytes(key: Self::Key, bytes: &[u8]) -> Result<Self, StorageError> {
        let block = Block::from_raw(bytes).map_err(StorageError::decode("block"))?;
        if block.id() != key {
            return Err(StorageError::Corrupted);
        }
        Ok(block)
    }
}

impl StorableObject for BlockMetadata {
    type Key = BlockId;

    const PREFIX: StorePrefix = StorePrefix::Metadata;

    fn key(&self) -> Self::Key {
        self.block_id()
    }

    fn key_bytes(key: &Self::Key) -> Vec<u8> {
        key.0.to_vec()
    }

    fn to_bytes(&self) -> Vec<u8> {
        BlockMetadata::to_bytes(self)
    }

    fn from_bytes(key: Self::Key, bytes: &[u8]) -> Result<Self, StorageError> {
        BlockMetadata::from_bytes(key, bytes).map_err(StorageError::decode("block metadata"))
    }

    fn is_modified(&self) -> bool {
        BlockMetadata::is_modified(self)
    }

    fn set_modified(&self, modified: bool) {
        BlockMetadata::set_modified(self, modified)
    }
}

impl StorableObject for Milestone {
    type Key = MilestoneIndex;

    const PREFIX: StorePrefix = StorePrefix::MilestoneIndex;

    fn key(&self) -> Self::Key {
        self.index
    }

    fn key_bytes(key: &Self::Key) -> Vec<u8> {
        key.to_be_bytes().to_vec()
    }

    fn to_bytes(&self) -> Vec<u8> {
        Milestone::to_bytes(self)
    }

    fn from_bytes(key: Self::Key, bytes: &[u8]) -> Result<Self, StorageError> {
        Milestone::from_bytes(key, bytes).map_err(StorageError::decode("milestone"))
    }
}
