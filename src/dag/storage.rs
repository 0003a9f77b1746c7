// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use super::TraverserStorage;
use crate::{
    db::StorageError,
    storage::{CachedMetadata, Memcache, Storage},
    types::{block::BlockId, ledger::BlockMetadata, tangle::MilestoneIndex},
};

impl TraverserStorage for Storage {
    fn cached_block_metadata(&self, block_id: &BlockId) -> Result<Option<CachedMetadata>, StorageError> {
        Storage::cached_block_metadata(self, block_id)
    }

    fn solid_entry_points_contain(&self, block_id: &BlockId) -> bool {
        Storage::solid_entry_points_contain(self, block_id)
    }

    fn solid_entry_point_index(&self, block_id: &BlockId) -> Option<MilestoneIndex> {
        Storage::solid_entry_point_index(self, block_id)
    }

    fn child_block_ids(&self, block_id: &BlockId) -> Result<Vec<BlockId>, StorageError> {
        Storage::child_block_ids(self, block_id)
    }
}

/// A [`TraverserStorage`] that keeps every metadata it hands out until [`MemcachedTraverserStorage::cleanup`].
///
/// Used by operations that run several traversals over the same cone.
pub struct MemcachedTraverserStorage<'a> {
    storage: &'a Storage,
    metadata: Memcache<BlockMetadata>,
}

impl<'a> MemcachedTraverserStorage<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self {
            storage,
            metadata: Memcache::new(storage.metadata_storage().clone()),
        }
    }

    pub fn storage(&self) -> &'a Storage {
        self.storage
    }

    /// Releases all cached metadata. `force` evicts it from the object cache right away.
    pub fn cleanup(self, force: bool) {
        self.metadata.cleanup(force);
    }
}

impl<'a> TraverserStorage for MemcachedTraverserStorage<'a> {
    fn cached_block_metadata(&self, block_id: &BlockId) -> Result<Option<CachedMetadata>, StorageError> {
        self.metadata.get(block_id)
    }

    fn solid_entry_points_contain(&self, block_id: &BlockId) -> bool {
        self.storage.solid_entry_points_contain(block_id)
    }

    fn solid_entry_point_index(&self, block_id: &BlockId) -> Option<MilestoneIndex> {
        self.storage.solid_entry_point_index(block_id)
    }

    fn child_block_ids(&self, block_id: &BlockId) -> Result<Vec<BlockId>, StorageError> {
        self.storage.child_block_ids(block_id)
    }
}
