// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Module that contains the storage facade of the node.
//!
//! [`Storage`] bundles the object caches for blocks, block metadata and milestones with the secondary indexes
//! (children, unreferenced blocks), the solid entry points and the health flags.

mod cache;
mod config;
mod memcache;
mod objects;
mod solid_entry_points;

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

pub use self::{
    cache::{CachedObject, ObjectStorage, StorableObject},
    config::{CacheConfig, ObjectCacheConfig, DEFAULT_CACHE_TIME, DEFAULT_FLUSH_INTERVAL, DEFAULT_MILESTONES_CACHE_TIME},
    memcache::Memcache,
    objects::{CachedBlock, CachedMetadata, CachedMilestone},
    solid_entry_points::SolidEntryPoints,
};
use crate::{
    db::{Batch, KvStore, StorageError, StorePrefix},
    types::{
        block::{Block, BlockId},
        ledger::BlockMetadata,
        tangle::{Milestone, MilestoneIndex, ProtocolParameters},
    },
};

const SOLID_ENTRY_POINTS_KEY: &[u8] = b"solid_entry_points";
const CORRUPTED_KEY: &[u8] = b"corrupted";
const TAINTED_KEY: &[u8] = b"tainted";

/// The storage facade shared by all tangle components.
#[derive(Debug)]
pub struct Storage {
    store: Arc<dyn KvStore>,
    blocks: ObjectStorage<Block>,
    metadata: ObjectStorage<BlockMetadata>,
    milestones: ObjectStorage<Milestone>,
    solid_entry_points: RwLock<SolidEntryPoints>,
}

impl Storage {
    /// Opens the storage on top of the given store. Fails if the store was marked as corrupted.
    pub fn new(store: Arc<dyn KvStore>, config: &CacheConfig) -> Result<Self, StorageError> {
        if store.has(&StorePrefix::Health.key(&[CORRUPTED_KEY]))? {
            return Err(StorageError::Corrupted);
        }
        let solid_entry_points = match store.get(&StorePrefix::Snapshot.key(&[SOLID_ENTRY_POINTS_KEY]))? {
            Some(bytes) => SolidEntryPoints::from_bytes(&bytes).map_err(StorageError::decode("solid entry points"))?,
            None => SolidEntryPoints::new(),
        };
        debug!("Loaded {} solid entry points.", solid_entry_points.len());
        Ok(Self {
            blocks: ObjectStorage::new(store.clone(), config.blocks.cache_time),
            metadata: ObjectStorage::new(store.clone(), config.metadata.cache_time),
            milestones: ObjectStorage::new(store.clone(), config.milestones.cache_time),
            solid_entry_points: RwLock::new(solid_entry_points),
            store,
        })
    }

    /// The underlying key-value store.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn cached_block(&self, block_id: &BlockId) -> Result<Option<CachedBlock>, StorageError> {
        self.blocks.get(block_id)
    }

    pub fn cached_block_metadata(&self, block_id: &BlockId) -> Result<Option<CachedMetadata>, StorageError> {
        self.metadata.get(block_id)
    }

    pub fn contains_block(&self, block_id: &BlockId) -> Result<bool, StorageError> {
        self.blocks.contains(block_id)
    }

    /// The cache of block metadata, used to build per-operation memcaches.
    pub fn metadata_storage(&self) -> &ObjectStorage<BlockMetadata> {
        &self.metadata
    }

    /// Stores the block and its metadata in one step and indexes it as a child of its parents.
    ///
    /// Returns the metadata of the block and whether the block was new.
    pub fn store_block_if_absent(&self, block: Block) -> Result<(CachedMetadata, bool), StorageError> {
        let block_id = block.id();
        let parents = block.parents().to_vec();

        // Handles are declared before the guards so they are released after both locks are gone.
        let (_block, created, metadata);
        let mut block_entries = self.blocks.lock_entries();
        let mut metadata_entries = self.metadata.lock_entries();
        (_block, created) = self.blocks.store_if_absent_locked(&mut block_entries, block)?;
        (metadata, _) = self
            .metadata
            .store_if_absent_locked(&mut metadata_entries, BlockMetadata::new(block_id, &parents))?;
        drop(metadata_entries);
        drop(block_entries);

        if created {
            let mut batch = Batch::default();
            for parent in &parents {
                batch.set(StorePrefix::Children.key(&[parent.as_ref(), block_id.as_ref()]), Vec::new());
            }
            self.store.write_batch(batch)?;
        }
        Ok((metadata, created))
    }

    /// The ids of all known blocks that reference the given block.
    pub fn child_block_ids(&self, block_id: &BlockId) -> Result<Vec<BlockId>, StorageError> {
        let prefix = StorePrefix::Children.key(&[block_id.as_ref()]);
        let mut children = Vec::new();
        let mut error = None;
        self.store.iterate_prefix(&prefix, &mut |key, _| match BlockId::from_slice(&key[prefix.len()..]) {
            Ok(child) => {
                children.push(child);
                true
            }
            Err(e) => {
                error = Some(e);
                false
            }
        })?;
        match error {
            Some(e) => Err(StorageError::decode("child index")(e)),
            None => Ok(children),
        }
    }

    pub fn cached_milestone(&self, index: MilestoneIndex) -> Result<Option<CachedMilestone>, StorageError> {
        self.milestones.get(&index)
    }

    pub fn contains_milestone(&self, index: MilestoneIndex) -> Result<bool, StorageError> {
        self.milestones.contains(&index)
    }

    /// Stores the milestone unless one with the same index is known. Returns whether it was new.
    pub fn store_milestone_if_absent(&self, milestone: Milestone) -> Result<(CachedMilestone, bool), StorageError> {
        self.milestones.store_if_absent(milestone)
    }

    /// Finds the first known milestone after `index`, up to and including `latest`.
    pub fn find_closest_next_milestone(
        &self,
        index: MilestoneIndex,
        latest: MilestoneIndex,
    ) -> Result<Option<CachedMilestone>, StorageError> {
        let mut next = index + 1;
        while next <= latest {
            if let Some(milestone) = self.cached_milestone(next)? {
                return Ok(Some(milestone));
            }
            next += 1;
        }
        Ok(None)
    }

    fn unreferenced_key(index: MilestoneIndex, block_id: &BlockId) -> Vec<u8> {
        StorePrefix::Unreferenced.key(&[&index.to_be_bytes(), block_id.as_ref()])
    }

    /// Records a block that is not referenced yet and is expected to be referenced by `index` at the earliest.
    pub fn store_unreferenced_block(&self, index: MilestoneIndex, block_id: &BlockId) -> Result<(), StorageError> {
        self.store.set(&Self::unreferenced_key(index, block_id), &[])
    }

    pub fn unreferenced_block_ids(&self, index: MilestoneIndex) -> Result<Vec<BlockId>, StorageError> {
        let prefix = StorePrefix::Unreferenced.key(&[&index.to_be_bytes()]);
        let mut ids = Vec::new();
        self.store.iterate_prefix(&prefix, &mut |key, _| {
            if let Ok(id) = BlockId::from_slice(&key[prefix.len()..]) {
                ids.push(id);
            }
            true
        })?;
        Ok(ids)
    }

    pub fn delete_unreferenced_blocks(&self, index: MilestoneIndex) -> Result<(), StorageError> {
        self.store
            .delete_prefix(&StorePrefix::Unreferenced.key(&[&index.to_be_bytes()]))
    }

    pub fn solid_entry_points(&self) -> RwLockReadGuard<'_, SolidEntryPoints> {
        self.solid_entry_points.read()
    }

    /// Write access for the snapshot and pruning layers.
    pub fn solid_entry_points_mut(&self) -> RwLockWriteGuard<'_, SolidEntryPoints> {
        self.solid_entry_points.write()
    }

    pub fn solid_entry_points_contain(&self, block_id: &BlockId) -> bool {
        self.solid_entry_points.read().contains(block_id)
    }

    pub fn solid_entry_point_index(&self, block_id: &BlockId) -> Option<MilestoneIndex> {
        self.solid_entry_points.read().index(block_id)
    }

    /// Persists the current solid entry points.
    pub fn store_solid_entry_points(&self) -> Result<(), StorageError> {
        let bytes = self.solid_entry_points.read().to_bytes();
        self.store
            .set(&StorePrefix::Snapshot.key(&[SOLID_ENTRY_POINTS_KEY]), &bytes)
    }

    pub fn protocol_parameters(&self) -> Result<Option<ProtocolParameters>, StorageError> {
        Ok(self
            .store
            .get(&StorePrefix::Protocol.key(&[]))?
            .map(|bytes| ProtocolParameters::from_bytes(&bytes))
            .transpose()?)
    }

    pub fn store_protocol_parameters(&self, params: &ProtocolParameters) -> Result<(), StorageError> {
        self.store.set(&StorePrefix::Protocol.key(&[]), &params.to_bytes()?)
    }

    /// Marks the store as corrupted. A corrupted store is refused at the next start.
    pub fn mark_corrupted(&self) -> Result<(), StorageError> {
        warn!("Marking the database as corrupted.");
        self.store.set(&StorePrefix::Health.key(&[CORRUPTED_KEY]), &[1])
    }

    pub fn is_corrupted(&self) -> Result<bool, StorageError> {
        self.store.has(&StorePrefix::Health.key(&[CORRUPTED_KEY]))
    }

    /// Marks the store as tainted, i.e. not shut down cleanly. Cleared by [`Storage::shutdown`].
    pub fn mark_tainted(&self) -> Result<(), StorageError> {
        self.store.set(&StorePrefix::Health.key(&[TAINTED_KEY]), &[1])
    }

    pub fn is_tainted(&self) -> Result<bool, StorageError> {
        self.store.has(&StorePrefix::Health.key(&[TAINTED_KEY]))
    }

    /// Writes all modified cached objects back to the store.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.blocks.flush()?;
        self.metadata.flush()?;
        self.milestones.flush()
    }

    /// Flushes the caches, drops all objects not in use and clears the tainted flag.
    pub fn shutdown(&self) -> Result<(), StorageError> {
        self.blocks.shutdown()?;
        self.metadata.shutdown()?;
        self.milestones.shutdown()?;
        self.store_solid_entry_points()?;
        self.store.delete(&StorePrefix::Health.key(&[TAINTED_KEY]))
    }

    /// The number of object handles alive across all caches.
    pub fn live_handles(&self) -> usize {
        self.blocks.live_handles() + self.metadata.live_handles() + self.milestones.live_handles()
    }
}
