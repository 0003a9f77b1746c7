// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, instrument};

use super::{AbortSignal, ConcurrentParentsTraverser, ConcurrentParentsVisitor, TraversalError};
use crate::{
    db::StorageError,
    storage::{CachedMetadata, SolidEntryPoints, Storage},
    types::{block::BlockId, tangle::MilestoneIndex},
};

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum SolidEntryPointError {
    #[error(transparent)]
    Traversal(#[from] TraversalError),
    #[error("milestone {0} not found")]
    MilestoneNotFound(MilestoneIndex),
    #[error("solid entry point {0} is not referenced")]
    NotReferenced(BlockId),
}

impl From<StorageError> for SolidEntryPointError {
    fn from(e: StorageError) -> Self {
        Self::Traversal(e.into())
    }
}

impl SolidEntryPointError {
    /// Whether the error indicates an inconsistent database.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::MilestoneNotFound(_) | Self::NotReferenced(_))
    }
}

struct EntryPointCollector<'a, F> {
    storage: &'a Storage,
    milestone_index: MilestoneIndex,
    target_index: MilestoneIndex,
    found: &'a DashMap<BlockId, MilestoneIndex>,
    consumer: &'a F,
}

impl<'a, F> EntryPointCollector<'a, F> {
    /// A block is an entry point if one of its children was referenced after the target index.
    fn referenced_index_if_entry_point(
        &self,
        metadata: &CachedMetadata,
    ) -> Result<Option<MilestoneIndex>, SolidEntryPointError> {
        for child in self.storage.child_block_ids(&metadata.block_id())? {
            let Some(child) = self.storage.cached_block_metadata(&child)? else {
                continue;
            };
            if matches!(child.referenced_index(), Some(at) if at > self.target_index) {
                return metadata
                    .referenced_index()
                    .map(Some)
                    .ok_or(SolidEntryPointError::NotReferenced(metadata.block_id()));
            }
        }
        Ok(None)
    }
}

impl<'a, F> ConcurrentParentsVisitor for EntryPointCollector<'a, F>
where
    F: Fn(BlockId, MilestoneIndex) + Sync,
{
    type Error = SolidEntryPointError;

    fn condition(&self, metadata: &CachedMetadata) -> Result<bool, Self::Error> {
        Ok(matches!(metadata.referenced_index(), Some(at) if at >= self.milestone_index))
    }

    fn consume(&self, metadata: &CachedMetadata) -> Result<(), Self::Error> {
        if let Some(at) = self.referenced_index_if_entry_point(metadata)? {
            if self.found.insert(metadata.block_id(), at).is_none() {
                (self.consumer)(metadata.block_id(), at);
            }
        }
        Ok(())
    }

    fn on_missing_parent(&self, block_id: &BlockId) -> Result<(), Self::Error> {
        // Current entry points may already be pruned.
        if self.storage.solid_entry_points_contain(block_id) {
            return Ok(());
        }
        Err(TraversalError::BlockNotFound(*block_id).into())
    }
}

/// Reports the solid entry points the tangle would have if it were pruned at `target_index`.
///
/// Walks the cones of the milestones in `[target_index - check_threshold_past, target_index]` and reports every
/// block referenced by one of them that has a child referenced after `target_index`. Every entry point is reported
/// once, in no particular order.
#[instrument(skip(storage, abort, consumer), err, level = "debug")]
pub fn for_each_solid_entry_point<F>(
    storage: &Storage,
    target_index: MilestoneIndex,
    check_threshold_past: u32,
    parallelism: usize,
    abort: &AbortSignal,
    consumer: F,
) -> Result<(), SolidEntryPointError>
where
    F: Fn(BlockId, MilestoneIndex) + Sync,
{
    let found = DashMap::new();
    let traverser = ConcurrentParentsTraverser::new(storage, parallelism);
    let first = MilestoneIndex(target_index.saturating_sub(check_threshold_past).max(1));

    for index in first.0..=target_index.0 {
        let milestone_index = MilestoneIndex(index);
        let milestone = storage
            .cached_milestone(milestone_index)?
            .ok_or(SolidEntryPointError::MilestoneNotFound(milestone_index))?;
        let parents = storage
            .cached_block_metadata(&milestone.block_id)?
            .ok_or(TraversalError::BlockNotFound(milestone.block_id))?
            .consume(|metadata| metadata.parents().to_vec());
        drop(milestone);

        let collector = EntryPointCollector {
            storage,
            milestone_index,
            target_index,
            found: &found,
            consumer: &consumer,
        };
        // The target milestone may reference current entry points, their cones are walked as well.
        traverser.traverse(&parents, true, &collector, abort)?;
    }
    debug!("Found {} solid entry points for index {target_index}.", found.len());
    Ok(())
}

/// Collects the result of [`for_each_solid_entry_point`].
pub fn compute_solid_entry_points(
    storage: &Storage,
    target_index: MilestoneIndex,
    check_threshold_past: u32,
    parallelism: usize,
    abort: &AbortSignal,
) -> Result<SolidEntryPoints, SolidEntryPointError> {
    let collected = DashMap::new();
    for_each_solid_entry_point(storage, target_index, check_threshold_past, parallelism, abort, |id, index| {
        collected.insert(id, index);
    })?;
    Ok(collected.into_iter().collect())
}
