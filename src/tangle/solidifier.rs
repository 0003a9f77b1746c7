// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::{collections::HashSet, sync::Arc, time::Instant};

use tokio::{sync::broadcast::error::RecvError, time::timeout};
use tracing::{debug, info, instrument, trace};

use super::{Events, Tangle, TangleError, TangleEvent};
use crate::{
    dag::{
        AbortSignal, ChildrenTraverser, ChildrenVisitor, MemcachedTraverserStorage, ParentsTraverser, ParentsVisitor,
        TraversalError, TraverserStorage,
    },
    db::StorageError,
    storage::CachedMetadata,
    types::{
        block::BlockId,
        tangle::{Milestone, MilestoneIndex},
    },
    whiteflag::{compute_white_flag_mutations, ConfirmationError, WhiteFlagMutations},
};

/// Whether a block is solid, judged by its own flag or else by its direct parents only.
pub fn is_solid<S: TraverserStorage>(storage: &S, metadata: &CachedMetadata) -> Result<bool, StorageError> {
    if metadata.is_solid() {
        return Ok(true);
    }
    parents_solid(storage, metadata.parents())
}

fn parents_solid<S: TraverserStorage>(storage: &S, parents: &[BlockId]) -> Result<bool, StorageError> {
    for parent in parents {
        if storage.solid_entry_points_contain(parent) {
            continue;
        }
        match storage.cached_block_metadata(parent)? {
            Some(metadata) if metadata.is_solid() => continue,
            _ => return Ok(false),
        }
    }
    Ok(true)
}

/// The result of checking the past cone of a milestone for solidity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SolidQueueCheck {
    /// The whole cone is solid.
    pub solid: bool,
    pub aborted: bool,
    /// Every block of the cone that is not stored locally.
    pub missing: Vec<BlockId>,
    /// The missing blocks that were not requested before.
    pub requested: Vec<BlockId>,
}

impl SolidQueueCheck {
    fn aborted() -> Self {
        Self {
            aborted: true,
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct SolidQueueVisitor {
    to_solidify: Vec<BlockId>,
    missing: Vec<BlockId>,
}

impl ParentsVisitor for SolidQueueVisitor {
    type Error = TraversalError;

    fn condition(&mut self, metadata: &CachedMetadata) -> Result<bool, Self::Error> {
        Ok(!metadata.is_solid())
    }

    fn consume(&mut self, metadata: &CachedMetadata) -> Result<(), Self::Error> {
        self.to_solidify.push(metadata.block_id());
        Ok(())
    }

    fn on_missing_parent(&mut self, block_id: &BlockId) -> Result<(), Self::Error> {
        self.missing.push(*block_id);
        Ok(())
    }
}

/// Marks blocks of a future cone as solid once all of their parents are.
struct FutureConeSolidifier<'a, S> {
    storage: &'a S,
    events: &'a Events,
    start: BlockId,
}

impl<'a, S: TraverserStorage> ChildrenVisitor for FutureConeSolidifier<'a, S> {
    type Error = TraversalError;

    fn condition(&mut self, metadata: &CachedMetadata) -> Result<bool, Self::Error> {
        if metadata.is_solid() {
            // Only walk on from blocks that just became solid, or from the start.
            return Ok(metadata.block_id() == self.start);
        }
        if !parents_solid(self.storage, metadata.parents())? {
            return Ok(false);
        }
        mark_block_as_solid(self.events, metadata);
        Ok(true)
    }

    fn consume(&mut self, _metadata: &CachedMetadata) -> Result<(), Self::Error> {
        Ok(())
    }
}

fn mark_block_as_solid(events: &Events, metadata: &CachedMetadata) {
    metadata.set_solid(true);
    events.emit(TangleEvent::BlockSolid(metadata.block_id()));
}

struct MissingMilestoneCollector<'a> {
    tangle: &'a Tangle,
    confirmed: MilestoneIndex,
    target: MilestoneIndex,
    found: bool,
}

impl<'a> ParentsVisitor for MissingMilestoneCollector<'a> {
    type Error = TangleError;

    fn condition(&mut self, metadata: &CachedMetadata) -> Result<bool, Self::Error> {
        Ok(!metadata.is_referenced())
    }

    fn consume(&mut self, metadata: &CachedMetadata) -> Result<(), Self::Error> {
        let block_id = metadata.block_id();
        let Some(block) = self.tangle.storage.cached_block(&block_id)? else {
            return Ok(());
        };
        let Some(payload) = block.milestone() else {
            return Ok(());
        };
        if payload.index > self.confirmed && payload.index < self.target {
            let milestone = Milestone::new(payload.index, block_id, payload.timestamp);
            if self.tangle.store_milestone(metadata, milestone)? {
                info!("Found missing milestone {}.", payload.index);
            }
            self.found = true;
        }
        Ok(())
    }
}

impl Tangle {
    /// Checks whether the past cone of `parents` is complete and marks it solid if so.
    ///
    /// Missing blocks are handed to the requester on behalf of milestone `index`, nothing is marked solid then.
    /// Calling it again without new blocks requests nothing new.
    pub fn solid_queue_check(
        &self,
        index: MilestoneIndex,
        parents: &[BlockId],
        prevent_discard: bool,
        abort: &AbortSignal,
    ) -> Result<SolidQueueCheck, TangleError> {
        let storage = MemcachedTraverserStorage::new(&self.storage);
        let result = self.solid_queue_check_with(&storage, index, parents, prevent_discard, abort);
        storage.cleanup(true);
        result
    }

    pub(crate) fn solid_queue_check_with<S: TraverserStorage>(
        &self,
        storage: &S,
        index: MilestoneIndex,
        parents: &[BlockId],
        prevent_discard: bool,
        abort: &AbortSignal,
    ) -> Result<SolidQueueCheck, TangleError> {
        let start = Instant::now();
        let mut visitor = SolidQueueVisitor::default();
        match ParentsTraverser::new(storage).traverse(parents, false, &mut visitor, abort) {
            Ok(()) => (),
            Err(TraversalError::Aborted) => return Ok(SolidQueueCheck::aborted()),
            Err(e) => return Err(e.into()),
        }
        let collected = start.elapsed();

        if !visitor.missing.is_empty() {
            let requested = visitor
                .missing
                .iter()
                .copied()
                .filter(|block_id| self.requester.request(*block_id, index, prevent_discard))
                .collect::<Vec<_>>();
            debug!(
                "Requested missing blocks ({}/{}), collect: {collected:?}",
                requested.len(),
                visitor.missing.len()
            );
            return Ok(SolidQueueCheck {
                solid: false,
                aborted: false,
                missing: visitor.missing,
                requested,
            });
        }

        // Oldest first, as collected by the traversal.
        for block_id in &visitor.to_solidify {
            if let Some(metadata) = storage.cached_block_metadata(block_id)? {
                mark_block_as_solid(&self.events, &metadata);
            }
        }

        if self.sync.is_node_almost_synced() {
            match self.solidify_future_cone_with(storage, &visitor.to_solidify, abort) {
                Ok(()) => (),
                Err(TraversalError::Aborted) => return Ok(SolidQueueCheck::aborted()),
                Err(e) => return Err(e.into()),
            }
        }

        debug!(
            "Solidifier finished: blocks: {}, collect: {collected:?}, total: {:?}",
            visitor.to_solidify.len(),
            start.elapsed()
        );
        Ok(SolidQueueCheck {
            solid: true,
            ..Default::default()
        })
    }

    /// Marks the given block solid if its parents are, and spreads solidity into its future cone.
    pub fn solidify_future_cone(&self, block_ids: &[BlockId], abort: &AbortSignal) -> Result<(), TangleError> {
        let storage = MemcachedTraverserStorage::new(&self.storage);
        let result = self.solidify_future_cone_with(&storage, block_ids, abort);
        storage.cleanup(false);
        Ok(result?)
    }

    #[instrument(skip_all, fields(blocks = block_ids.len()), level = "trace")]
    fn solidify_future_cone_with<S: TraverserStorage>(
        &self,
        storage: &S,
        block_ids: &[BlockId],
        abort: &AbortSignal,
    ) -> Result<(), TraversalError> {
        let traverser = ChildrenTraverser::new(storage);
        for block_id in block_ids {
            let mut visitor = FutureConeSolidifier {
                storage,
                events: &self.events,
                start: *block_id,
            };
            traverser.traverse(block_id, true, &mut visitor, abort)?;
        }
        Ok(())
    }

    /// Searches the unreferenced past cone of `parents` for milestones between `confirmed` and `target`, both
    /// exclusive, and registers them. Returns whether one was found.
    pub fn search_missing_milestones<S: TraverserStorage>(
        &self,
        storage: &S,
        confirmed: MilestoneIndex,
        target: MilestoneIndex,
        parents: &[BlockId],
        abort: &AbortSignal,
    ) -> Result<bool, TangleError> {
        let mut collector = MissingMilestoneCollector {
            tangle: self,
            confirmed,
            target,
            found: false,
        };
        ParentsTraverser::new(storage).traverse(parents, false, &mut collector, abort)?;
        Ok(collector.found)
    }

    /// Makes sure the past cone of `parents` is solid and computes the mutations a milestone with these parents
    /// would apply. Nothing is written.
    ///
    /// Waits up to the configured timeout for missing parents to arrive.
    pub async fn check_solidity_and_compute_white_flag_mutations(
        self: &Arc<Self>,
        index: MilestoneIndex,
        timestamp: u32,
        parents: Vec<BlockId>,
    ) -> Result<WhiteFlagMutations, TangleError> {
        let confirmed = self.sync.confirmed_milestone_index();
        if index > confirmed + 1 {
            return Err(ConfirmationError::NodeNotSynced {
                confirmed,
                requested: index,
            }
            .into());
        }
        if parents.is_empty() {
            return Err(ConfirmationError::NoParents.into());
        }

        // Subscribe first so that no solid event gets lost.
        let mut events = self.events.subscribe();
        let tangle = self.clone();
        let start = parents.clone();
        let check = tokio::task::spawn_blocking(move || {
            tangle.solid_queue_check(index, &start, true, &AbortSignal::new())
        })
        .await??;

        if !check.solid {
            let mut pending = HashSet::new();
            for parent in &parents {
                if !self.is_block_solid(parent)? {
                    pending.insert(*parent);
                }
            }
            let wait = async {
                while !pending.is_empty() {
                    match events.recv().await {
                        Ok(TangleEvent::BlockSolid(block_id)) => {
                            pending.remove(&block_id);
                        }
                        Ok(_) => (),
                        Err(RecvError::Lagged(skipped)) => {
                            trace!("missed {skipped} events while waiting for solid parents");
                            let mut still_pending = HashSet::new();
                            for parent in pending.drain() {
                                if !self.is_block_solid(&parent)? {
                                    still_pending.insert(parent);
                                }
                            }
                            pending = still_pending;
                        }
                        Err(RecvError::Closed) => return Ok(false),
                    }
                }
                Ok::<_, StorageError>(true)
            };
            match timeout(self.config.white_flag_parents_solid_timeout, wait).await {
                Ok(Ok(true)) => (),
                Ok(Ok(false)) | Err(_) => return Err(TangleError::ParentsNotSolid(index)),
                Ok(Err(e)) => return Err(e.into()),
            }
        }

        let tangle = self.clone();
        tokio::task::spawn_blocking(move || tangle.compute_white_flag_mutations(index, timestamp, &parents)).await?
    }

    fn compute_white_flag_mutations(
        &self,
        index: MilestoneIndex,
        timestamp: u32,
        parents: &[BlockId],
    ) -> Result<WhiteFlagMutations, TangleError> {
        let storage = MemcachedTraverserStorage::new(&self.storage);
        let result = {
            let ledger = self.ledger.read();
            compute_white_flag_mutations(
                &storage,
                &ledger,
                self.validator.as_ref(),
                index,
                timestamp,
                parents,
                &AbortSignal::new(),
            )
        };
        storage.cleanup(true);
        Ok(result?)
    }

    /// A solid entry point counts as solid.
    pub fn is_block_solid(&self, block_id: &BlockId) -> Result<bool, StorageError> {
        if self.storage.solid_entry_points_contain(block_id) {
            return Ok(true);
        }
        Ok(self
            .storage
            .cached_block_metadata(block_id)?
            .map_or(false, |metadata| metadata.is_solid()))
    }
}
