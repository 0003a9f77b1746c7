// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;

use tracing::trace;

use super::{
    AbortSignal, ChildrenTraverser, ChildrenVisitor, ParentsTraverser, ParentsVisitor, TraversalError, TraverserStorage,
};
use crate::{
    storage::CachedMetadata,
    types::{block::BlockId, tangle::MilestoneIndex},
};

struct ConeRootIndexVisitor<'a, S> {
    storage: &'a S,
    cmi: MilestoneIndex,
    youngest: MilestoneIndex,
    oldest: MilestoneIndex,
    outdated: Vec<BlockId>,
}

impl<'a, S: TraverserStorage> ConeRootIndexVisitor<'a, S> {
    fn new(storage: &'a S, cmi: MilestoneIndex) -> Self {
        Self {
            storage,
            cmi,
            youngest: MilestoneIndex(0),
            oldest: MilestoneIndex::MAX,
            outdated: Vec::new(),
        }
    }

    fn fold(&mut self, youngest: MilestoneIndex, oldest: MilestoneIndex) {
        self.youngest = self.youngest.max(youngest);
        self.oldest = self.oldest.min(oldest);
    }
}

impl<'a, S: TraverserStorage> ParentsVisitor for ConeRootIndexVisitor<'a, S> {
    type Error = TraversalError;

    fn condition(&mut self, metadata: &CachedMetadata) -> Result<bool, Self::Error> {
        if let Some(at) = metadata.referenced_index() {
            self.fold(at, at);
            return Ok(false);
        }
        let cached = metadata.cone_root_indexes();
        if cached.calculation_index == self.cmi {
            self.fold(cached.youngest, cached.oldest);
            return Ok(false);
        }
        Ok(true)
    }

    fn consume(&mut self, metadata: &CachedMetadata) -> Result<(), Self::Error> {
        // Parents are consumed before their children, so this list is ordered oldest first.
        self.outdated.push(metadata.block_id());
        Ok(())
    }

    fn on_solid_entry_point(&mut self, block_id: &BlockId) -> Result<(), Self::Error> {
        if let Some(index) = self.storage.solid_entry_point_index(block_id) {
            self.fold(index, index);
        }
        Ok(())
    }
}

/// Returns the youngest and oldest cone root index of a block at the confirmed milestone index `cmi`.
///
/// Results are memoized in the metadata per `cmi`. If a block in the past cone is missing, the walk stops there,
/// `(0, 0)` is returned and only the blocks consumed before the gap are memoized.
pub fn cone_root_indexes<S: TraverserStorage>(
    storage: &S,
    metadata: &CachedMetadata,
    cmi: MilestoneIndex,
    abort: &AbortSignal,
) -> Result<(MilestoneIndex, MilestoneIndex), TraversalError> {
    if let Some(at) = metadata.referenced_index() {
        return Ok((at, at));
    }
    let cached = metadata.cone_root_indexes();
    if cached.calculation_index == cmi {
        return Ok((cached.youngest, cached.oldest));
    }

    let mut visitor = ConeRootIndexVisitor::new(storage, cmi);
    let valid = match ParentsTraverser::new(storage).traverse(metadata.parents(), false, &mut visitor, abort) {
        Ok(()) => true,
        Err(TraversalError::BlockNotFound(missing)) => {
            trace!("past cone of {} misses {missing}", metadata.block_id());
            false
        }
        Err(e) => return Err(e),
    };

    // Oldest first, so every block finds the indexes of its parents already memoized. Blocks consumed before a gap
    // have complete past cones.
    update_outdated_cone_root_indexes(storage, &visitor.outdated, cmi, abort)?;

    if !valid || visitor.oldest == MilestoneIndex::MAX {
        trace!("cone root indexes of {} are invalid", metadata.block_id());
        return Ok((MilestoneIndex(0), MilestoneIndex(0)));
    }
    metadata.set_cone_root_indexes(visitor.youngest, visitor.oldest, cmi);
    Ok((visitor.youngest, visitor.oldest))
}

/// Recomputes the cone root indexes of the given blocks, in the given order.
pub fn update_outdated_cone_root_indexes<S: TraverserStorage>(
    storage: &S,
    block_ids: &[BlockId],
    cmi: MilestoneIndex,
    abort: &AbortSignal,
) -> Result<(), TraversalError> {
    for block_id in block_ids {
        abort.check()?;
        if let Some(metadata) = storage.cached_block_metadata(block_id)? {
            cone_root_indexes(storage, &metadata, cmi, abort)?;
        }
    }
    Ok(())
}

struct FutureConeUpdater<'a, S> {
    storage: &'a S,
    cmi: MilestoneIndex,
    traversed: &'a mut HashSet<BlockId>,
    abort: &'a AbortSignal,
}

impl<'a, S: TraverserStorage> ChildrenVisitor for FutureConeUpdater<'a, S> {
    type Error = TraversalError;

    fn condition(&mut self, metadata: &CachedMetadata) -> Result<bool, Self::Error> {
        Ok(!self.traversed.contains(&metadata.block_id()) && metadata.is_solid())
    }

    fn consume(&mut self, metadata: &CachedMetadata) -> Result<(), Self::Error> {
        self.traversed.insert(metadata.block_id());
        update_outdated_cone_root_indexes(self.storage, &[metadata.block_id()], self.cmi, self.abort)
    }
}

/// Recomputes the cone root indexes in the future cones of the given blocks. Called after a milestone referenced
/// them.
pub fn update_cone_root_indexes<S: TraverserStorage>(
    storage: &S,
    block_ids: &[BlockId],
    cmi: MilestoneIndex,
    abort: &AbortSignal,
) -> Result<(), TraversalError> {
    let mut traversed = HashSet::new();
    let traverser = ChildrenTraverser::new(storage);
    for block_id in block_ids {
        let mut updater = FutureConeUpdater {
            storage,
            cmi,
            traversed: &mut traversed,
            abort,
        };
        traverser.traverse(block_id, false, &mut updater, abort)?;
    }
    Ok(())
}
