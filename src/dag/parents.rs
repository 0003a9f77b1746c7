// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use parking_lot::Mutex;

use super::{
    state::{TraversalOrder, TraversalState},
    AbortSignal, TraversalError, TraverserStorage,
};
use crate::{storage::CachedMetadata, types::block::BlockId};

/// The callbacks of a past cone traversal.
pub trait ParentsVisitor {
    type Error: From<TraversalError>;

    /// Whether the traversal continues into the past of this block. Evaluated once per block and traversal.
    fn condition(&mut self, metadata: &CachedMetadata) -> Result<bool, Self::Error>;

    /// Called for every block that passed the condition, after all of its parents were processed.
    fn consume(&mut self, _metadata: &CachedMetadata) -> Result<(), Self::Error> {
        Ok(())
    }

    fn on_missing_parent(&mut self, block_id: &BlockId) -> Result<(), Self::Error> {
        Err(TraversalError::BlockNotFound(*block_id).into())
    }

    fn on_solid_entry_point(&mut self, _block_id: &BlockId) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Walks the past cone of blocks depth first.
///
/// A block is consumed only after all of its parents were processed, so consumers see the cone oldest dependency
/// first. Start blocks are walked one after another. Concurrent calls on the same instance are serialized.
pub struct ParentsTraverser<'a, S> {
    storage: &'a S,
    state: Mutex<TraversalState>,
}

impl<'a, S: TraverserStorage> ParentsTraverser<'a, S> {
    pub fn new(storage: &'a S) -> Self {
        Self {
            storage,
            state: Mutex::new(TraversalState::new(TraversalOrder::DepthFirst)),
        }
    }

    /// Traverses the past cones of the given blocks, including the blocks themselves.
    pub fn traverse<V: ParentsVisitor>(
        &self,
        start_block_ids: &[BlockId],
        traverse_solid_entry_points: bool,
        visitor: &mut V,
        abort: &AbortSignal,
    ) -> Result<(), V::Error> {
        let mut state = self.state.lock();
        state.reset();
        let result = start_block_ids.iter().try_for_each(|block_id| {
            state.push(*block_id);
            self.process_stack(&mut state, traverse_solid_entry_points, visitor, abort)
        });
        state.clear();
        result
    }

    /// Traverses the past cone of a block without the block itself.
    pub fn traverse_parents_of_block<V: ParentsVisitor>(
        &self,
        block_id: &BlockId,
        traverse_solid_entry_points: bool,
        visitor: &mut V,
        abort: &AbortSignal,
    ) -> Result<(), V::Error> {
        let parents = self
            .storage
            .cached_block_metadata(block_id)
            .map_err(TraversalError::from)?
            .ok_or(TraversalError::BlockNotFound(*block_id))?
            .consume(|metadata| metadata.parents().to_vec());
        self.traverse(&parents, traverse_solid_entry_points, visitor, abort)
    }

    fn process_stack<V: ParentsVisitor>(
        &self,
        state: &mut TraversalState,
        traverse_solid_entry_points: bool,
        visitor: &mut V,
        abort: &AbortSignal,
    ) -> Result<(), V::Error> {
        while let Some(current) = state.current() {
            abort.check()?;

            if state.is_processed(&current) {
                state.pop();
                continue;
            }

            if self.storage.solid_entry_points_contain(&current) {
                if state.checked(&current).is_none() {
                    visitor.on_solid_entry_point(&current)?;
                }
                if !traverse_solid_entry_points {
                    state.mark_processed(current);
                    state.forget_checked(&current);
                    state.pop();
                    continue;
                }
            }

            let Some(metadata) = state.metadata(self.storage, &current)? else {
                state.mark_processed(current);
                state.pop();
                visitor.on_missing_parent(&current)?;
                continue;
            };

            let passed = match state.checked(&current) {
                Some(passed) => passed,
                None => {
                    let passed = visitor.condition(&metadata)?;
                    state.set_checked(current, passed);
                    passed
                }
            };
            if !passed {
                state.mark_processed(current);
                state.forget_checked(&current);
                state.pop();
                continue;
            }

            if let Some(parent) = metadata.parents().iter().find(|parent| !state.is_processed(parent)) {
                // Revisit the current block once the parent is done.
                state.push(*parent);
                continue;
            }

            state.mark_processed(current);
            state.forget_checked(&current);
            state.pop();
            visitor.consume(&metadata)?;
        }
        Ok(())
    }
}
