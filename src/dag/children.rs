// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use parking_lot::Mutex;

use super::{
    state::{TraversalOrder, TraversalState},
    AbortSignal, TraversalError, TraverserStorage,
};
use crate::{storage::CachedMetadata, types::block::BlockId};

/// The callbacks of a future cone traversal.
pub trait ChildrenVisitor {
    type Error: From<TraversalError>;

    /// Whether the traversal continues into the future of this block.
    fn condition(&mut self, metadata: &CachedMetadata) -> Result<bool, Self::Error>;

    fn consume(&mut self, metadata: &CachedMetadata) -> Result<(), Self::Error>;
}

/// Walks the future cone of a block breadth first. Children are not ordered.
pub struct ChildrenTraverser<'a, S> {
    storage: &'a S,
    state: Mutex<TraversalState>,
}

impl<'a, S: TraverserStorage> ChildrenTraverser<'a, S> {
    pub fn new(storage: &'a S) -> Self {
        Self {
            storage,
            state: Mutex::new(TraversalState::new(TraversalOrder::BreadthFirst)),
        }
    }

    /// Traverses the future cone of the given block, including the block itself.
    ///
    /// Unless `walk_already_discovered` is set, every block is visited at most once.
    pub fn traverse<V: ChildrenVisitor>(
        &self,
        start_block_id: &BlockId,
        walk_already_discovered: bool,
        visitor: &mut V,
        abort: &AbortSignal,
    ) -> Result<(), V::Error> {
        let mut state = self.state.lock();
        state.reset();
        state.push(*start_block_id);
        if !walk_already_discovered {
            state.mark_processed(*start_block_id);
        }
        let result = self.process_queue(&mut state, walk_already_discovered, visitor, abort);
        state.clear();
        result
    }

    /// Traverses the future cone of the given block without the block itself.
    pub fn traverse_children_of_block<V: ChildrenVisitor>(
        &self,
        block_id: &BlockId,
        walk_already_discovered: bool,
        visitor: &mut V,
        abort: &AbortSignal,
    ) -> Result<(), V::Error> {
        let mut state = self.state.lock();
        state.reset();
        let result = self
            .walk_children(&mut state, block_id, walk_already_discovered)
            .map_err(V::Error::from)
            .and_then(|_| self.process_queue(&mut state, walk_already_discovered, visitor, abort));
        state.clear();
        result
    }

    fn process_queue<V: ChildrenVisitor>(
        &self,
        state: &mut TraversalState,
        walk_already_discovered: bool,
        visitor: &mut V,
        abort: &AbortSignal,
    ) -> Result<(), V::Error> {
        while let Some(current) = state.pop() {
            abort.check()?;

            let Some(metadata) = self.storage.cached_block_metadata(&current).map_err(TraversalError::from)? else {
                // Solid entry points may be pruned, their children are still part of the future cone.
                if self.storage.solid_entry_points_contain(&current) {
                    self.walk_children(state, &current, walk_already_discovered)?;
                    continue;
                }
                return Err(TraversalError::BlockNotFound(current).into());
            };

            if !visitor.condition(&metadata)? {
                continue;
            }
            visitor.consume(&metadata)?;
            drop(metadata);

            self.walk_children(state, &current, walk_already_discovered)?;
        }
        Ok(())
    }

    fn walk_children(
        &self,
        state: &mut TraversalState,
        block_id: &BlockId,
        walk_already_discovered: bool,
    ) -> Result<(), TraversalError> {
        for child in self.storage.child_block_ids(block_id)? {
            if !walk_already_discovered && !state.mark_processed(child) {
                continue;
            }
            state.push(child);
        }
        Ok(())
    }
}
