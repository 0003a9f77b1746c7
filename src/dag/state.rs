// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashMap, HashSet, VecDeque};

use super::{TraversalError, TraverserStorage};
use crate::{storage::CachedMetadata, types::block::BlockId};

/// The order in which a [`TraversalState`] hands out queued blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TraversalOrder {
    /// Last in, first out. Used for past cones.
    DepthFirst,
    /// First in, first out. Used for future cones.
    BreadthFirst,
}

/// The bookkeeping of a single sequential traversal.
///
/// The state is reset at the start and cleared at the end of every traversal, so it never holds on to cache handles
/// between calls.
#[derive(Debug)]
pub(crate) struct TraversalState {
    order: TraversalOrder,
    queue: VecDeque<BlockId>,
    processed: HashSet<BlockId>,
    checked: HashMap<BlockId, bool>,
    metadata: HashMap<BlockId, CachedMetadata>,
}

impl TraversalState {
    pub(crate) fn new(order: TraversalOrder) -> Self {
        Self {
            order,
            queue: Default::default(),
            processed: Default::default(),
            checked: Default::default(),
            metadata: Default::default(),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.queue.clear();
        self.processed.clear();
        self.checked.clear();
        self.metadata.clear();
    }

    pub(crate) fn push(&mut self, block_id: BlockId) {
        match self.order {
            TraversalOrder::DepthFirst => self.queue.push_front(block_id),
            TraversalOrder::BreadthFirst => self.queue.push_back(block_id),
        }
    }

    /// The block to work on next, without removing it.
    pub(crate) fn current(&self) -> Option<BlockId> {
        self.queue.front().copied()
    }

    pub(crate) fn pop(&mut self) -> Option<BlockId> {
        self.queue.pop_front()
    }

    /// Marks the block as processed. Returns `false` if it already was.
    pub(crate) fn mark_processed(&mut self, block_id: BlockId) -> bool {
        self.processed.insert(block_id)
    }

    pub(crate) fn is_processed(&self, block_id: &BlockId) -> bool {
        self.processed.contains(block_id)
    }

    pub(crate) fn checked(&self, block_id: &BlockId) -> Option<bool> {
        self.checked.get(block_id).copied()
    }

    pub(crate) fn set_checked(&mut self, block_id: BlockId, passed: bool) {
        self.checked.insert(block_id, passed);
    }

    pub(crate) fn forget_checked(&mut self, block_id: &BlockId) {
        self.checked.remove(block_id);
    }

    /// Loads the metadata of a block, at most once per traversal.
    pub(crate) fn metadata<S: TraverserStorage>(
        &mut self,
        storage: &S,
        block_id: &BlockId,
    ) -> Result<Option<CachedMetadata>, TraversalError> {
        if let Some(metadata) = self.metadata.get(block_id) {
            return Ok(Some(metadata.retain()));
        }
        Ok(match storage.cached_block_metadata(block_id)? {
            Some(metadata) => {
                let handle = metadata.retain();
                self.metadata.insert(*block_id, metadata);
                Some(handle)
            }
            None => None,
        })
    }

    /// Drops all bookkeeping and releases the memoized metadata.
    pub(crate) fn clear(&mut self) {
        self.reset();
        self.queue.shrink_to_fit();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn order_decides_the_next_block() {
        let mut dfs = TraversalState::new(TraversalOrder::DepthFirst);
        let mut bfs = TraversalState::new(TraversalOrder::BreadthFirst);
        for id in [BlockId([1; 32]), BlockId([2; 32])] {
            dfs.push(id);
            bfs.push(id);
        }
        assert_eq!(dfs.current(), Some(BlockId([2; 32])));
        assert_eq!(bfs.current(), Some(BlockId([1; 32])));

        assert!(dfs.mark_processed(BlockId([1; 32])));
        assert!(!dfs.mark_processed(BlockId([1; 32])));
        dfs.clear();
        assert!(!dfs.is_processed(&BlockId([1; 32])));
        assert_eq!(dfs.pop(), None);
    }
}
