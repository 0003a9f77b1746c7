// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Module that contains the traversals over the block DAG.
//!
//! Past cone traversals walk parent edges, future cone traversals walk child edges. All of them read block
//! metadata only, through a [`TraverserStorage`].

mod children;
mod concurrent;
mod cone_root_indexes;
mod parents;
mod solid_entry_points;
mod state;
mod storage;

use futures::future::AbortHandle;
use thiserror::Error;

pub use self::{
    children::{ChildrenTraverser, ChildrenVisitor},
    concurrent::{ConcurrentParentsTraverser, ConcurrentParentsVisitor},
    cone_root_indexes::{cone_root_indexes, update_cone_root_indexes, update_outdated_cone_root_indexes},
    parents::{ParentsTraverser, ParentsVisitor},
    solid_entry_points::{compute_solid_entry_points, for_each_solid_entry_point, SolidEntryPointError},
    storage::MemcachedTraverserStorage,
};
use crate::{
    db::StorageError,
    storage::CachedMetadata,
    types::{block::BlockId, tangle::MilestoneIndex},
};

/// The view of the storage that traversals need.
pub trait TraverserStorage: Send + Sync {
    fn cached_block_metadata(&self, block_id: &BlockId) -> Result<Option<CachedMetadata>, StorageError>;

    fn solid_entry_points_contain(&self, block_id: &BlockId) -> bool;

    fn solid_entry_point_index(&self, block_id: &BlockId) -> Option<MilestoneIndex>;

    fn child_block_ids(&self, block_id: &BlockId) -> Result<Vec<BlockId>, StorageError>;
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum TraversalError {
    #[error("traversal was aborted")]
    Aborted,
    #[error("block not found: {0}")]
    BlockNotFound(BlockId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A cancellation signal shared between a traversal and whoever may want to stop it.
///
/// Traversals poll the signal once per step and fail with [`TraversalError::Aborted`] once it tripped.
#[derive(Clone, Debug)]
pub struct AbortSignal {
    handle: AbortHandle,
}

impl AbortSignal {
    pub fn new() -> Self {
        let (handle, _) = AbortHandle::new_pair();
        Self { handle }
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.handle.is_aborted()
    }

    pub(crate) fn check(&self) -> Result<(), TraversalError> {
        if self.is_aborted() {
            Err(TraversalError::Aborted)
        } else {
            Ok(())
        }
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn abort_is_shared_between_clones() {
        let signal = AbortSignal::new();
        let other = signal.clone();
        assert!(signal.check().is_ok());
        other.abort();
        assert!(signal.is_aborted());
        assert!(matches!(signal.check(), Err(TraversalError::Aborted)));
    }
}
