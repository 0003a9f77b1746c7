// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    thread,
};

use dashmap::DashSet;
use parking_lot::{Condvar, Mutex};
use tracing::trace;

use super::{AbortSignal, TraversalError, TraverserStorage};
use crate::{storage::CachedMetadata, types::block::BlockId};

/// The callbacks of a concurrent past cone traversal. Callbacks run on several threads at once.
pub trait ConcurrentParentsVisitor: Sync {
    type Error: From<TraversalError> + Send;

    fn condition(&self, metadata: &CachedMetadata) -> Result<bool, Self::Error>;

    fn consume(&self, _metadata: &CachedMetadata) -> Result<(), Self::Error> {
        Ok(())
    }

    fn on_missing_parent(&self, block_id: &BlockId) -> Result<(), Self::Error> {
        Err(TraversalError::BlockNotFound(*block_id).into())
    }

    fn on_solid_entry_point(&self, _block_id: &BlockId) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Walks past cones with a pool of worker threads.
///
/// Every block is consumed at most once, but there is no ordering between blocks: a block may be consumed before
/// its parents.
pub struct ConcurrentParentsTraverser<'a, S> {
    storage: &'a S,
    parallelism: usize,
    running: Mutex<()>,
}

struct WorkQueue<E> {
    queue: Mutex<VecDeque<BlockId>>,
    available: Condvar,
    /// Blocks queued or in progress.
    pending: AtomicUsize,
    done: AtomicBool,
    error: Mutex<Option<E>>,
    processed: DashSet<BlockId>,
}

impl<E> WorkQueue<E> {
    fn new(start_block_ids: &[BlockId]) -> Self {
        Self {
            queue: Mutex::new(start_block_ids.iter().copied().collect()),
            available: Condvar::new(),
            pending: AtomicUsize::new(start_block_ids.len()),
            done: AtomicBool::new(false),
            error: Mutex::new(None),
            processed: DashSet::new(),
        }
    }

    /// Blocks until there is work or the traversal is done.
    fn next(&self) -> Option<BlockId> {
        let mut queue = self.queue.lock();
        loop {
            if self.done.load(Ordering::Acquire) {
                return None;
            }
            if let Some(block_id) = queue.pop_front() {
                return Some(block_id);
            }
            self.available.wait(&mut queue);
        }
    }

    fn extend(&self, block_ids: Vec<BlockId>) {
        if block_ids.is_empty() {
            return;
        }
        self.pending.fetch_add(block_ids.len(), Ordering::AcqRel);
        self.queue.lock().extend(block_ids);
        self.available.notify_all();
    }

    fn complete_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.finish();
        }
    }

    /// Records the first error. Later errors are discarded.
    fn fail(&self, error: E) {
        self.error.lock().get_or_insert(error);
        self.finish();
    }

    fn finish(&self) {
        {
            let _queue = self.queue.lock();
            self.done.store(true, Ordering::Release);
        }
        self.available.notify_all();
    }
}

/// Ends the traversal if a worker unwinds, so the remaining workers do not wait for its work forever.
struct FinishOnPanic<'w, E>(&'w WorkQueue<E>);

impl<'w, E> Drop for FinishOnPanic<'w, E> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.finish();
        }
    }
}

impl<'a, S: TraverserStorage> ConcurrentParentsTraverser<'a, S> {
    pub fn new(storage: &'a S, parallelism: usize) -> Self {
        Self {
            storage,
            parallelism: parallelism.max(1),
            running: Mutex::new(()),
        }
    }

    /// Traverses the past cones of the given blocks, including the blocks themselves.
    pub fn traverse<V: ConcurrentParentsVisitor>(
        &self,
        start_block_ids: &[BlockId],
        traverse_solid_entry_points: bool,
        visitor: &V,
        abort: &AbortSignal,
    ) -> Result<(), V::Error> {
        let _running = self.running.lock();
        if start_block_ids.is_empty() {
            return Ok(());
        }
        let work = WorkQueue::<V::Error>::new(start_block_ids);

        thread::scope(|scope| {
            for worker in 0..self.parallelism {
                let work = &work;
                scope.spawn(move || {
                    let _guard = FinishOnPanic(work);
                    while let Some(block_id) = work.next() {
                        let result = abort.check().map_err(V::Error::from).and_then(|_| {
                            self.process(&work.processed, &block_id, traverse_solid_entry_points, visitor)
                        });
                        match result {
                            Ok(parents) => {
                                work.extend(parents);
                                work.complete_one();
                            }
                            Err(e) => work.fail(e),
                        }
                    }
                    trace!("traversal worker {worker} stopped");
                });
            }
        });

        match work.error.into_inner() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Processes a single block and returns the parents that still need to be walked.
    fn process<V: ConcurrentParentsVisitor>(
        &self,
        processed: &DashSet<BlockId>,
        block_id: &BlockId,
        traverse_solid_entry_points: bool,
        visitor: &V,
    ) -> Result<Vec<BlockId>, V::Error> {
        if !processed.insert(*block_id) {
            return Ok(Vec::new());
        }

        if self.storage.solid_entry_points_contain(block_id) {
            visitor.on_solid_entry_point(block_id)?;
            if !traverse_solid_entry_points {
                return Ok(Vec::new());
            }
        }

        let Some(metadata) = self
            .storage
            .cached_block_metadata(block_id)
            .map_err(TraversalError::from)?
        else {
            visitor.on_missing_parent(block_id)?;
            return Ok(Vec::new());
        };

        if !visitor.condition(&metadata)? {
            return Ok(Vec::new());
        }
        visitor.consume(&metadata)?;

        Ok(metadata
            .parents()
            .iter()
            .filter(|parent| !processed.contains(*parent))
            .copied()
            .collect())
    }
}
