// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::trace;

use crate::types::{block::BlockId, tangle::MilestoneIndex};

/// Fetches missing blocks from the network.
///
/// The engine only records what it needs, delivery happens through [`Tangle::add_block`](super::Tangle::add_block).
pub trait Requester: Send + Sync {
    /// Requests a block needed to solidify milestone `index`. Returns whether the request is new.
    fn request(&self, block_id: BlockId, index: MilestoneIndex, prevent_discard: bool) -> bool;

    /// Called for every block that arrives. Returns the milestone index of a matching request.
    fn received(&self, block_id: &BlockId) -> Option<MilestoneIndex>;

    fn is_empty(&self) -> bool;

    /// Requests several blocks and returns the number of new requests.
    fn request_multiple(&self, block_ids: &[BlockId], index: MilestoneIndex, prevent_discard: bool) -> usize {
        block_ids
            .iter()
            .filter(|block_id| self.request(**block_id, index, prevent_discard))
            .count()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Request {
    index: MilestoneIndex,
    prevent_discard: bool,
}

/// A [`Requester`] that keeps outstanding requests in memory until the blocks arrive.
#[derive(Debug, Default)]
pub struct RequestQueue {
    pending: Mutex<HashMap<BlockId, Request>>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn contains(&self, block_id: &BlockId) -> bool {
        self.pending.lock().contains_key(block_id)
    }

    /// The outstanding requests, lowest milestone index first.
    pub fn pending(&self) -> Vec<(BlockId, MilestoneIndex)> {
        let mut pending = self
            .pending
            .lock()
            .iter()
            .map(|(block_id, request)| (*block_id, request.index))
            .collect::<Vec<_>>();
        pending.sort_by_key(|(block_id, index)| (*index, *block_id));
        pending
    }

    /// Drops requests for milestones at or below `index`, unless they must not be discarded.
    pub fn discard_older_than(&self, index: MilestoneIndex) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, request| request.prevent_discard || request.index > index);
        before - pending.len()
    }
}

impl Requester for RequestQueue {
    fn request(&self, block_id: BlockId, index: MilestoneIndex, prevent_discard: bool) -> bool {
        let mut pending = self.pending.lock();
        match pending.get_mut(&block_id) {
            Some(request) => {
                // Keep the oldest milestone that needs the block.
                if index < request.index {
                    request.index = index;
                }
                request.prevent_discard |= prevent_discard;
                false
            }
            None => {
                trace!("requesting block {block_id} for milestone {index}");
                pending.insert(block_id, Request { index, prevent_discard });
                true
            }
        }
    }

    fn received(&self, block_id: &BlockId) -> Option<MilestoneIndex> {
        self.pending.lock().remove(block_id).map(|request| request.index)
    }

    fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
