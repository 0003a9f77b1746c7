// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU32, Ordering};

use crate::types::tangle::MilestoneIndex;

/// Tracks the confirmed and the latest known milestone index.
#[derive(Debug)]
pub struct SyncManager {
    confirmed: AtomicU32,
    latest: AtomicU32,
    threshold: u32,
}

impl SyncManager {
    pub fn new(confirmed: MilestoneIndex, threshold: u32) -> Self {
        Self {
            confirmed: AtomicU32::new(confirmed.0),
            latest: AtomicU32::new(confirmed.0),
            threshold,
        }
    }

    pub fn confirmed_milestone_index(&self) -> MilestoneIndex {
        MilestoneIndex(self.confirmed.load(Ordering::Acquire))
    }

    pub fn latest_milestone_index(&self) -> MilestoneIndex {
        MilestoneIndex(self.latest.load(Ordering::Acquire))
    }

    pub fn set_confirmed_milestone_index(&self, index: MilestoneIndex) {
        self.confirmed.store(index.0, Ordering::Release);
        self.latest.fetch_max(index.0, Ordering::AcqRel);
    }

    /// Raises the latest milestone index. Returns whether the index changed.
    pub fn set_latest_milestone_index(&self, index: MilestoneIndex) -> bool {
        self.latest.fetch_max(index.0, Ordering::AcqRel) < index.0
    }

    pub fn is_node_synced(&self) -> bool {
        self.is_synced_within(0)
    }

    /// Whether the node lags at most the configured sync threshold behind the latest milestone.
    pub fn is_node_almost_synced(&self) -> bool {
        self.is_synced_within(self.threshold)
    }

    pub fn is_node_synced_within_below_max_depth(&self, below_max_depth: u32) -> bool {
        self.is_synced_within(below_max_depth)
    }

    fn is_synced_within(&self, threshold: u32) -> bool {
        let latest = self.latest_milestone_index();
        if latest == 0 {
            return false;
        }
        self.confirmed_milestone_index() >= MilestoneIndex(latest.saturating_sub(threshold))
    }
}
