// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Module that ties storage, traversals and the ledger together into a tangle that solidifies and confirms
//! milestones as blocks arrive.

mod config;
mod error;
mod events;
mod milestone_solidifier;
mod requester;
mod solidifier;
mod sync;
mod tip_score;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

use self::milestone_solidifier::SolidifierMessage;
pub use self::{
    config::*,
    error::TangleError,
    events::{Events, TangleEvent},
    milestone_solidifier::MilestoneSolidifier,
    requester::{RequestQueue, Requester},
    solidifier::{is_solid, SolidQueueCheck},
    sync::SyncManager,
    tip_score::{TipScore, TipScoreCalculator},
};
use crate::{
    dag::{compute_solid_entry_points, AbortSignal},
    db::StorageError,
    ledger::Ledger,
    storage::{CachedMetadata, SolidEntryPoints, Storage},
    types::{
        block::Block,
        tangle::{Milestone, MilestoneIndex},
    },
    whiteflag::{ConfirmationError, DefaultTransactionValidator, TransactionValidator},
};

/// The tangle of a node.
pub struct Tangle {
    storage: Arc<Storage>,
    ledger: Ledger,
    sync: SyncManager,
    events: Events,
    requester: Arc<dyn Requester>,
    validator: Arc<dyn TransactionValidator>,
    config: TangleConfig,
    solidifier_sender: UnboundedSender<SolidifierMessage>,
    solidifier_receiver: Mutex<Option<UnboundedReceiver<SolidifierMessage>>>,
}

impl Tangle {
    /// Opens the tangle on top of the given storage. The confirmed milestone index starts at the ledger index.
    pub fn new(
        storage: Arc<Storage>,
        requester: Arc<dyn Requester>,
        config: TangleConfig,
    ) -> Result<Self, TangleError> {
        let ledger = Ledger::new(storage.store().clone())?;
        let sync = SyncManager::new(ledger.ledger_index(), config.sync_threshold);
        let (solidifier_sender, solidifier_receiver) = mpsc::unbounded_channel();
        debug!("Tangle opened at ledger index {}.", ledger.ledger_index());
        Ok(Self {
            storage,
            ledger,
            sync,
            events: Events::new(),
            requester,
            validator: Arc::new(DefaultTransactionValidator),
            config,
            solidifier_sender,
            solidifier_receiver: Mutex::new(Some(solidifier_receiver)),
        })
    }

    /// Replaces the rules transactions are checked against during confirmation.
    pub fn with_validator(mut self, validator: Arc<dyn TransactionValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn sync(&self) -> &SyncManager {
        &self.sync
    }

    pub fn events(&self) -> &Events {
        &self.events
    }

    pub fn config(&self) -> &TangleConfig {
        &self.config
    }

    pub fn tip_score_calculator(&self) -> Result<TipScoreCalculator<'_>, StorageError> {
        TipScoreCalculator::new(&self.storage, &self.config)
    }

    /// Adds a block received from the network. Returns whether the block was new.
    pub fn add_block(&self, block: Block) -> Result<bool, TangleError> {
        let block_id = block.id();
        let milestone = block
            .milestone()
            .map(|payload| Milestone::new(payload.index, block_id, payload.timestamp));
        let (metadata, created) = self.storage.store_block_if_absent(block)?;
        if !created {
            trace!("block {block_id} is already known");
            return Ok(false);
        }

        let requested_for = self.requester.received(&block_id);
        let latest = self.sync.latest_milestone_index();
        self.storage.store_unreferenced_block(latest + 1, &block_id)?;

        if let Some(milestone) = milestone {
            self.register_milestone(&metadata, milestone)?;
        }

        if self.sync.is_node_almost_synced() && is_solid(&*self.storage, &metadata)? {
            drop(metadata);
            self.solidify_future_cone(&[block_id], &AbortSignal::new())?;
        }

        if let Some(index) = requested_for {
            self.trigger_milestone_solidification(index, false);
        }
        Ok(true)
    }

    /// Stores a milestone and raises the latest milestone index.
    fn register_milestone(&self, metadata: &CachedMetadata, milestone: Milestone) -> Result<(), TangleError> {
        if !self.store_milestone(metadata, milestone)? {
            return Ok(());
        }
        debug!("Received milestone {}.", milestone.index);
        if self.sync.set_latest_milestone_index(milestone.index) {
            self.events
                .emit(TangleEvent::LatestMilestoneIndexChanged(milestone.index));
        }
        self.trigger_milestone_solidification(milestone.index, false);
        Ok(())
    }

    /// Stores a milestone unless one with the same index is known. Returns whether it was new.
    pub(crate) fn store_milestone(
        &self,
        metadata: &CachedMetadata,
        milestone: Milestone,
    ) -> Result<bool, StorageError> {
        metadata.set_milestone(true);
        let (_, created) = self.storage.store_milestone_if_absent(milestone)?;
        Ok(created)
    }

    /// Computes the solid entry points the tangle would have if it were pruned at `target_index`.
    pub fn compute_solid_entry_points(
        &self,
        target_index: MilestoneIndex,
        abort: &AbortSignal,
    ) -> Result<SolidEntryPoints, TangleError> {
        compute_solid_entry_points(
            &self.storage,
            target_index,
            self.config.solid_entry_point_check_threshold_past,
            self.config.solid_entry_point_parallelism,
            abort,
        )
        .map_err(|e| ConfirmationError::from(e).into())
    }
}
