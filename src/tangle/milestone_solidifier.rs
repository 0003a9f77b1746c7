// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::{debug, error, info, instrument, trace, warn};

use super::{Tangle, TangleError, TangleEvent};
use crate::{
    dag::{update_cone_root_indexes, AbortSignal, MemcachedTraverserStorage, TraversalError},
    types::{
        block::BlockId,
        tangle::{Milestone, MilestoneIndex},
    },
    whiteflag::{confirm_milestone, ConfirmationError, CriticalError},
};

#[derive(Debug)]
pub(crate) enum SolidifierMessage {
    Solidify { index: MilestoneIndex, force: bool },
    Finished { pass: u64, result: Result<PassOutcome, TangleError> },
    Shutdown,
}

/// How a solidification pass ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum PassOutcome {
    /// The node is synced or no milestone after the confirmed one is known.
    Idle,
    Aborted,
    NotSolid(MilestoneIndex),
    /// Milestones between the confirmed one and the target were found in the target's cone.
    MissingMilestonesFound,
    MissingMilestonesNotFound(MilestoneIndex),
    Confirmed(MilestoneIndex),
}

struct RunningPass {
    id: u64,
    abort: AbortSignal,
    /// The milestone the pass works towards, `0` until it picked one.
    target: Arc<AtomicU32>,
    handle: JoinHandle<()>,
}

/// Whether a solidification request starts a new pass, given the target of the running pass (`0` if none).
fn should_start(index: MilestoneIndex, running_target: u32, confirmed: MilestoneIndex, requests_pending: bool) -> bool {
    (index == 0 && running_target == 0)
        || index == confirmed + 1
        || (index != 0 && running_target != 0 && index < running_target)
        || (index != 0 && running_target == 0 && !requests_pending)
}

/// Owns the solidification state. At most one pass runs at a time.
struct Coordinator {
    tangle: Arc<Tangle>,
    sender: UnboundedSender<SolidifierMessage>,
    running: Option<RunningPass>,
    next_pass: u64,
}

impl Coordinator {
    async fn run(mut self, mut receiver: UnboundedReceiver<SolidifierMessage>) -> Result<(), TangleError> {
        debug!("Milestone solidifier started.");
        let result = self.process(&mut receiver).await;
        self.stop_running().await;
        if let Err(e) = &result {
            error!("Milestone solidifier stopped: {e}");
        } else {
            debug!("Milestone solidifier stopped.");
        }
        result
    }

    async fn process(&mut self, receiver: &mut UnboundedReceiver<SolidifierMessage>) -> Result<(), TangleError> {
        while let Some(message) = receiver.recv().await {
            match message {
                SolidifierMessage::Solidify { index, force } => self.on_request(index, force).await,
                SolidifierMessage::Finished { pass, result } => {
                    if self.running.as_ref().map(|running| running.id) == Some(pass) {
                        self.running = None;
                        self.on_finished(result).await?;
                    } else {
                        // A pass that was replaced. Its outcome no longer matters unless the database broke.
                        self.check_critical(result)?;
                    }
                }
                SolidifierMessage::Shutdown => break,
            }
        }
        Ok(())
    }

    async fn on_request(&mut self, index: MilestoneIndex, force: bool) {
        let running_target = self
            .running
            .as_ref()
            .map_or(0, |running| running.target.load(Ordering::Acquire));
        let confirmed = self.tangle.sync.confirmed_milestone_index();
        if !force && !should_start(index, running_target, confirmed, !self.tangle.requester.is_empty()) {
            trace!("skipping solidification request for milestone {index}");
            return;
        }
        self.stop_running().await;
        self.start_pass();
    }

    async fn on_finished(&mut self, result: Result<PassOutcome, TangleError>) -> Result<(), TangleError> {
        match self.check_critical(result)? {
            Some(PassOutcome::Confirmed(_)) => self.on_request(MilestoneIndex(0), false).await,
            Some(PassOutcome::MissingMilestonesFound) => {
                let confirmed = self.tangle.sync.confirmed_milestone_index();
                self.on_request(confirmed, true).await
            }
            _ => (),
        }
        Ok(())
    }

    /// Fails on critical errors and marks the database as corrupted. Other errors are logged.
    fn check_critical(&self, result: Result<PassOutcome, TangleError>) -> Result<Option<PassOutcome>, TangleError> {
        match result {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) if e.is_critical() => {
                if let Err(e) = self.tangle.storage.mark_corrupted() {
                    error!("Failed to mark the database as corrupted: {e}");
                }
                Err(e)
            }
            Err(e) => {
                warn!("Milestone solidification failed: {e}");
                Ok(None)
            }
        }
    }

    fn start_pass(&mut self) {
        let id = self.next_pass;
        self.next_pass += 1;
        let abort = AbortSignal::new();
        let target = Arc::new(AtomicU32::new(0));
        let handle = tokio::task::spawn_blocking({
            let tangle = self.tangle.clone();
            let sender = self.sender.clone();
            let abort = abort.clone();
            let target = target.clone();
            move || {
                let result = tangle.solidify_milestone(&abort, &target);
                // The coordinator is gone when shutting down.
                sender.send(SolidifierMessage::Finished { pass: id, result }).ok();
            }
        });
        self.running = Some(RunningPass {
            id,
            abort,
            target,
            handle,
        });
    }

    /// Aborts the running pass and waits until it returned.
    async fn stop_running(&mut self) {
        if let Some(running) = self.running.take() {
            running.abort.abort();
            if let Err(e) = running.handle.await {
                error!("Milestone solidification pass panicked: {e}");
            }
        }
    }
}

/// Drives milestone solidification and confirmation in the background.
///
/// Requests are sent with [`Tangle::trigger_milestone_solidification`].
pub struct MilestoneSolidifier {
    sender: UnboundedSender<SolidifierMessage>,
    handle: JoinHandle<Result<(), TangleError>>,
}

impl MilestoneSolidifier {
    /// Spawns the solidifier of a tangle. A tangle has at most one.
    pub fn spawn(tangle: Arc<Tangle>) -> Result<Self, TangleError> {
        let receiver = tangle
            .solidifier_receiver
            .lock()
            .take()
            .ok_or(TangleError::SolidifierAlreadyRunning)?;
        let sender = tangle.solidifier_sender.clone();
        let coordinator = Coordinator {
            tangle,
            sender: sender.clone(),
            running: None,
            next_pass: 0,
        };
        let handle = tokio::spawn(coordinator.run(receiver));
        Ok(Self { sender, handle })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Aborts the running pass and stops the solidifier. Returns the error that stopped it earlier, if any.
    pub async fn shutdown(self) -> Result<(), TangleError> {
        self.sender.send(SolidifierMessage::Shutdown).ok();
        self.handle.await?
    }

    /// Waits until the solidifier stopped on its own, which only happens on critical errors.
    pub async fn join(self) -> Result<(), TangleError> {
        self.handle.await?
    }
}

impl Tangle {
    /// Asks the milestone solidifier to run. Index `0` just triggers a pass.
    pub fn trigger_milestone_solidification(&self, index: MilestoneIndex, force: bool) {
        if self
            .solidifier_sender
            .send(SolidifierMessage::Solidify { index, force })
            .is_err()
        {
            trace!("milestone solidifier is not running");
        }
    }

    #[instrument(skip_all, fields(milestone_index = tracing::field::Empty), level = "debug")]
    fn solidify_milestone(&self, abort: &AbortSignal, target: &AtomicU32) -> Result<PassOutcome, TangleError> {
        let confirmed = self.sync.confirmed_milestone_index();
        let latest = self.sync.latest_milestone_index();
        if confirmed == latest && latest != 0 {
            return Ok(PassOutcome::Idle);
        }
        let Some(milestone) = self.storage.find_closest_next_milestone(confirmed, latest)? else {
            debug!("No milestone found after {confirmed}.");
            return Ok(PassOutcome::Idle);
        };
        let milestone = milestone.consume(|milestone| *milestone);
        tracing::Span::current().record("milestone_index", milestone.index.0);
        target.store(milestone.index.0, Ordering::Release);

        info!("Run solidity check for milestone {}", milestone.index);
        let parents = self
            .storage
            .cached_block_metadata(&milestone.block_id)?
            .ok_or(CriticalError::BlockNotFound(milestone.block_id))?
            .consume(|metadata| metadata.parents().to_vec());

        let storage = MemcachedTraverserStorage::new(&self.storage);
        let result = self.check_milestone_cone(&storage, confirmed, &milestone, &parents, abort);
        storage.cleanup(true);
        if let Some(outcome) = result? {
            return Ok(outcome);
        }

        self.confirm(&milestone, abort)
    }

    /// Returns the outcome of the pass, or `None` if the milestone is ready to be confirmed.
    fn check_milestone_cone(
        &self,
        storage: &MemcachedTraverserStorage<'_>,
        confirmed: MilestoneIndex,
        milestone: &Milestone,
        parents: &[BlockId],
        abort: &AbortSignal,
    ) -> Result<Option<PassOutcome>, TangleError> {
        let index = milestone.index;
        let check = self.solid_queue_check_with(storage, index, parents, false, abort)?;
        if check.aborted {
            info!("Aborted solid queue check for milestone {index}");
            return Ok(Some(PassOutcome::Aborted));
        }
        if !check.solid {
            self.events.emit(TangleEvent::MilestoneSolidificationFailed(index));
            info!(
                "Milestone could not be solidified, {} blocks requested: {index}",
                check.missing.len()
            );
            return Ok(Some(PassOutcome::NotSolid(index)));
        }

        if confirmed + 1 != index {
            info!("Milestones missing between ({confirmed}) and ({index}). Search for missing milestones...");
            return match self.search_missing_milestones(storage, confirmed, index, parents, abort) {
                Ok(true) => Ok(Some(PassOutcome::MissingMilestonesFound)),
                Ok(false) => {
                    warn!("No milestones found between ({confirmed}) and ({index}).");
                    Ok(Some(PassOutcome::MissingMilestonesNotFound(index)))
                }
                Err(TangleError::Traversal(TraversalError::Aborted)) => Ok(Some(PassOutcome::Aborted)),
                Err(e) => Err(e),
            };
        }
        Ok(None)
    }

    fn confirm(&self, milestone: &Milestone, abort: &AbortSignal) -> Result<PassOutcome, TangleError> {
        let index = milestone.index;
        let confirmation = confirm_milestone(
            &self.storage,
            &self.ledger,
            self.validator.as_ref(),
            milestone,
            abort,
            |metadata| {
                self.events.emit(TangleEvent::BlockReferenced {
                    block_id: metadata.block_id(),
                    index,
                })
            },
        );
        let (stats, mutations) = match confirmation {
            Ok(confirmed) => confirmed,
            Err(ConfirmationError::Aborted) => return Ok(PassOutcome::Aborted),
            Err(e) => return Err(e.into()),
        };

        self.sync.set_confirmed_milestone_index(index);
        self.events.emit(TangleEvent::ConfirmedMilestoneIndexChanged(index));
        for output in &mutations.new_outputs {
            self.events.emit(TangleEvent::NewOutput(output.output_id));
        }
        for spent in &mutations.new_spents {
            self.events.emit(TangleEvent::NewSpent(spent.output.output_id));
        }
        self.storage.delete_unreferenced_blocks(index)?;
        update_cone_root_indexes(&*self.storage, &mutations.referenced_blocks, index, &AbortSignal::new())?;

        info!(
            "Milestone confirmed ({index}): referenced: {}, with transactions: {}, without transactions: {}, \
             conflicting: {}, total: {}",
            stats.referenced,
            stats.included_with_transactions,
            stats.excluded_without_transactions,
            stats.excluded_conflicting,
            humantime::format_duration(Duration::from_millis(stats.duration.as_millis() as u64)),
        );
        self.events.emit(TangleEvent::MilestoneConfirmed(stats));
        Ok(PassOutcome::Confirmed(index))
    }
}
