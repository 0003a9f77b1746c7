// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use tokio::sync::broadcast;
use tracing::trace;

use crate::{
    types::{block::BlockId, ledger::OutputId, tangle::MilestoneIndex},
    whiteflag::ConfirmedMilestoneStats,
};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Notifications about state changes of the tangle.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TangleEvent {
    BlockSolid(BlockId),
    BlockReferenced { block_id: BlockId, index: MilestoneIndex },
    MilestoneConfirmed(ConfirmedMilestoneStats),
    ConfirmedMilestoneIndexChanged(MilestoneIndex),
    LatestMilestoneIndexChanged(MilestoneIndex),
    MilestoneSolidificationFailed(MilestoneIndex),
    NewOutput(OutputId),
    NewSpent(OutputId),
}

/// Fans tangle events out to any number of subscribers.
///
/// Subscribers that fall behind by more than the channel capacity miss events.
#[derive(Debug)]
pub struct Events {
    sender: broadcast::Sender<TangleEvent>,
}

impl Events {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TangleEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: TangleEvent) {
        // Failing to send only means that nobody listens.
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            trace!("no subscriber for {event:?}");
        }
    }
}

impl Default for Events {
    fn default() -> Self {
        Self::new()
    }
}
