// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use super::TangleConfig;
use crate::{
    dag::{cone_root_indexes, AbortSignal, TraversalError, TraverserStorage},
    db::StorageError,
    storage::Storage,
    types::{
        block::BlockId,
        tangle::{MilestoneIndex, ProtocolParameters},
    },
};

/// The quality of a block as a tip.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TipScore {
    /// The block is unknown.
    NotFound,
    /// The block references too old parts of the tangle to be selected at all.
    BelowMaxDepth,
    /// The block is lazy: it does not reference recent milestones.
    YoungestConeRootIndexThresholdReached,
    /// The block is semi-lazy: it references old parts of the tangle.
    OldestConeRootIndexThresholdReached,
    Healthy,
}

impl TipScore {
    /// Whether the block should be helped along by referencing it together with a healthy tip.
    pub fn should_promote(&self) -> bool {
        matches!(
            self,
            Self::YoungestConeRootIndexThresholdReached | Self::OldestConeRootIndexThresholdReached
        )
    }

    /// Whether the block can no longer be confirmed and its payload should be reissued.
    pub fn should_reattach(&self) -> bool {
        matches!(self, Self::BelowMaxDepth)
    }
}

pub struct TipScoreCalculator<'a> {
    storage: &'a Storage,
    max_delta_youngest: u32,
    max_delta_oldest: u32,
    below_max_depth: u32,
}

impl<'a> TipScoreCalculator<'a> {
    /// Reads `below_max_depth` from the stored protocol parameters, falling back to the defaults.
    pub fn new(storage: &'a Storage, config: &TangleConfig) -> Result<Self, StorageError> {
        let below_max_depth = storage
            .protocol_parameters()?
            .unwrap_or_default()
            .below_max_depth;
        Ok(Self {
            storage,
            max_delta_youngest: config.max_delta_block_youngest_cone_root_index_to_cmi,
            max_delta_oldest: config.max_delta_block_oldest_cone_root_index_to_cmi,
            below_max_depth,
        })
    }

    pub fn with_protocol_parameters(mut self, params: &ProtocolParameters) -> Self {
        self.below_max_depth = params.below_max_depth;
        self
    }

    pub fn tip_score(&self, block_id: &BlockId, cmi: MilestoneIndex) -> Result<TipScore, TraversalError> {
        let Some(metadata) = TraverserStorage::cached_block_metadata(self.storage, block_id)? else {
            return Ok(TipScore::NotFound);
        };
        let (youngest, oldest) = cone_root_indexes(self.storage, &metadata, cmi, &AbortSignal::new())?;

        if cmi.saturating_sub(oldest) > self.below_max_depth {
            return Ok(TipScore::BelowMaxDepth);
        }
        if cmi.saturating_sub(youngest) > self.max_delta_youngest {
            return Ok(TipScore::YoungestConeRootIndexThresholdReached);
        }
        if cmi.saturating_sub(oldest) > self.max_delta_oldest {
            return Ok(TipScore::OldestConeRootIndexThresholdReached);
        }
        Ok(TipScore::Healthy)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn score_actions() {
        assert!(TipScore::BelowMaxDepth.should_reattach());
        assert!(!TipScore::BelowMaxDepth.should_promote());
        assert!(TipScore::OldestConeRootIndexThresholdReached.should_promote());
        assert!(!TipScore::Healthy.should_promote());
        assert!(!TipScore::NotFound.should_reattach());
    }
}
