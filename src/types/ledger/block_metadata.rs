// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use super::{ConflictReason, LedgerInclusionState};
use crate::types::{
    block::{BlockError, BlockId},
    tangle::MilestoneIndex,
};

const FLAG_SOLID: u8 = 1 << 0;
const FLAG_REFERENCED: u8 = 1 << 1;
const FLAG_NO_TRANSACTION: u8 = 1 << 2;
const FLAG_CONFLICTING_TRANSACTION: u8 = 1 << 3;
const FLAG_MILESTONE: u8 = 1 << 4;

/// The youngest and oldest confirmed milestone indexes visible in the past cone of a block, together with the
/// confirmed milestone index at which they were computed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConeRootIndexes {
    pub youngest: MilestoneIndex,
    pub oldest: MilestoneIndex,
    pub calculation_index: MilestoneIndex,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct MetadataState {
    flags: u8,
    referenced_index: MilestoneIndex,
    white_flag_index: u32,
    conflict_reason: ConflictReason,
    cone_root_indexes: ConeRootIndexes,
}

impl MetadataState {
    fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    fn set(&mut self, flag: u8, value: bool) {
        if value {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }
}

/// The mutable state the node keeps for every block.
///
/// All setters take the per-object lock and mark the metadata as modified only if the state actually changed.
#[derive(Debug)]
pub struct BlockMetadata {
    block_id: BlockId,
    /// Copied from the block, so traversals never need to load block bodies.
    parents: Box<[BlockId]>,
    state: RwLock<MetadataState>,
    modified: AtomicBool,
}

impl BlockMetadata {
    /// The length of the fixed part of the serialized record.
    const FIXED_LENGTH: usize = 1 + 4 + 4 + 1 + 4 + 4 + 4 + 1;

    pub fn new(block_id: BlockId, parents: &[BlockId]) -> Self {
        Self {
            block_id,
            parents: parents.into(),
            state: Default::default(),
            modified: AtomicBool::new(true),
        }
    }

    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    pub fn parents(&self) -> &[BlockId] {
        &self.parents
    }

    pub fn is_solid(&self) -> bool {
        self.state.read().has(FLAG_SOLID)
    }

    pub fn is_referenced(&self) -> bool {
        self.state.read().has(FLAG_REFERENCED)
    }

    pub fn is_milestone(&self) -> bool {
        self.state.read().has(FLAG_MILESTONE)
    }

    pub fn is_no_transaction(&self) -> bool {
        self.state.read().has(FLAG_NO_TRANSACTION)
    }

    pub fn is_conflicting_transaction(&self) -> bool {
        self.state.read().has(FLAG_CONFLICTING_TRANSACTION)
    }

    /// Returns the referencing milestone index and the white-flag index, if the block was referenced.
    pub fn referenced(&self) -> Option<(MilestoneIndex, u32)> {
        let state = self.state.read();
        state
            .has(FLAG_REFERENCED)
            .then_some((state.referenced_index, state.white_flag_index))
    }

    pub fn referenced_index(&self) -> Option<MilestoneIndex> {
        self.referenced().map(|(index, _)| index)
    }

    pub fn conflict_reason(&self) -> ConflictReason {
        self.state.read().conflict_reason
    }

    pub fn inclusion_state(&self) -> Option<LedgerInclusionState> {
        let state = self.state.read();
        if !state.has(FLAG_REFERENCED) {
            None
        } else if state.has(FLAG_CONFLICTING_TRANSACTION) {
            Some(LedgerInclusionState::Conflicting)
        } else if state.has(FLAG_NO_TRANSACTION) {
            Some(LedgerInclusionState::NoTransaction)
        } else {
            Some(LedgerInclusionState::Included)
        }
    }

    pub fn cone_root_indexes(&self) -> ConeRootIndexes {
        self.state.read().cone_root_indexes
    }

    pub fn set_solid(&self, solid: bool) {
        self.update(|state| state.set(FLAG_SOLID, solid));
    }

    pub fn set_milestone(&self, is_milestone: bool) {
        self.update(|state| state.set(FLAG_MILESTONE, is_milestone));
    }

    /// Marks the block as referenced by milestone `index` at position `white_flag_index`.
    ///
    /// The conflict reason is only recorded for [`LedgerInclusionState::Conflicting`].
    pub fn set_referenced(
        &self,
        index: MilestoneIndex,
        white_flag_index: u32,
        inclusion_state: LedgerInclusionState,
        conflict_reason: ConflictReason,
    ) {
        debug_assert!(index > 0, "blocks can only be referenced by milestone indexes above zero");
        self.update(|state| {
            state.set(FLAG_REFERENCED, true);
            state.referenced_index = index;
            state.white_flag_index = white_flag_index;
            state.set(
                FLAG_NO_TRANSACTION,
                inclusion_state == LedgerInclusionState::NoTransaction,
            );
            let conflicting = inclusion_state == LedgerInclusionState::Conflicting;
            state.set(FLAG_CONFLICTING_TRANSACTION, conflicting);
            state.conflict_reason = if conflicting {
                conflict_reason
            } else {
                ConflictReason::None
            };
        });
    }

    pub fn set_cone_root_indexes(
        &self,
        youngest: MilestoneIndex,
        oldest: MilestoneIndex,
        calculation_index: MilestoneIndex,
    ) {
        self.update(|state| {
            state.cone_root_indexes = ConeRootIndexes {
                youngest,
                oldest,
                calculation_index,
            }
        });
    }

    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::Acquire)
    }

    pub fn set_modified(&self, modified: bool) {
        self.modified.store(modified, Ordering::Release);
    }

    fn update(&self, f: impl FnOnce(&mut MetadataState)) {
        let mut state = self.state.write();
        let before = *state;
        f(&mut state);
        if *state != before {
            self.set_modified(true);
        }
    }

    /// Serializes the metadata record.
    ///
    /// Layout: flags (1), referenced index (4), white-flag index (4), conflict reason (1), youngest cone root
    /// index (4), oldest cone root index (4), calculation index (4), parent count (1), parents (32 each). All
    /// integers are little endian.
    pub fn to_bytes(&self) -> Vec<u8> {
        let state = *self.state.read();
        let mut bytes = Vec::with_capacity(Self::FIXED_LENGTH + self.parents.len() * BlockId::LENGTH);
        bytes.push(state.flags);
        bytes.extend_from_slice(&state.referenced_index.0.to_le_bytes());
        bytes.extend_from_slice(&state.white_flag_index.to_le_bytes());
        bytes.push(state.conflict_reason.into());
        bytes.extend_from_slice(&state.cone_root_indexes.youngest.0.to_le_bytes());
        bytes.extend_from_slice(&state.cone_root_indexes.oldest.0.to_le_bytes());
        bytes.extend_from_slice(&state.cone_root_indexes.calculation_index.0.to_le_bytes());
        bytes.push(self.parents.len() as u8);
        for parent in self.parents.iter() {
            bytes.extend_from_slice(parent.as_ref());
        }
        bytes
    }

    pub fn from_bytes(block_id: BlockId, bytes: &[u8]) -> Result<Self, BlockError> {
        if bytes.len() < Self::FIXED_LENGTH {
            return Err(BlockError::InvalidLength {
                expected: Self::FIXED_LENGTH,
                actual: bytes.len(),
            });
        }
        let u32_at = |offset: usize| {
            MilestoneIndex(u32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ]))
        };
        let parent_count = bytes[Self::FIXED_LENGTH - 1] as usize;
        let expected = Self::FIXED_LENGTH + parent_count * BlockId::LENGTH;
        if bytes.len() != expected {
            return Err(BlockError::InvalidLength {
                expected,
                actual: bytes.len(),
            });
        }
        let parents = bytes[Self::FIXED_LENGTH..]
            .chunks_exact(BlockId::LENGTH)
            .map(BlockId::from_slice)
            .collect::<Result<Box<[_]>, _>>()?;

        let state = MetadataState {
            flags: bytes[0],
            referenced_index: u32_at(1),
            white_flag_index: u32_at(5).0,
            conflict_reason: ConflictReason::try_from(bytes[9]).map_err(BlockError::InvalidConflictReason)?,
            cone_root_indexes: ConeRootIndexes {
                youngest: u32_at(10),
                oldest: u32_at(14),
                calculation_index: u32_at(18),
            },
        };

        Ok(Self {
            block_id,
            parents,
            state: RwLock::new(state),
            modified: AtomicBool::new(false),
        })
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn metadata() -> BlockMetadata {
        BlockMetadata::new(BlockId([9; 32]), &[BlockId([1; 32]), BlockId([2; 32])])
    }

    #[test]
    fn setters_only_mark_real_changes() {
        let metadata = metadata();
        metadata.set_modified(false);

        metadata.set_solid(false);
        assert!(!metadata.is_modified());

        metadata.set_solid(true);
        assert!(metadata.is_solid());
        assert!(metadata.is_modified());

        metadata.set_modified(false);
        metadata.set_solid(true);
        assert!(!metadata.is_modified());
    }

    #[test]
    fn conflict_implies_referenced() {
        let metadata = metadata();
        assert_eq!(metadata.inclusion_state(), None);

        metadata.set_referenced(
            4.into(),
            2,
            LedgerInclusionState::Conflicting,
            ConflictReason::InputUtxoNotFound,
        );
        assert_eq!(metadata.referenced(), Some((4.into(), 2)));
        assert_eq!(metadata.inclusion_state(), Some(LedgerInclusionState::Conflicting));
        assert_eq!(metadata.conflict_reason(), ConflictReason::InputUtxoNotFound);

        // An included block never carries a conflict reason.
        metadata.set_referenced(4.into(), 2, LedgerInclusionState::Included, ConflictReason::InvalidSignature);
        assert_eq!(metadata.conflict_reason(), ConflictReason::None);
        assert!(!metadata.is_conflicting_transaction());
    }

    #[test]
    fn record_layout() {
        let metadata = metadata();
        metadata.set_solid(true);
        metadata.set_referenced(
            7.into(),
            3,
            LedgerInclusionState::Conflicting,
            ConflictReason::InputUtxoAlreadySpent,
        );
        metadata.set_cone_root_indexes(7.into(), 5.into(), 7.into());

        let bytes = metadata.to_bytes();
        assert_eq!(bytes.len(), 23 + 2 * 32);
        assert_eq!(bytes[0], FLAG_SOLID | FLAG_REFERENCED | FLAG_CONFLICTING_TRANSACTION);
        assert_eq!(&bytes[1..5], &7u32.to_le_bytes());
        assert_eq!(bytes[9], 1);
        assert_eq!(bytes[22], 2);

        let decoded = BlockMetadata::from_bytes(metadata.block_id(), &bytes).unwrap();
        assert_eq!(decoded.parents(), metadata.parents());
        assert_eq!(decoded.referenced(), Some((7.into(), 3)));
        assert_eq!(decoded.cone_root_indexes(), metadata.cone_root_indexes());
        assert!(!decoded.is_modified());

        assert!(BlockMetadata::from_bytes(metadata.block_id(), &bytes[..30]).is_err());
    }
}
