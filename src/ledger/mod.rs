// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Module that contains the unspent transaction output ledger.
//!
//! The ledger is guarded by a single read/write lock: confirmation holds the write lock for a whole milestone, so
//! readers never observe a half applied milestone.

mod error;

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use self::error::LedgerError;
use crate::{
    db::{Batch, KvStore, StorePrefix},
    types::{
        ledger::{Address, LedgerOutput, LedgerSpent, OutputId},
        tangle::MilestoneIndex,
    },
};

/// The outputs created and consumed by one milestone.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneDiff {
    pub created: Vec<OutputId>,
    pub consumed: Vec<OutputId>,
}

/// The ledger guarded by its lock.
#[derive(Debug)]
pub struct Ledger {
    state: RwLock<LedgerState>,
}

impl Ledger {
    pub fn new(store: Arc<dyn KvStore>) -> Result<Self, LedgerError> {
        let state = LedgerState::load(store)?;
        debug!("Ledger index is {}.", state.ledger_index);
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    pub fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write()
    }

    pub fn ledger_index(&self) -> MilestoneIndex {
        self.read().ledger_index()
    }
}

/// The ledger as of [`LedgerState::ledger_index`].
#[derive(Debug)]
pub struct LedgerState {
    store: Arc<dyn KvStore>,
    ledger_index: MilestoneIndex,
}

fn output_key(output_id: &OutputId) -> Vec<u8> {
    StorePrefix::LedgerOutput.key(&[&output_id.to_bytes()])
}

fn spent_key(output_id: &OutputId) -> Vec<u8> {
    StorePrefix::LedgerSpent.key(&[&output_id.to_bytes()])
}

/// Unspent outputs are indexed by address, so they can be listed per owner.
fn unspent_key(address: &Address, output_id: &OutputId) -> Vec<u8> {
    StorePrefix::LedgerUnspent.key(&[&address.0, &output_id.to_bytes()])
}

fn ledger_index_key() -> Vec<u8> {
    StorePrefix::LedgerIndex.key(&[])
}

fn diff_key(index: MilestoneIndex) -> Vec<u8> {
    StorePrefix::LedgerDiff.key(&[&index.to_be_bytes()])
}

impl LedgerState {
    fn load(store: Arc<dyn KvStore>) -> Result<Self, LedgerError> {
        let ledger_index = match store.get(&ledger_index_key())? {
            Some(bytes) => MilestoneIndex(bincode::deserialize(&bytes)?),
            None => MilestoneIndex(0),
        };
        Ok(Self { store, ledger_index })
    }

    /// The index of the last milestone applied to the ledger.
    pub fn ledger_index(&self) -> MilestoneIndex {
        self.ledger_index
    }

    pub fn output(&self, output_id: &OutputId) -> Result<Option<LedgerOutput>, LedgerError> {
        Ok(self
            .store
            .get(&output_key(output_id))?
            .map(|bytes| bincode::deserialize(&bytes))
            .transpose()?)
    }

    pub fn spent(&self, output_id: &OutputId) -> Result<Option<LedgerSpent>, LedgerError> {
        Ok(self
            .store
            .get(&spent_key(output_id))?
            .map(|bytes| bincode::deserialize(&bytes))
            .transpose()?)
    }

    pub fn is_unspent(&self, output_id: &OutputId) -> Result<bool, LedgerError> {
        Ok(match self.output(output_id)? {
            Some(output) => self.store.has(&unspent_key(&output.output.address, output_id))?,
            None => false,
        })
    }

    pub fn unspent_outputs_of(&self, address: &Address) -> Result<Vec<LedgerOutput>, LedgerError> {
        let prefix = StorePrefix::LedgerUnspent.key(&[&address.0]);
        let mut ids = Vec::new();
        self.store.iterate_prefix(&prefix, &mut |key, _| {
            if let Ok(id) = OutputId::from_bytes(&key[prefix.len()..]) {
                ids.push(id);
            }
            true
        })?;
        ids.iter()
            .filter_map(|id| self.output(id).transpose())
            .collect()
    }

    pub fn milestone_diff(&self, index: MilestoneIndex) -> Result<Option<MilestoneDiff>, LedgerError> {
        Ok(self
            .store
            .get(&diff_key(index))?
            .map(|bytes| bincode::deserialize(&bytes))
            .transpose()?)
    }

    /// Applies the outputs created and consumed by milestone `index` in one batch.
    pub fn apply_milestone_diff(
        &mut self,
        index: MilestoneIndex,
        new_outputs: &[LedgerOutput],
        new_spents: &[LedgerSpent],
    ) -> Result<(), LedgerError> {
        let expected = self.ledger_index + 1;
        if index != expected {
            return Err(LedgerError::IndexMismatch { expected, actual: index });
        }

        let mut batch = Batch::default();
        for output in new_outputs {
            batch
                .set(output_key(&output.output_id), bincode::serialize(output)?)
                .set(unspent_key(&output.output.address, &output.output_id), Vec::new());
        }
        for spent in new_spents {
            let output = &spent.output;
            // Outputs created and consumed by the same milestone are stored as well.
            batch
                .set(output_key(&output.output_id), bincode::serialize(output)?)
                .set(spent_key(&output.output_id), bincode::serialize(spent)?)
                .delete(unspent_key(&output.output.address, &output.output_id));
        }
        let diff = MilestoneDiff {
            created: new_outputs.iter().map(|o| o.output_id).collect(),
            consumed: new_spents.iter().map(|s| s.output.output_id).collect(),
        };
        batch
            .set(diff_key(index), bincode::serialize(&diff)?)
            .set(ledger_index_key(), bincode::serialize(&index.0)?);
        self.store.write_batch(batch)?;
        self.ledger_index = index;
        Ok(())
    }

    /// Imports an initial set of unspent outputs and sets the ledger index, e.g. from a snapshot.
    pub fn import_unspent_outputs(
        &mut self,
        outputs: &[LedgerOutput],
        ledger_index: MilestoneIndex,
    ) -> Result<(), LedgerError> {
        let mut batch = Batch::default();
        for output in outputs {
            batch
                .set(output_key(&output.output_id), bincode::serialize(output)?)
                .set(unspent_key(&output.output.address, &output.output_id), Vec::new());
        }
        batch.set(ledger_index_key(), bincode::serialize(&ledger_index.0)?);
        self.store.write_batch(batch)?;
        self.ledger_index = ledger_index;
        debug!("Imported {} unspent outputs at ledger index {ledger_index}.", outputs.len());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        db::MemoryStore,
        types::{
            block::BlockId,
            ledger::{Output, TransactionId},
        },
    };

    fn ledger_output(tx: u8, address: u8, amount: u64) -> LedgerOutput {
        LedgerOutput {
            output_id: OutputId::new(TransactionId([tx; 32]), 0),
            output: Output::new(Address([address; 32]), amount),
            block_id: BlockId([tx; 32]),
            milestone_index_booked: MilestoneIndex(0),
            milestone_timestamp_booked: 0,
        }
    }

    #[test]
    fn apply_requires_next_index() {
        let ledger = Ledger::new(Arc::new(MemoryStore::new())).unwrap();
        let err = ledger
            .write()
            .apply_milestone_diff(MilestoneIndex(2), &[], &[])
            .unwrap_err();
        assert!(matches!(err, LedgerError::IndexMismatch { expected, .. } if expected == MilestoneIndex(1)));
    }

    #[test]
    fn spending_moves_outputs_out_of_the_unspent_set() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone()).unwrap();
        let genesis = ledger_output(1, 7, 100);
        ledger
            .write()
            .import_unspent_outputs(&[genesis.clone()], MilestoneIndex(0))
            .unwrap();
        assert_eq!(ledger.read().unspent_outputs_of(&Address([7; 32])).unwrap(), vec![genesis.clone()]);

        let created = ledger_output(2, 8, 100);
        let spent = LedgerSpent {
            output: genesis.clone(),
            transaction_id_spent: TransactionId([2; 32]),
            milestone_index_spent: MilestoneIndex(1),
            milestone_timestamp_spent: 0,
        };
        ledger
            .write()
            .apply_milestone_diff(MilestoneIndex(1), &[created.clone()], &[spent.clone()])
            .unwrap();

        let state = ledger.read();
        assert!(!state.is_unspent(&genesis.output_id).unwrap());
        assert!(state.is_unspent(&created.output_id).unwrap());
        assert_eq!(state.spent(&genesis.output_id).unwrap(), Some(spent));
        assert!(state.unspent_outputs_of(&Address([7; 32])).unwrap().is_empty());
        assert_eq!(
            state.milestone_diff(MilestoneIndex(1)).unwrap().unwrap().consumed,
            vec![genesis.output_id]
        );
        drop(state);

        assert_eq!(Ledger::new(store).unwrap().ledger_index(), MilestoneIndex(1));
    }
}
