// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::{sync::Arc, time::Duration};

use tokio::sync::broadcast;
use weave::{
    dag::{AbortSignal, MemcachedTraverserStorage},
    db::{KvStore, MemoryStore},
    storage::{CacheConfig, CachedMetadata, Storage},
    tangle::{RequestQueue, Tangle, TangleConfig, TangleEvent},
    types::{
        block::{Block, BlockId, MerkleRoot, MilestonePayload, Parents, Payload, TaggedDataPayload, TransactionPayload},
        ledger::{Address, LedgerOutput, Output, OutputId, TransactionId},
        tangle::{Milestone, MilestoneIndex},
    },
    whiteflag::{compute_white_flag_mutations, confirm_milestone, DefaultTransactionValidator, WhiteFlagMutations},
};

/// A tangle on an in-memory store, with helpers to grow it.
pub struct TestTangle {
    pub tangle: Arc<Tangle>,
    pub requests: Arc<RequestQueue>,
}

#[allow(unused)]
impl TestTangle {
    /// A tangle whose solid entry points are the given ids, all at index 0.
    pub fn new(entry_points: &[BlockId]) -> Self {
        Self::with_config(entry_points, TangleConfig::default())
    }

    pub fn with_config(entry_points: &[BlockId], config: TangleConfig) -> Self {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let storage = Arc::new(Storage::new(store, &CacheConfig::default()).unwrap());
        {
            let mut solid_entry_points = storage.solid_entry_points_mut();
            for block_id in entry_points {
                solid_entry_points.add(*block_id, MilestoneIndex(0));
            }
        }
        let requests = Arc::new(RequestQueue::new());
        let tangle = Arc::new(Tangle::new(storage, requests.clone(), config).unwrap());
        Self { tangle, requests }
    }

    pub fn storage(&self) -> &Storage {
        self.tangle.storage()
    }

    pub fn metadata(&self, block_id: &BlockId) -> CachedMetadata {
        self.storage().cached_block_metadata(block_id).unwrap().unwrap()
    }

    /// Adds the block through the regular ingestion path.
    pub fn add(&self, block: Block) -> BlockId {
        let block_id = block.id();
        self.tangle.add_block(block).unwrap();
        block_id
    }

    /// Stores the block without any of the ingestion side effects.
    pub fn store(&self, block: Block) -> BlockId {
        let block_id = block.id();
        self.storage().store_block_if_absent(block).unwrap();
        block_id
    }

    pub fn attach(&self, parents: &[BlockId]) -> BlockId {
        self.add(block(parents))
    }

    /// The mutations a milestone with these parents would apply to the current ledger.
    pub fn mutations(&self, index: u32, parents: &[BlockId]) -> WhiteFlagMutations {
        let parents = Parents::new(parents.iter().copied()).unwrap();
        let storage = MemcachedTraverserStorage::new(self.storage());
        let mutations = compute_white_flag_mutations(
            &storage,
            &self.tangle.ledger().read(),
            &DefaultTransactionValidator,
            MilestoneIndex(index),
            timestamp(index),
            &parents,
            &AbortSignal::new(),
        );
        storage.cleanup(true);
        mutations.unwrap()
    }

    /// A milestone block with merkle roots matching the current state of the tangle.
    pub fn milestone(&self, index: u32, parents: &[BlockId]) -> Block {
        let mutations = self.mutations(index, parents);
        milestone_block(
            index,
            parents,
            mutations.inclusion_merkle_root,
            mutations.applied_merkle_root,
        )
    }

    /// Registers a stored milestone block as milestone without triggering anything.
    pub fn register_milestone(&self, block: &Block) -> Milestone {
        let payload = block.milestone().unwrap();
        let milestone = Milestone::new(payload.index, block.id(), payload.timestamp);
        self.storage().store_milestone_if_absent(milestone).unwrap();
        milestone
    }

    /// Confirms a milestone with the given parents directly, bypassing the solidifier. Returns the milestone block id.
    pub fn confirm(&self, index: u32, parents: &[BlockId]) -> BlockId {
        let milestone_block = self.milestone(index, parents);
        self.store(milestone_block.clone());
        let milestone = self.register_milestone(&milestone_block);
        confirm_milestone(
            self.storage(),
            self.tangle.ledger(),
            &DefaultTransactionValidator,
            &milestone,
            &AbortSignal::new(),
            |_| (),
        )
        .unwrap();
        milestone_block.id()
    }

    /// Gives a fresh output to `address` in the genesis ledger.
    pub fn fund(&self, address: Address, amount: u64) -> OutputId {
        let output_id = OutputId::new(TransactionId(rand::random()), 0);
        self.fund_output(output_id, address, amount);
        output_id
    }

    pub fn fund_output(&self, output_id: OutputId, address: Address, amount: u64) {
        let output = LedgerOutput {
            output_id,
            output: Output::new(address, amount),
            block_id: BlockId::default(),
            milestone_index_booked: MilestoneIndex(0),
            milestone_timestamp_booked: 0,
        };
        let mut ledger = self.tangle.ledger().write();
        let index = ledger.ledger_index();
        ledger.import_unspent_outputs(&[output], index).unwrap();
    }
}

pub fn timestamp(index: u32) -> u32 {
    1_660_000_000 + index * 10
}

#[allow(unused)]
pub fn random_block_id() -> BlockId {
    BlockId(rand::random())
}

/// A block without ledger effect. Every call creates a distinct block.
pub fn block(parents: &[BlockId]) -> Block {
    let payload = TaggedDataPayload {
        tag: b"weave".to_vec(),
        data: rand::random::<[u8; 16]>().to_vec(),
    };
    build(parents, payload.into())
}

#[allow(unused)]
pub fn transaction_block(parents: &[BlockId], inputs: &[OutputId], outputs: &[(Address, u64)]) -> Block {
    let payload = TransactionPayload {
        inputs: inputs.to_vec(),
        outputs: outputs
            .iter()
            .map(|(address, amount)| Output::new(*address, *amount))
            .collect(),
        unlock: vec![1],
    };
    build(parents, payload.into())
}

#[allow(unused)]
pub fn milestone_block(index: u32, parents: &[BlockId], inclusion: MerkleRoot, applied: MerkleRoot) -> Block {
    let parents = Parents::new(parents.iter().copied()).unwrap();
    let payload = MilestonePayload {
        index: MilestoneIndex(index),
        timestamp: timestamp(index),
        parents: parents.to_vec(),
        inclusion_merkle_root: inclusion,
        applied_merkle_root: applied,
    };
    Block::build(parents, Some(payload.into())).unwrap()
}

fn build(parents: &[BlockId], payload: Payload) -> Block {
    Block::build(Parents::new(parents.iter().copied()).unwrap(), Some(payload)).unwrap()
}

/// Waits for the first event matching `f`.
#[allow(unused)]
pub async fn wait_for(
    events: &mut broadcast::Receiver<TangleEvent>,
    f: impl Fn(&TangleEvent) -> bool,
) -> TangleEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.unwrap();
            if f(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
