// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Module that contains the key-value store abstraction the engine persists into.
//!
//! The store is an ordered byte map. Every object kind lives under its own one byte [`StorePrefix`].

mod error;
mod memory;

use std::fmt::Debug;

pub use self::{error::StorageError, memory::MemoryStore};

/// The one byte prefixes partitioning the store by object kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StorePrefix {
    Snapshot = 1,
    Blocks = 2,
    Metadata = 3,
    Children = 4,
    MilestoneIndex = 5,
    Unreferenced = 7,
    Protocol = 8,
    LedgerOutput = 9,
    LedgerUnspent = 10,
    LedgerSpent = 11,
    LedgerIndex = 12,
    LedgerDiff = 13,
    Health = 255,
}

impl StorePrefix {
    /// Builds a key from the prefix followed by the given parts.
    pub fn key(self, parts: &[&[u8]]) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + parts.iter().map(|p| p.len()).sum::<usize>());
        key.push(self as u8);
        for part in parts {
            key.extend_from_slice(part);
        }
        key
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum BatchOp {
    Set(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// A set of mutations applied atomically by [`KvStore::write_batch`].
#[derive(Clone, Debug, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn set(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Set(key.into(), value.into()));
        self
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Delete(key.into()));
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// An ordered byte-keyed store.
pub trait KvStore: Send + Sync + Debug {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    fn delete(&self, key: &[u8]) -> Result<(), StorageError>;

    fn has(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }

    /// Calls `f` for every entry whose key starts with `prefix`, in key order, until `f` returns `false`.
    fn iterate_prefix(&self, prefix: &[u8], f: &mut dyn FnMut(&[u8], &[u8]) -> bool) -> Result<(), StorageError>;

    fn delete_prefix(&self, prefix: &[u8]) -> Result<(), StorageError> {
        let mut batch = Batch::default();
        self.iterate_prefix(prefix, &mut |key, _| {
            batch.delete(key);
            true
        })?;
        self.write_batch(batch)
    }

    /// Applies all mutations of the batch, or none of them.
    fn write_batch(&self, batch: Batch) -> Result<(), StorageError>;
}
