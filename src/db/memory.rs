// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Provides an in-memory key-value store.
//!
//! This store can be useful for writing test cases, for example.

use std::{collections::BTreeMap, ops::Bound};

use parking_lot::RwLock;

use super::{Batch, BatchOp, KvStore, StorageError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of entries in the store.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.inner.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.inner.write().remove(key);
        Ok(())
    }

    fn has(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.inner.read().contains_key(key))
    }

    fn iterate_prefix(&self, prefix: &[u8], f: &mut dyn FnMut(&[u8], &[u8]) -> bool) -> Result<(), StorageError> {
        // Entries are copied out first so that `f` may call back into the store.
        let entries = self
            .inner
            .read()
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect::<Vec<_>>();
        for (key, value) in entries {
            if !f(&key, &value) {
                break;
            }
        }
        Ok(())
    }

    fn write_batch(&self, batch: Batch) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Set(key, value) => {
                    inner.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    inner.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::StorePrefix;

    #[test]
    fn prefix_iteration_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        store.set(&StorePrefix::Children.key(&[&[2], &[1]]), &[]).unwrap();
        store.set(&StorePrefix::Children.key(&[&[1], &[9]]), &[]).unwrap();
        store.set(&StorePrefix::Children.key(&[&[1], &[3]]), &[]).unwrap();
        store.set(&StorePrefix::MilestoneIndex.key(&[&[1]]), &[]).unwrap();

        let mut keys = Vec::new();
        store
            .iterate_prefix(&StorePrefix::Children.key(&[&[1]]), &mut |key, _| {
                keys.push(key.to_vec());
                true
            })
            .unwrap();
        assert_eq!(keys, vec![vec![4, 1, 3], vec![4, 1, 9]]);
    }

    #[test]
    fn batch_and_prefix_delete() {
        let store = MemoryStore::new();
        let mut batch = Batch::default();
        batch.set(vec![1, 1], vec![1]).set(vec![1, 2], vec![2]).set(vec![2, 1], vec![3]);
        store.write_batch(batch).unwrap();
        assert_eq!(store.len(), 3);

        store.delete_prefix(&[1]).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&[2, 1]).unwrap(), Some(vec![3]));
    }
}
