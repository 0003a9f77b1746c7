// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use parking_lot::Mutex;

use super::cache::{CachedObject, ObjectStorage, StorableObject};
use crate::db::StorageError;

/// Keeps one handle per object for the duration of a single operation.
///
/// The first lookup of a key retains the object on the underlying cache. Later lookups hand out handles sharing
/// that retain and never take the cache lock. [`Memcache::cleanup`] gives up the memcache's own handles at the end
/// of the operation.
pub struct Memcache<T: StorableObject> {
    storage: ObjectStorage<T>,
    cached: Mutex<HashMap<T::Key, CachedObject<T>>>,
}

impl<T: StorableObject> Memcache<T> {
    pub fn new(storage: ObjectStorage<T>) -> Self {
        Self {
            storage,
            cached: Default::default(),
        }
    }

    /// Returns a handle to the object. The memcache keeps its own handle until cleanup.
    pub fn get(&self, key: &T::Key) -> Result<Option<CachedObject<T>>, StorageError> {
        let mut cached = self.cached.lock();
        if let Some(object) = cached.get(key) {
            return Ok(Some(object.share()));
        }
        Ok(self.storage.get(key)?.map(|object| {
            let handle = object.share();
            cached.insert(*key, object);
            handle
        }))
    }

    pub fn len(&self) -> usize {
        self.cached.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases every held handle.
    pub fn cleanup(self, force: bool) {
        let cached = std::mem::take(&mut *self.cached.lock());
        for (_, object) in cached {
            object.release(force);
        }
    }
}
