// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! A reference counted object cache in front of the key-value store.
//!
//! Every lookup hands out a [`CachedObject`], which keeps the object alive until it is dropped. Once the last handle
//! of an object is gone, the object is either kept warm for the configured cache time or evicted. Evicted objects
//! that were created or modified are queued for write-back and reach the store with the next [`ObjectStorage::flush`].

use std::{
    collections::HashMap,
    fmt,
    hash::Hash,
    ops::Deref,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::{Mutex, MutexGuard};
use tracing::{trace, warn};

use crate::db::{Batch, KvStore, StorageError, StorePrefix};

/// An object that can be held by an [`ObjectStorage`].
pub trait StorableObject: Send + Sync + Sized + 'static {
    type Key: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    const PREFIX: StorePrefix;

    fn key(&self) -> Self::Key;

    /// The encoding of the key, without the store prefix.
    fn key_bytes(key: &Self::Key) -> Vec<u8>;

    fn to_bytes(&self) -> Vec<u8>;

    fn from_bytes(key: Self::Key, bytes: &[u8]) -> Result<Self, StorageError>;

    /// Whether the object was mutated since it was last written. Immutable objects are never modified.
    fn is_modified(&self) -> bool {
        false
    }

    fn set_modified(&self, _modified: bool) {}
}

pub(crate) type Entries<T> = HashMap<<T as StorableObject>::Key, Entry<T>>;

pub(crate) struct Entry<T> {
    object: Arc<T>,
    retain_count: usize,
    /// Newly created and not yet written.
    dirty: bool,
    released_at: Option<Instant>,
}

struct Shared<T: StorableObject> {
    store: Arc<dyn KvStore>,
    cache_time: Duration,
    entries: Mutex<Entries<T>>,
    /// Encoded objects waiting for write-back. `None` marks a deletion.
    pending: Mutex<HashMap<T::Key, Option<Vec<u8>>>>,
    live_handles: AtomicUsize,
}

impl<T: StorableObject> Shared<T> {
    fn store_key(key: &T::Key) -> Vec<u8> {
        T::PREFIX.key(&[&T::key_bytes(key)])
    }

    fn retain(self: &Arc<Self>, key: T::Key, entry: &mut Entry<T>) -> CachedObject<T> {
        entry.retain_count += 1;
        entry.released_at = None;
        self.live_handles.fetch_add(1, Ordering::AcqRel);
        CachedObject::new(self.clone(), key, entry.object.clone())
    }

    fn release(&self, key: &T::Key, force: bool) {
        self.live_handles.fetch_sub(1, Ordering::AcqRel);
        let mut entries = self.entries.lock();
        // The entry is gone if the object was deleted while still in use.
        let Some(entry) = entries.get_mut(key) else { return };
        debug_assert!(entry.retain_count > 0, "released more often than retained");
        entry.retain_count = entry.retain_count.saturating_sub(1);
        if entry.retain_count > 0 {
            return;
        }
        if force || self.cache_time.is_zero() {
            if let Some(entry) = entries.remove(key) {
                self.write_back(key, &entry);
            }
        } else {
            entry.released_at = Some(Instant::now());
        }
    }

    fn write_back(&self, key: &T::Key, entry: &Entry<T>) {
        if entry.dirty || entry.object.is_modified() {
            trace!("queueing write-back of {key:?}");
            self.pending.lock().insert(*key, Some(entry.object.to_bytes()));
            entry.object.set_modified(false);
        }
    }

    fn load(&self, key: &T::Key) -> Result<Option<T>, StorageError> {
        if let Some(pending) = self.pending.lock().get(key) {
            return pending.as_deref().map(|bytes| T::from_bytes(*key, bytes)).transpose();
        }
        self.store
            .get(&Self::store_key(key))?
            .map(|bytes| T::from_bytes(*key, &bytes))
            .transpose()
    }
}

/// A cache of objects of one kind.
pub struct ObjectStorage<T: StorableObject> {
    shared: Arc<Shared<T>>,
}

impl<T: StorableObject> Clone for ObjectStorage<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: StorableObject> fmt::Debug for ObjectStorage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStorage")
            .field("prefix", &T::PREFIX)
            .field("cached", &self.len())
            .field("live_handles", &self.live_handles())
            .finish()
    }
}

impl<T: StorableObject> ObjectStorage<T> {
    pub fn new(store: Arc<dyn KvStore>, cache_time: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                cache_time,
                entries: Default::default(),
                pending: Default::default(),
                live_handles: AtomicUsize::new(0),
            }),
        }
    }

    /// Returns a handle to the object, or `None` if it does not exist.
    pub fn get(&self, key: &T::Key) -> Result<Option<CachedObject<T>>, StorageError> {
        let mut entries = self.lock_entries();
        self.get_locked(&mut entries, key)
    }

    /// Inserts the object unless one with the same key exists. Returns a handle to the stored object and whether it
    /// was newly inserted.
    pub fn store_if_absent(&self, object: T) -> Result<(CachedObject<T>, bool), StorageError> {
        let mut entries = self.lock_entries();
        self.store_if_absent_locked(&mut entries, object)
    }

    /// Locks the entry map. Handles must not be dropped while the guard is alive.
    pub(crate) fn lock_entries(&self) -> MutexGuard<'_, Entries<T>> {
        self.shared.entries.lock()
    }

    pub(crate) fn get_locked(
        &self,
        entries: &mut Entries<T>,
        key: &T::Key,
    ) -> Result<Option<CachedObject<T>>, StorageError> {
        if let Some(entry) = entries.get_mut(key) {
            return Ok(Some(self.shared.retain(*key, entry)));
        }
        Ok(match self.shared.load(key)? {
            Some(object) => {
                let entry = entries.entry(*key).or_insert(Entry {
                    object: Arc::new(object),
                    retain_count: 0,
                    dirty: false,
                    released_at: None,
                });
                Some(self.shared.retain(*key, entry))
            }
            None => None,
        })
    }

    pub(crate) fn store_if_absent_locked(
        &self,
        entries: &mut Entries<T>,
        object: T,
    ) -> Result<(CachedObject<T>, bool), StorageError> {
        let key = object.key();
        if let Some(existing) = self.get_locked(entries, &key)? {
            return Ok((existing, false));
        }
        let entry = entries.entry(key).or_insert(Entry {
            object: Arc::new(object),
            retain_count: 0,
            dirty: true,
            released_at: None,
        });
        Ok((self.shared.retain(key, entry), true))
    }

    pub fn contains(&self, key: &T::Key) -> Result<bool, StorageError> {
        if self.lock_entries().contains_key(key) {
            return Ok(true);
        }
        if let Some(pending) = self.shared.pending.lock().get(key) {
            return Ok(pending.is_some());
        }
        self.shared.store.has(&Shared::<T>::store_key(key))
    }

    /// Removes the object from the cache and queues its deletion from the store.
    pub fn delete(&self, key: &T::Key) {
        let removed = self.lock_entries().remove(key);
        self.shared.pending.lock().insert(*key, None);
        drop(removed);
    }

    /// Evicts expired objects and writes every created, modified or deleted object to the store in one batch.
    pub fn flush(&self) -> Result<(), StorageError> {
        let now = Instant::now();
        let cache_time = self.shared.cache_time;
        let mut batch = Batch::default();
        {
            let mut entries = self.lock_entries();
            let mut pending = self.shared.pending.lock();
            for (key, value) in pending.drain() {
                match value {
                    Some(bytes) => batch.set(Shared::<T>::store_key(&key), bytes),
                    None => batch.delete(Shared::<T>::store_key(&key)),
                };
            }
            entries.retain(|key, entry| {
                if entry.dirty || entry.object.is_modified() {
                    batch.set(Shared::<T>::store_key(key), entry.object.to_bytes());
                    entry.dirty = false;
                    entry.object.set_modified(false);
                }
                entry.retain_count > 0 || entry.released_at.map_or(true, |at| now.duration_since(at) < cache_time)
            });
        }
        if !batch.is_empty() {
            trace!("flushing {} {:?} records", batch.len(), T::PREFIX);
            self.shared.store.write_batch(batch)?;
        }
        Ok(())
    }

    /// Writes everything back and drops all objects that are not in use.
    pub fn shutdown(&self) -> Result<(), StorageError> {
        self.flush()?;
        self.lock_entries().retain(|_, entry| entry.retain_count > 0);
        let live = self.live_handles();
        if live > 0 {
            warn!("{live} {:?} handles still alive at shutdown", T::PREFIX);
        }
        Ok(())
    }

    /// The number of handles currently alive.
    pub fn live_handles(&self) -> usize {
        self.shared.live_handles.load(Ordering::Acquire)
    }

    /// The number of objects held in memory.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One retain on the cache, released once every handle sharing it is gone.
struct Retained<T: StorableObject> {
    shared: Arc<Shared<T>>,
    key: T::Key,
    force: AtomicBool,
}

impl<T: StorableObject> Drop for Retained<T> {
    fn drop(&mut self) {
        self.shared.release(&self.key, *self.force.get_mut());
    }
}

/// A handle to a cached object. Dropping the handle releases it.
pub struct CachedObject<T: StorableObject> {
    retained: Arc<Retained<T>>,
    object: Arc<T>,
}

impl<T: StorableObject> CachedObject<T> {
    fn new(shared: Arc<Shared<T>>, key: T::Key, object: Arc<T>) -> Self {
        Self {
            retained: Arc::new(Retained {
                shared,
                key,
                force: AtomicBool::new(false),
            }),
            object,
        }
    }

    pub fn key(&self) -> T::Key {
        self.retained.key
    }

    /// Creates another handle to the same object, with a retain of its own.
    pub fn retain(&self) -> Self {
        let shared = &self.retained.shared;
        let mut entries = shared.entries.lock();
        match entries.get_mut(&self.retained.key) {
            Some(entry) => shared.retain(self.retained.key, entry),
            None => {
                shared.live_handles.fetch_add(1, Ordering::AcqRel);
                Self::new(shared.clone(), self.retained.key, self.object.clone())
            }
        }
    }

    /// Creates another handle that shares the retain of this one, without touching the cache.
    ///
    /// The object stays retained until the last sharing handle is dropped.
    pub fn share(&self) -> Self {
        Self {
            retained: self.retained.clone(),
            object: self.object.clone(),
        }
    }

    /// Releases the handle. A forced release evicts the object right away if no other handle holds it.
    pub fn release(self, force: bool) {
        if force {
            self.retained.force.store(true, Ordering::Release);
        }
    }

    /// Passes the object to `f` and releases the handle afterwards, also if `f` panics.
    pub fn consume<R>(self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.object)
    }
}

impl<T: StorableObject> Deref for CachedObject<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.object
    }
}

impl<T: StorableObject> Clone for CachedObject<T> {
    fn clone(&self) -> Self {
        self.retain()
    }
}

impl<T: StorableObject + fmt::Debug> fmt::Debug for CachedObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CachedObject").field(&self.object).finish()
    }
}
