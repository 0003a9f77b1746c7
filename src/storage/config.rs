// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(60);
pub const DEFAULT_MILESTONES_CACHE_TIME: Duration = Duration::from_secs(600);
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration of a single object cache.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObjectCacheConfig {
    /// How long a released object stays in memory. Zero evicts on release.
    #[serde(with = "humantime_serde")]
    pub cache_time: Duration,
}

impl ObjectCacheConfig {
    pub const fn new(cache_time: Duration) -> Self {
        Self { cache_time }
    }
}

impl Default for ObjectCacheConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TIME)
    }
}

/// Configuration of the object caches.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub blocks: ObjectCacheConfig,
    pub metadata: ObjectCacheConfig,
    pub milestones: ObjectCacheConfig,
    /// The interval at which modified objects are written back to the store.
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
}

impl CacheConfig {
    /// A configuration that evicts objects as soon as they are released.
    pub fn no_caching() -> Self {
        let none = ObjectCacheConfig::new(Duration::ZERO);
        Self {
            blocks: none,
            metadata: none,
            milestones: none,
            ..Default::default()
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            blocks: ObjectCacheConfig::default(),
            metadata: ObjectCacheConfig::default(),
            milestones: ObjectCacheConfig::new(DEFAULT_MILESTONES_CACHE_TIME),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}
