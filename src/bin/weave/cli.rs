// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;

use crate::config::{ConfigError, WeaveConfig};

/// A tangle node that solidifies and confirms milestones.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct ClArgs {
    /// The location of the configuration file.
    #[arg(short, long, env = "CONFIG_PATH")]
    pub config: Option<String>,
    /// The interval at which cached objects are written back, e.g. `10s`.
    #[arg(long = "cache.flush-interval", env = "CACHE_FLUSH_INTERVAL")]
    pub flush_interval: Option<humantime::Duration>,
    /// The number of milestones the node may lag behind and still count as almost synced.
    #[arg(long = "tangle.sync-threshold", env = "TANGLE_SYNC_THRESHOLD")]
    pub sync_threshold: Option<u32>,
    /// The number of workers used to compute solid entry points.
    #[arg(long = "tangle.sep-parallelism", env = "TANGLE_SEP_PARALLELISM")]
    pub solid_entry_point_parallelism: Option<usize>,
}

impl ClArgs {
    /// Get a config file with CLI args applied.
    pub fn get_config(&self) -> Result<WeaveConfig, ConfigError> {
        let mut config = self
            .config
            .as_ref()
            .map(WeaveConfig::from_file)
            .transpose()?
            .unwrap_or_default();

        if let Some(interval) = &self.flush_interval {
            config.cache.flush_interval = **interval;
        }
        if let Some(threshold) = self.sync_threshold {
            config.tangle.sync_threshold = threshold;
        }
        if let Some(parallelism) = self.solid_entry_point_parallelism {
            config.tangle.solid_entry_point_parallelism = parallelism.max(1);
        }

        Ok(config)
    }
}
