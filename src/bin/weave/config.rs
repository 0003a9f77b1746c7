// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use weave::{
    storage::CacheConfig,
    tangle::TangleConfig,
    types::tangle::{MilestoneIndex, ProtocolParameters},
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config at '{0}': {1}")]
    FileRead(String, std::io::Error),
    #[error("toml deserialization failed: {0}")]
    TomlDeserialization(toml::de::Error),
}

/// The state the node starts from.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnapshotConfig {
    /// The milestone index the ledger and the entry points belong to.
    pub index: MilestoneIndex,
    /// Hex encoded ids of the solid entry points.
    pub entry_points: Vec<String>,
    pub protocol: ProtocolParameters,
}

/// Configuration of the node.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaveConfig {
    pub cache: CacheConfig,
    pub tangle: TangleConfig,
    pub snapshot: SnapshotConfig,
}

impl WeaveConfig {
    /// Reads the config from the file located at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        fs::read_to_string(&path)
            .map_err(|e| ConfigError::FileRead(path.as_ref().display().to_string(), e))
            .and_then(|contents| toml::from_str::<Self>(&contents).map_err(ConfigError::TomlDeserialization))
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[test]
    fn config_file_conformity() -> Result<(), ConfigError> {
        let config = WeaveConfig::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/config.template.toml"))?;
        assert_eq!(config.cache.flush_interval, Duration::from_secs(10));
        assert_eq!(config.snapshot.protocol.below_max_depth, 15);

        Ok(())
    }
}
