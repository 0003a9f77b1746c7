// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_DELTA_YCRI_TO_CMI: u32 = 8;
pub const DEFAULT_MAX_DELTA_OCRI_TO_CMI: u32 = 13;
pub const DEFAULT_SYNC_THRESHOLD: u32 = 2;
pub const DEFAULT_WHITE_FLAG_PARENTS_SOLID_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_SOLID_ENTRY_POINT_PARALLELISM: usize = 4;
pub const DEFAULT_SOLID_ENTRY_POINT_CHECK_THRESHOLD_PAST: u32 = 50;

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TangleConfig {
    /// A tip whose youngest cone root index lags further behind the confirmed milestone is lazy.
    pub max_delta_block_youngest_cone_root_index_to_cmi: u32,
    /// A tip whose oldest cone root index lags further behind the confirmed milestone is semi-lazy.
    pub max_delta_block_oldest_cone_root_index_to_cmi: u32,
    /// The number of milestones the node may lag behind and still count as almost synced.
    pub sync_threshold: u32,
    #[serde(with = "humantime_serde")]
    pub white_flag_parents_solid_timeout: Duration,
    pub solid_entry_point_parallelism: usize,
    pub solid_entry_point_check_threshold_past: u32,
}

impl Default for TangleConfig {
    fn default() -> Self {
        Self {
            max_delta_block_youngest_cone_root_index_to_cmi: DEFAULT_MAX_DELTA_YCRI_TO_CMI,
            max_delta_block_oldest_cone_root_index_to_cmi: DEFAULT_MAX_DELTA_OCRI_TO_CMI,
            sync_threshold: DEFAULT_SYNC_THRESHOLD,
            white_flag_parents_solid_timeout: DEFAULT_WHITE_FLAG_PARENTS_SOLID_TIMEOUT,
            solid_entry_point_parallelism: DEFAULT_SOLID_ENTRY_POINT_PARALLELISM,
            solid_entry_point_check_threshold_past: DEFAULT_SOLID_ENTRY_POINT_CHECK_THRESHOLD_PAST,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config = toml::from_str::<TangleConfig>(
            r#"
                sync_threshold = 5
                white_flag_parents_solid_timeout = "500ms"
            "#,
        )
        .unwrap();
        assert_eq!(config.sync_threshold, 5);
        assert_eq!(config.white_flag_parents_solid_timeout, Duration::from_millis(500));
        assert_eq!(
            config.max_delta_block_oldest_cone_root_index_to_cmi,
            DEFAULT_MAX_DELTA_OCRI_TO_CMI
        );
    }
}
