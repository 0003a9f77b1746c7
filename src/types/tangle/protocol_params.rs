// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// Protocol parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParameters {
    pub version: u8,
    pub network_name: String,
    /// The maximum allowed delta between the oldest cone root index of a tip and the confirmed milestone index.
    pub below_max_depth: u32,
    pub token_supply: u64,
}

impl Default for ProtocolParameters {
    fn default() -> Self {
        Self {
            version: 2,
            network_name: "weave-testnet".to_string(),
            below_max_depth: 15,
            token_supply: 2_779_530_283_277_761,
        }
    }
}

impl ProtocolParameters {
    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
