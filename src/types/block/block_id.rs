// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::BlockError;

/// The identifier of a block: the Blake2b-256 digest of its serialized form.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub [u8; Self::LENGTH]);

impl BlockId {
    pub const LENGTH: usize = 32;

    pub fn from_slice(bytes: &[u8]) -> Result<Self, BlockError> {
        <[u8; Self::LENGTH]>::try_from(bytes)
            .map(Self)
            .map_err(|_| BlockError::InvalidLength {
                expected: Self::LENGTH,
                actual: bytes.len(),
            })
    }

    pub fn to_hex(&self) -> String {
        prefix_hex::encode(self.0.as_ref())
    }
}

impl AsRef<[u8]> for BlockId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BlockId({})", self.to_hex())
    }
}

impl FromStr for BlockId {
    type Err = BlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        prefix_hex::decode::<[u8; Self::LENGTH]>(s)
            .map(Self)
            .map_err(|e| BlockError::InvalidHex(format!("{e:?}")))
    }
}
