// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::ops::Deref;

use serde::{Deserialize, Serialize};

use super::{BlockError, BlockId};

/// The parents of a block: between one and eight distinct block ids in ascending order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<BlockId>", into = "Vec<BlockId>")]
pub struct Parents(Box<[BlockId]>);

impl Parents {
    pub const MIN: usize = 1;
    pub const MAX: usize = 8;

    /// Sorts and deduplicates the given ids.
    pub fn new(ids: impl IntoIterator<Item = BlockId>) -> Result<Self, BlockError> {
        let mut ids = ids.into_iter().collect::<Vec<_>>();
        ids.sort_unstable();
        ids.dedup();
        if !(Self::MIN..=Self::MAX).contains(&ids.len()) {
            return Err(BlockError::InvalidParentCount(ids.len()));
        }
        Ok(Self(ids.into_boxed_slice()))
    }

    pub fn to_vec(&self) -> Vec<BlockId> {
        self.0.to_vec()
    }
}

impl Deref for Parents {
    type Target = [BlockId];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<Vec<BlockId>> for Parents {
    type Error = BlockError;

    fn try_from(value: Vec<BlockId>) -> Result<Self, Self::Error> {
        let parents = Self::new(value.iter().copied())?;
        // Only canonical encodings are accepted on the way in.
        if parents.len() != value.len() || parents.iter().zip(&value).any(|(a, b)| a != b) {
            return Err(BlockError::UnsortedParents);
        }
        Ok(parents)
    }
}

impl From<Parents> for Vec<BlockId> {
    fn from(value: Parents) -> Self {
        value.0.into_vec()
    }
}
