// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::{fmt, num::ParseIntError, ops, str::FromStr};

use derive_more::{Add, Deref, DerefMut, Sub};
use serde::{Deserialize, Serialize};

/// The index of a milestone. Index `0` is reserved for "no milestone".
#[derive(
    Clone,
    Copy,
    PartialOrd,
    Ord,
    PartialEq,
    Eq,
    Hash,
    Debug,
    Default,
    Serialize,
    Deserialize,
    Add,
    Sub,
    Deref,
    DerefMut,
)]
#[serde(transparent)]
pub struct MilestoneIndex(pub u32);

impl MilestoneIndex {
    /// The largest representable index, used as the neutral element when folding minimums.
    pub const MAX: Self = Self(u32::MAX);

    /// Returns `self - rhs`, or zero if `rhs` is larger.
    pub fn saturating_sub(self, rhs: impl Into<MilestoneIndex>) -> u32 {
        self.0.saturating_sub(rhs.into().0)
    }

    /// Big-endian encoding, so that keys sort in index order.
    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for MilestoneIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for MilestoneIndex {
    fn from(index: u32) -> Self {
        Self(index)
    }
}

impl From<MilestoneIndex> for u32 {
    fn from(MilestoneIndex(index): MilestoneIndex) -> Self {
        index
    }
}

macro_rules! impl_u32_ops {
    ($($op:ident :: $f:ident),*) => {$(
        impl ops::$op<u32> for MilestoneIndex {
            type Output = Self;

            fn $f(self, rhs: u32) -> Self {
                Self(ops::$op::$f(self.0, rhs))
            }
        }
    )*};
}

impl_u32_ops!(Add::add, Sub::sub);

impl ops::AddAssign<u32> for MilestoneIndex {
    fn add_assign(&mut self, rhs: u32) {
        *self = *self + rhs;
    }
}

impl PartialEq<u32> for MilestoneIndex {
    fn eq(&self, rhs: &u32) -> bool {
        self.0.eq(rhs)
    }
}

impl PartialEq<MilestoneIndex> for u32 {
    fn eq(&self, rhs: &MilestoneIndex) -> bool {
        rhs == self
    }
}

impl PartialOrd<u32> for MilestoneIndex {
    fn partial_cmp(&self, rhs: &u32) -> Option<std::cmp::Ordering> {
        Some(self.0.cmp(rhs))
    }
}

impl FromStr for MilestoneIndex {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u32>().map(Self)
    }
}
