// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Module containing types related to the tangle.

mod milestone;
mod milestone_index;
mod protocol_params;

pub use self::{milestone::Milestone, milestone_index::MilestoneIndex, protocol_params::ProtocolParameters};
