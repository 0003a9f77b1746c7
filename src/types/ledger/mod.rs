// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Module containing the ledger data models.

mod block_metadata;
mod conflict_reason;
mod inclusion_state;
mod output;

pub use self::{block_metadata::*, conflict_reason::*, inclusion_state::*, output::*};
