// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// How a referenced block affected the ledger. Derived from the metadata flags.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerInclusionState {
    /// The transaction was referenced but excluded, see the conflict reason.
    Conflicting,
    /// The transaction was applied.
    Included,
    NoTransaction,
}
