// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Module that contains the white-flag confirmation of milestones.
//!
//! White-flag ordering walks the past cone of a milestone depth first, parents before children, and applies every
//! transaction in that order. Conflicting transactions are referenced but excluded from the ledger, so the outcome
//! only depends on the cone and the ledger state.

mod confirmation;
mod error;
mod merkle;
mod mutations;
mod validator;

pub use self::{
    confirmation::{confirm_milestone, ConfirmedMilestoneStats},
    error::{ConfirmationError, CriticalError},
    merkle::MerkleHasher,
    mutations::{compute_white_flag_mutations, WhiteFlagMutations},
    validator::{DefaultTransactionValidator, TransactionValidator},
};
