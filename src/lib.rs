// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! A tangle consistency engine.
//!
//! Blocks are kept in reference-counted object caches on top of an ordered key-value store. Traversals over the
//! block DAG decide which blocks are solid, which milestone confirms them, and how good a block is as a tip.
//! Confirmation applies the transactions of a milestone cone to the ledger in white-flag order.

/// Module that contains the key-value store abstraction.
pub mod db;
/// Module that contains the traversals over the block DAG.
pub mod dag;
/// Module that contains the unspent output ledger.
pub mod ledger;
/// Module that contains the object caches.
pub mod storage;
/// Module that contains solidification and confirmation of milestones.
pub mod tangle;
/// Module that contains the types.
pub mod types;
/// Module that contains white-flag confirmation.
pub mod whiteflag;
