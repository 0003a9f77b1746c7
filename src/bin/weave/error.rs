// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;
use weave::{db::StorageError, ledger::LedgerError, tangle::TangleError, types::block::BlockError};

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Tangle(#[from] TangleError),
    #[error("invalid solid entry point '{0}': {1}")]
    EntryPoint(String, BlockError),
    #[error("failed to listen for shutdown signals: {0}")]
    Signal(#[from] std::io::Error),
}
