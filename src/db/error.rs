// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

use crate::types::block::BlockError;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("key-value store failure: {0}")]
    Store(String),
    #[error("failed to decode {kind} record: {source}")]
    Decode { kind: &'static str, source: BlockError },
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("the database is marked as corrupted")]
    Corrupted,
    #[error("attempted to update immutable {0}")]
    ImmutableObject(&'static str),
}

impl StorageError {
    pub(crate) fn decode(kind: &'static str) -> impl FnOnce(BlockError) -> Self {
        move |source| Self::Decode { kind, source }
    }
}
