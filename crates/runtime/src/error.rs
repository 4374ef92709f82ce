// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime-level errors (distinct from node-local failures, which retry).

use amon_core::ErrorKind;

/// Errors that abort a run rather than a node.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("storage error: {0}")]
    Storage(#[from] amon_storage::StorageError),

    #[error("vault error: {0}")]
    Vault(#[from] amon_policy::VaultError),

    #[error("graph error: {0}")]
    Graph(#[from] amon_core::GraphError),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("run is not awaiting confirmation: {0}")]
    NotPending(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::Storage(_) | RuntimeError::Io(_) | RuntimeError::Vault(_) => {
                ErrorKind::IoError
            }
            RuntimeError::Graph(_) => ErrorKind::ConfigInvalid,
            RuntimeError::RunNotFound(_) | RuntimeError::NotPending(_) => ErrorKind::ProtocolError,
        }
    }
}
