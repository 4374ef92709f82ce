// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon-level errors mapped onto the closed error taxonomy.

use amon_core::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("chat_id is required when scope is \"chat\"")]
    MissingChatId,

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("storage error: {0}")]
    Storage(#[from] amon_storage::StorageError),

    #[error("runtime error: {0}")]
    Runtime(#[from] amon_runtime::RuntimeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl DaemonError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DaemonError::MissingChatId => ErrorKind::MissingChatId,
            DaemonError::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
            DaemonError::Storage(_) | DaemonError::Io(_) => ErrorKind::IoError,
            DaemonError::Runtime(e) => e.kind(),
            DaemonError::ProjectNotFound(_)
            | DaemonError::RunNotFound(_)
            | DaemonError::Protocol(_) => ErrorKind::ProtocolError,
        }
    }
}
