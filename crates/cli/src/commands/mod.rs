// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod run;
pub mod sandbox;
pub mod toolforge;
pub mod tools;
pub mod ui;

use crate::exit_error::ExitError;
use amon_adapters::{NullChatModel, ToolRegistry};
use amon_core::DataDir;
use amon_daemon::daemon::Daemon;
use amon_runtime::RuntimeDeps;
use std::sync::Arc;

/// Build an embedded daemon over the given data dir.
pub(crate) fn embedded_daemon(data: DataDir) -> Result<Arc<Daemon>, ExitError> {
    let deps = RuntimeDeps {
        model: Arc::new(NullChatModel),
        tools: ToolRegistry::new(),
        sandbox: None,
    };
    Ok(Daemon::new(data, deps)?)
}

/// Tokio runtime for commands that drive async work.
pub(crate) fn block_on<F: std::future::Future>(future: F) -> Result<F::Output, ExitError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| ExitError::operational(format!("runtime init failed: {e}")))?;
    Ok(runtime.block_on(future))
}
