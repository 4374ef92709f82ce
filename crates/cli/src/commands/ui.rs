// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `amon ui --port`: run the daemon with the HTTP surface.

use super::{block_on, embedded_daemon};
use crate::exit_error::ExitError;
use amon_core::DataDir;
use amon_daemon::{http, jobs};
use std::sync::Arc;

pub fn run(data: DataDir, port: u16) -> Result<(), ExitError> {
    block_on(async move {
        let daemon = embedded_daemon(data)?;
        let background = jobs::start_background(&daemon)
            .map_err(|e| ExitError::operational(e.to_string()))?;

        println!("amon ui listening on http://127.0.0.1:{port}");
        let cancel = background.cancel.clone();
        let serve = tokio::spawn(http::serve(Arc::clone(&daemon), port, cancel));

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| ExitError::operational(format!("signal handler: {e}")))?;
        background.shutdown().await;
        match serve.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ExitError::operational(e.to_string())),
            Err(e) => Err(ExitError::operational(e.to_string())),
        }
    })?
}
