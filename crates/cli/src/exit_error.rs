// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exit-code discipline: 0 success, 2 validation error, 1 operational.

use std::process::ExitCode;

/// An error that knows its exit code.
#[derive(Debug)]
pub struct ExitError {
    pub code: u8,
    pub message: String,
}

impl ExitError {
    /// Bad arguments or malformed input (exit 2).
    pub fn validation(message: impl Into<String>) -> Self {
        Self { code: 2, message: message.into() }
    }

    /// Something failed while doing the work (exit 1).
    pub fn operational(message: impl Into<String>) -> Self {
        Self { code: 1, message: message.into() }
    }
}

impl std::fmt::Display for ExitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ExitError {}

impl From<amon_daemon::DaemonError> for ExitError {
    fn from(e: amon_daemon::DaemonError) -> Self {
        match e {
            amon_daemon::DaemonError::MissingChatId
            | amon_daemon::DaemonError::ConfigInvalid(_) => Self::validation(e.to_string()),
            other => Self::operational(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ExitError {
    fn from(e: std::io::Error) -> Self {
        Self::operational(e.to_string())
    }
}

/// Print the error and convert to the process exit code.
pub fn report(result: Result<(), ExitError>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("amon: {}", e.message);
            ExitCode::from(e.code)
        }
    }
}
