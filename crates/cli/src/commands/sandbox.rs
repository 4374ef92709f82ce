// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `amon sandbox exec`: submit a command to the sandbox runner.

use crate::exit_error::ExitError;
use amon_core::DataDir;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum SandboxCommand {
    /// Execute a command in the sandbox runner
    Exec {
        /// Command to run
        command: String,
        /// Arguments
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
}

pub fn run(_data: DataDir, command: SandboxCommand) -> Result<(), ExitError> {
    match command {
        SandboxCommand::Exec { command, .. } => {
            if command.trim().is_empty() {
                return Err(ExitError::validation("command must not be empty"));
            }
            // The sandbox transport authenticates with SANDBOX_RUNNER_API_KEY
            // and is provided by the embedding installation.
            if std::env::var("SANDBOX_RUNNER_API_KEY").is_err() {
                return Err(ExitError::operational(
                    "sandbox runner not configured (set SANDBOX_RUNNER_API_KEY)",
                ));
            }
            Err(ExitError::operational(
                "no sandbox runner adapter registered in this installation",
            ))
        }
    }
}
