// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! amon: CLI for the Amon agent platform.

mod commands;
mod exit_error;

use clap::{Parser, Subcommand};
use exit_error::{report, ExitError};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "amon", version, about = "Local agent platform")]
struct Cli {
    /// Data directory override (defaults to $AMON_HOME, then $AMON_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon and the chat UI server
    Ui {
        /// Port to bind on localhost
        #[arg(long, default_value_t = 8787)]
        port: u16,
    },

    /// Run a one-shot prompt against a project
    Run {
        /// The prompt to run
        prompt: String,
        /// Project to run in (created if missing)
        #[arg(long, default_value = "default")]
        project: String,
        /// Graph mode (single | self_critique | team)
        #[arg(long)]
        mode: Option<String>,
    },

    /// Sandbox operations
    Sandbox {
        #[command(subcommand)]
        command: commands::sandbox::SandboxCommand,
    },

    /// Manage locally forged tools
    Toolforge {
        #[command(subcommand)]
        command: commands::toolforge::ToolforgeCommand,
    },

    /// Tool registry queries
    Tools {
        #[command(subcommand)]
        command: commands::tools::ToolsCommand,
    },
}

fn data_dir(cli_override: Option<PathBuf>) -> amon_core::DataDir {
    match cli_override {
        Some(path) => amon_core::DataDir::new(path),
        None => amon_core::DataDir::from_env_or(
            dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("amon"),
        ),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let data = data_dir(cli.data_dir);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let result: Result<(), ExitError> = match cli.command {
        Command::Ui { port } => commands::ui::run(data, port),
        Command::Run { prompt, project, mode } => commands::run::run(data, project, prompt, mode),
        Command::Sandbox { command } => commands::sandbox::run(data, command),
        Command::Toolforge { command } => commands::toolforge::run(data, command),
        Command::Tools { command } => commands::tools::run(data, command),
    };
    report(result)
}
