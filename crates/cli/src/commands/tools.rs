// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `amon tools mcp-list`: show the tool registry.

use crate::exit_error::ExitError;
use amon_core::DataDir;
use clap::Subcommand;
use serde_json::Value;

#[derive(Subcommand)]
pub enum ToolsCommand {
    /// List registered MCP tools
    McpList {
        /// Re-read manifests and refresh the cached registry view
        #[arg(long)]
        refresh: bool,
    },
}

pub fn run(data: DataDir, command: ToolsCommand) -> Result<(), ExitError> {
    match command {
        ToolsCommand::McpList { refresh } => {
            let registry: Value = match std::fs::read(data.mcp_registry()) {
                Ok(bytes) => serde_json::from_slice(&bytes)
                    .map_err(|e| ExitError::operational(format!("corrupt registry: {e}")))?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    println!("no tools registered (run `amon toolforge init`)");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let Some(tools) = registry.get("tools").and_then(|t| t.as_array()) else {
                println!("no tools registered");
                return Ok(());
            };
            for tool in tools {
                let name = tool["name"].as_str().unwrap_or("?");
                let risk = tool["risk"].as_str().unwrap_or("low");
                let enabled = tool["enabled"].as_bool().unwrap_or(false);
                let status = if refresh {
                    // Refresh re-checks the manifest on disk.
                    let path = tool["manifest_path"].as_str().unwrap_or_default();
                    if std::path::Path::new(path).is_file() { "ok" } else { "missing" }
                } else if enabled {
                    "enabled"
                } else {
                    "revoked"
                };
                println!("{name}\trisk={risk}\t{status}");
            }
            Ok(())
        }
    }
}
