// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `amon toolforge …`: manage the local tool manifest registry.
//!
//! Forged tools live as entries in `<data>/cache/mcp_registry.json`:
//! name, risk, a manifest digest pinned at install time, and an enabled
//! flag. `verify` recomputes digests so a tampered manifest is caught
//! before the policy gate ever sees the tool.

use crate::exit_error::ExitError;
use amon_core::{DataDir, Risk};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum ToolforgeCommand {
    /// Create an empty registry
    Init,
    /// Install a tool from a manifest file
    Install {
        /// Path to the tool manifest (JSON)
        manifest: PathBuf,
    },
    /// Verify installed manifests against their pinned digests
    Verify,
    /// Disable a tool and mark it revoked
    Revoke { name: String },
    /// Re-enable a revoked tool
    Enable { name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ToolEntry {
    name: String,
    #[serde(default)]
    risk: Risk,
    manifest_path: PathBuf,
    manifest_sha256: String,
    enabled: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Registry {
    #[serde(default)]
    tools: Vec<ToolEntry>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    name: String,
    #[serde(default)]
    risk: Risk,
}

fn load_registry(data: &DataDir) -> Result<Registry, ExitError> {
    match std::fs::read(data.mcp_registry()) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| ExitError::operational(format!("corrupt registry: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Registry::default()),
        Err(e) => Err(e.into()),
    }
}

fn save_registry(data: &DataDir, registry: &Registry) -> Result<(), ExitError> {
    std::fs::create_dir_all(data.cache_dir())?;
    let bytes = serde_json::to_vec_pretty(registry)
        .map_err(|e| ExitError::operational(e.to_string()))?;
    std::fs::write(data.mcp_registry(), bytes)?;
    Ok(())
}

fn digest_file(path: &PathBuf) -> Result<String, ExitError> {
    let bytes = std::fs::read(path)
        .map_err(|e| ExitError::operational(format!("{}: {e}", path.display())))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

pub fn run(data: DataDir, command: ToolforgeCommand) -> Result<(), ExitError> {
    match command {
        ToolforgeCommand::Init => {
            if data.mcp_registry().exists() {
                return Err(ExitError::validation("registry already exists"));
            }
            save_registry(&data, &Registry::default())?;
            println!("initialized {}", data.mcp_registry().display());
            Ok(())
        }
        ToolforgeCommand::Install { manifest } => {
            let text = std::fs::read_to_string(&manifest)
                .map_err(|e| ExitError::validation(format!("{}: {e}", manifest.display())))?;
            let parsed: Manifest = serde_json::from_str(&text)
                .map_err(|e| ExitError::validation(format!("invalid manifest: {e}")))?;

            let mut registry = load_registry(&data)?;
            if registry.tools.iter().any(|t| t.name == parsed.name) {
                return Err(ExitError::validation(format!(
                    "tool already installed: {}",
                    parsed.name
                )));
            }
            let entry = ToolEntry {
                name: parsed.name.clone(),
                risk: parsed.risk,
                manifest_sha256: digest_file(&manifest)?,
                manifest_path: manifest,
                enabled: true,
            };
            registry.tools.push(entry);
            save_registry(&data, &registry)?;
            println!("installed {}", parsed.name);
            Ok(())
        }
        ToolforgeCommand::Verify => {
            let registry = load_registry(&data)?;
            let mut failures = 0;
            for tool in &registry.tools {
                match digest_file(&tool.manifest_path) {
                    Ok(digest) if digest == tool.manifest_sha256 => {
                        println!("{}: ok", tool.name);
                    }
                    Ok(_) => {
                        println!("{}: digest mismatch", tool.name);
                        failures += 1;
                    }
                    Err(_) => {
                        println!("{}: manifest missing", tool.name);
                        failures += 1;
                    }
                }
            }
            if failures > 0 {
                return Err(ExitError::operational(format!("{failures} tool(s) failed verification")));
            }
            Ok(())
        }
        ToolforgeCommand::Revoke { name } => set_enabled(&data, &name, false),
        ToolforgeCommand::Enable { name } => set_enabled(&data, &name, true),
    }
}

fn set_enabled(data: &DataDir, name: &str, enabled: bool) -> Result<(), ExitError> {
    let mut registry = load_registry(data)?;
    let tool = registry
        .tools
        .iter_mut()
        .find(|t| t.name == name)
        .ok_or_else(|| ExitError::validation(format!("unknown tool: {name}")))?;
    tool.enabled = enabled;
    save_registry(data, &registry)?;
    println!("{name}: {}", if enabled { "enabled" } else { "revoked" });
    Ok(())
}
