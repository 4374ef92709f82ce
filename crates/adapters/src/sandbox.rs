// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `SandboxRunner` capability.
//!
//! Sandbox execution packs declared inputs, runs the command in the
//! external sandbox service, and unpacks outputs. The transport (HTTP,
//! authenticated via `SANDBOX_RUNNER_API_KEY`) lives with the adapter
//! implementation; the runtime only sees this seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Errors from sandbox adapters.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("sandbox transport error: {0}")]
    Transport(String),

    #[error("sandbox rejected request: {0}")]
    Rejected(String),

    #[error("sandbox run cancelled")]
    Cancelled,
}

/// One sandboxed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxRequest {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Project-relative files shipped into the sandbox.
    #[serde(default)]
    pub input_paths: Vec<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Result persisted to `.amon/runs/<run_id>/sandbox/result.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Output files returned by the sandbox, path → contents.
    #[serde(default)]
    pub outputs: HashMap<String, String>,
}

impl SandboxResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait SandboxRunner: Send + Sync {
    async fn exec(&self, request: SandboxRequest) -> Result<SandboxResult, SandboxError>;
}
