// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `Tool` capability: named invocations with JSON arguments.

use amon_core::Risk;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Errors from tool adapters.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("tool failed: {0}")]
    Failed(String),

    #[error("tool call cancelled")]
    Cancelled,
}

/// A callable tool (MCP-backed in production).
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Manifest-declared risk; high-risk tools are demoted to `ask` by the
    /// policy gate even when allow-listed.
    fn risk(&self) -> Risk {
        Risk::Low
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolError>;
}

/// Name → tool lookup handed to the runtime.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}
