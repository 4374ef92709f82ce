// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration snapshot types.
//!
//! Loaded from `<data>/config.yaml` (global) and `amon.project.yaml`
//! (per project). Precedence is CLI > project > global > default. Configs
//! are read-copy-on-update: readers hold an `Arc` snapshot and a reload
//! publishes a whole new snapshot atomically.

use serde::{Deserialize, Serialize};

/// Global configuration (`<data>/config.yaml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AmonConfig {
    pub runtime: RuntimeConfig,
    pub budget: BudgetConfig,
    pub bus: BusConfig,
    pub stream: StreamConfig,
    pub trash_retain_days: u32,
}

impl AmonConfig {
    pub fn with_defaults() -> Self {
        Self { trash_retain_days: 30, ..Self::default() }
    }
}

/// Graph runtime knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_parallel_nodes: usize,
    pub max_parallel_runs: usize,
    pub cancel_grace_s: u64,
    pub map_max_children: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { max_parallel_nodes: 4, max_parallel_runs: 2, cancel_grace_s: 5, map_max_children: 16 }
    }
}

/// LLM budget gating. `None` means unlimited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BudgetConfig {
    pub daily_budget: Option<f64>,
    pub per_project_budget: Option<f64>,
}

/// EventBus knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub buffer: usize,
    pub dedupe_window_s: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { buffer: 1024, dedupe_window_s: 30 }
    }
}

/// StreamBroker knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// How far back a client may resume with `Last-Event-ID` before it gets
    /// a lost-events notice instead.
    pub recovery_window: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { recovery_window: 10_000 }
    }
}

/// Tool decision lists for the policy gate. Entries are literal tool names
/// or glob patterns; precedence is deny > ask > allow, unmatched is deny.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PolicyLists {
    pub deny: Vec<String>,
    pub ask: Vec<String>,
    pub allow: Vec<String>,
}

/// Per-project configuration (`amon.project.yaml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
    /// Path prefixes (relative to the project root) that tool calls and
    /// writes may touch. `.amon/runs/<run_id>/` is added per run.
    pub allowed_prefixes: Vec<String>,
    /// Daily cost ceiling for automation-triggered LLM runs. Zero blocks
    /// all automated model calls.
    pub automation_budget_daily: f64,
    pub policy: PolicyLists,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            allowed_prefixes: default_allowed_prefixes(),
            automation_budget_daily: 0.0,
            policy: PolicyLists::default(),
        }
    }
}

pub fn default_allowed_prefixes() -> Vec<String> {
    vec!["workspace/".to_string(), "docs/".to_string(), "audits/".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = AmonConfig::with_defaults();
        assert_eq!(cfg.runtime.max_parallel_nodes, 4);
        assert_eq!(cfg.runtime.max_parallel_runs, 2);
        assert_eq!(cfg.runtime.cancel_grace_s, 5);
        assert_eq!(cfg.bus.buffer, 1024);
        assert_eq!(cfg.bus.dedupe_window_s, 30);
        assert_eq!(cfg.stream.recovery_window, 10_000);
        assert_eq!(cfg.trash_retain_days, 30);
    }

    #[test]
    fn project_defaults() {
        let cfg = ProjectConfig::default();
        assert_eq!(cfg.automation_budget_daily, 0.0);
        assert_eq!(cfg.allowed_prefixes, vec!["workspace/", "docs/", "audits/"]);
    }

    #[test]
    fn partial_config_fills_defaults() {
        // serde(default) lets sparse YAML/JSON override only what it names.
        let cfg: AmonConfig =
            serde_json::from_str(r#"{"runtime": {"max_parallel_nodes": 8}}"#).unwrap();
        assert_eq!(cfg.runtime.max_parallel_nodes, 8);
        assert_eq!(cfg.runtime.max_parallel_runs, 2);
    }
}
