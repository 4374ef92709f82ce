// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hook rules: event-matched automation with cooldowns and budgets.

use crate::daemon::Daemon;
use crate::error::DaemonError;
use crate::graphs;
use crate::orchestrator::dispatch_automation;
use amon_core::{DataDir, Event, EventKind, HookId, ProjectId, Trigger, TriggerKind};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a matched hook does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HookAction {
    /// Resolve a graph template and run it.
    GraphRun {
        template_id: String,
        #[serde(default)]
        vars: HashMap<String, String>,
    },
    /// Direct tool invocation; bypasses the LLM entirely.
    ToolCall {
        tool: String,
        #[serde(default)]
        args: serde_json::Value,
    },
}

/// One hook rule (`<data>/hooks/<hook_id>.yaml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookRule {
    pub id: HookId,
    pub project_id: ProjectId,
    /// Event type filter, literal or glob (`"doc.*"`).
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_glob: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size: Option<u64>,
    /// Actors whose events never fire this hook. `system` prevents
    /// self-trigger loops from the runtime's own writes.
    #[serde(default = "default_ignore_actors")]
    pub ignore_actors: Vec<String>,
    pub action: HookAction,
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
    /// Dedupe key template; `{path}` and `{type}` substitute from the
    /// triggering event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,
    /// High-risk rules run behind a confirm node.
    #[serde(default)]
    pub high_risk: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_ignore_actors() -> Vec<String> {
    vec!["system".to_string()]
}

fn default_cooldown() -> u64 {
    30
}

fn default_concurrency() -> usize {
    1
}

fn default_enabled() -> bool {
    true
}

impl HookRule {
    /// Does this rule match the event?
    pub fn matches(&self, event: &Event) -> bool {
        if !self.enabled {
            return false;
        }
        if event.project_id.as_ref() != Some(&self.project_id) {
            return false;
        }
        if self.ignore_actors.iter().any(|a| a == &event.actor) {
            return false;
        }
        if !glob_matches(&self.event_type, event.kind.as_str()) {
            return false;
        }
        if let Some(path_glob) = &self.path_glob {
            let Some(path) = event.payload.get("path").and_then(|p| p.as_str()) else {
                return false;
            };
            if !glob_matches(path_glob, path) {
                return false;
            }
        }
        if let Some(min_size) = self.min_size {
            let size = event.payload.get("size").and_then(|s| s.as_u64()).unwrap_or(0);
            if size < min_size {
                return false;
            }
        }
        true
    }

    /// Render the dedupe key template against the event.
    fn render_dedupe(&self, event: &Event) -> Option<String> {
        let template = self.dedupe_key.as_deref()?;
        let path = event.payload.get("path").and_then(|p| p.as_str()).unwrap_or_default();
        Some(
            template
                .replace("{path}", path)
                .replace("{type}", event.kind.as_str())
                .replace("{hook}", self.id.as_str()),
        )
    }
}

fn glob_matches(pattern: &str, value: &str) -> bool {
    if pattern == value {
        return true;
    }
    glob::Pattern::new(pattern).map(|p| p.matches(value)).unwrap_or(false)
}

/// Load every rule file under `<data>/hooks/`.
pub fn load_rules(data: &DataDir) -> Result<Vec<HookRule>, DaemonError> {
    let dir = data.hooks_dir();
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut rules = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let text = std::fs::read_to_string(&path)?;
        let rule: HookRule = serde_yaml::from_str(&text)
            .map_err(|e| DaemonError::ConfigInvalid(format!("{}: {e}", path.display())))?;
        rules.push(rule);
    }
    rules.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
    Ok(rules)
}

struct FireState {
    last_fired: Instant,
}

/// Matches bus events against hook rules and dispatches runs.
pub struct HookEngine {
    daemon: Arc<Daemon>,
    rules: Mutex<Vec<HookRule>>,
    cooldowns: Mutex<HashMap<String, FireState>>,
    in_flight: Arc<Mutex<HashMap<HookId, usize>>>,
}

impl HookEngine {
    pub fn new(daemon: Arc<Daemon>, rules: Vec<HookRule>) -> Self {
        Self {
            daemon,
            rules: Mutex::new(rules),
            cooldowns: Mutex::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn replace_rules(&self, rules: Vec<HookRule>) {
        *self.rules.lock() = rules;
    }

    /// Evaluate one event against all rules.
    pub fn on_event(&self, event: &Event) {
        let rules: Vec<HookRule> =
            self.rules.lock().iter().filter(|r| r.matches(event)).cloned().collect();
        for rule in rules {
            self.fire(&rule, event);
        }
    }

    fn fire(&self, rule: &HookRule, event: &Event) {
        let cooldown_key =
            rule.render_dedupe(event).unwrap_or_else(|| rule.id.to_string());

        // Storm control: cooldown per dedupe key, then concurrency cap.
        {
            let mut cooldowns = self.cooldowns.lock();
            let now = Instant::now();
            if let Some(state) = cooldowns.get(&cooldown_key) {
                if now - state.last_fired < Duration::from_secs(rule.cooldown_seconds) {
                    self.emit_suppressed(rule, "cooldown");
                    return;
                }
            }
            cooldowns.insert(cooldown_key.clone(), FireState { last_fired: now });
        }
        {
            let in_flight = self.in_flight.lock();
            if in_flight.get(&rule.id).copied().unwrap_or(0) >= rule.max_concurrency {
                self.emit_suppressed(rule, "max_concurrency");
                return;
            }
        }

        let (graph, allow_llm) = match &rule.action {
            HookAction::GraphRun { template_id, vars } => {
                let mut vars = vars.clone();
                if let Some(path) = event.payload.get("path").and_then(|p| p.as_str()) {
                    vars.entry("path".to_string()).or_insert_with(|| path.to_string());
                }
                (graphs::template(template_id, &vars), true)
            }
            HookAction::ToolCall { tool, args } => (graphs::tool_call(tool, args.clone()), false),
        };

        // LLM-needing rules are rejected at dispatch when the automation
        // budget is already exhausted.
        if graph.nodes.iter().any(|n| n.kind.needs_llm()) {
            let budget = self
                .daemon
                .project_config(&rule.project_id)
                .map(|c| c.automation_budget_daily)
                .unwrap_or(0.0);
            if self
                .daemon
                .budget
                .check(&rule.project_id, TriggerKind::Hook, budget, chrono::Utc::now())
                .is_err()
            {
                self.daemon.emit_project(
                    &rule.project_id,
                    Event::new(EventKind::PolicyLlmBlocked)
                        .payload(serde_json::json!({"hook": rule.id, "budget": budget})),
                );
                return;
            }
        }

        let graph =
            if rule.high_risk { graphs::with_confirmation(graph, rule.id.as_str()) } else { graph };

        let mut fired = Event::new(EventKind::HookFired)
            .source(amon_core::EventSource::Hook)
            .payload(serde_json::json!({"hook": rule.id, "event": event.kind.as_str()}));
        fired.dedupe_key = rule.render_dedupe(event);
        self.daemon.emit_project(&rule.project_id, fired);

        let trigger = {
            let mut t = Trigger::new(TriggerKind::Hook, rule.id.as_str());
            t.event_id = Some(event.event_id);
            t
        };
        match dispatch_automation(&self.daemon, rule.project_id, graph, trigger, allow_llm) {
            Ok((run_id, handle)) => {
                tracing::info!(hook = %rule.id, run = %run_id, "hook dispatched run");
                *self.in_flight.lock().entry(rule.id).or_insert(0) += 1;
                let in_flight = Arc::clone(&self.in_flight);
                let hook_id = rule.id;
                tokio::spawn(async move {
                    let _ = handle.await;
                    let mut guard = in_flight.lock();
                    if let Some(count) = guard.get_mut(&hook_id) {
                        *count = count.saturating_sub(1);
                    }
                });
            }
            Err(e) => {
                tracing::error!(hook = %rule.id, error = %e, "hook dispatch failed");
            }
        }
    }

    fn emit_suppressed(&self, rule: &HookRule, reason: &str) {
        tracing::debug!(hook = %rule.id, reason, "hook suppressed");
        self.daemon.emit_project(
            &rule.project_id,
            Event::new(EventKind::HookSuppressed)
                .payload(serde_json::json!({"hook": rule.id, "reason": reason})),
        );
    }
}

/// Bus pump: feeds file/doc/job events into the hook engine until the
/// token cancels.
pub async fn pump(engine: Arc<HookEngine>, cancel: tokio_util::sync::CancellationToken) {
    let sub = engine.daemon.bus.subscribe(|e| {
        matches!(e.kind.family(), "doc" | "workspace" | "job" | "schedule" | "tool")
    });
    loop {
        tokio::select! {
            event = sub.recv() => engine.on_event(&event),
            _ = cancel.cancelled() => return,
        }
    }
}

#[cfg(test)]
#[path = "hooks_tests.rs"]
mod tests;
