// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Decision algebra for tool invocations and file writes.
//!
//! Precedence is deny > ask > allow; an unmatched tool is denied. A
//! decision is final for its invocation — callers must not retry a denial.

use crate::audit::{sha256_value, structural_preview, AuditEntry, AuditWriter};
use crate::vault::{PathVault, VaultError};
use amon_core::{ChatId, ErrorKind, EventSource, PolicyLists, ProjectId, Risk, RunId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// The three-way policy outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Ask,
    Deny,
}

amon_core::simple_display! {
    Decision {
        Allow => "allow",
        Ask => "ask",
        Deny => "deny",
    }
}

/// Full decision returned to the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub require_confirm: bool,
}

impl PolicyDecision {
    fn allow() -> Self {
        Self { decision: Decision::Allow, reason: None, require_confirm: false }
    }

    fn ask(reason: impl Into<String>) -> Self {
        Self { decision: Decision::Ask, reason: Some(reason.into()), require_confirm: true }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self { decision: Decision::Deny, reason: Some(reason.into()), require_confirm: false }
    }

    pub fn is_denied(&self) -> bool {
        self.decision == Decision::Deny
    }
}

/// Who is asking.
#[derive(Debug, Clone, PartialEq)]
pub struct Caller {
    pub project_id: ProjectId,
    pub run_id: Option<RunId>,
    pub chat_id: Option<ChatId>,
    pub source: EventSource,
}

impl Caller {
    pub fn new(project_id: ProjectId, source: EventSource) -> Self {
        Self { project_id, run_id: None, chat_id: None, source }
    }

    amon_core::setters! {
        option {
            run_id: RunId,
            chat_id: ChatId,
        }
    }
}

/// Argument keys treated as paths and canonicalized before any decision.
const PATH_ARG_KEYS: &[&str] = &["path", "file", "dir", "output_path", "target", "source"];

/// Computes decisions and writes the audit trail.
pub struct PolicyGate {
    lists: PolicyLists,
    vault: PathVault,
    allowed_prefixes: Vec<String>,
    audit: Arc<AuditWriter>,
}

impl PolicyGate {
    pub fn new(
        lists: PolicyLists,
        vault: PathVault,
        allowed_prefixes: Vec<String>,
        audit: Arc<AuditWriter>,
    ) -> Self {
        Self { lists, vault, allowed_prefixes, audit }
    }

    /// Decide a tool invocation. `risk` comes from the tool's manifest;
    /// a high-risk tool that would be allowed is demoted to ask.
    pub fn decide(&self, tool_name: &str, args: &Value, caller: &Caller, risk: Risk) -> PolicyDecision {
        let decision = self.decide_inner(tool_name, args, caller, risk);
        self.audit_decision(tool_name, args, caller, &decision, None);
        if decision.is_denied() {
            tracing::warn!(
                tool = tool_name,
                reason = decision.reason.as_deref().unwrap_or(""),
                source = %caller.source,
                "tool denied"
            );
        }
        decision
    }

    /// Decide a file write. Writes outside the allowed prefixes are always
    /// denied with `PATH_NOT_ALLOWED`.
    pub fn decide_write(&self, rel_path: &str, caller: &Caller) -> PolicyDecision {
        let decision = match self.check_path(rel_path, true) {
            Ok(()) => PolicyDecision::allow(),
            Err(reason) => PolicyDecision::deny(reason),
        };
        let args = serde_json::json!({ "path": rel_path });
        self.audit_decision("fs.write", &args, caller, &decision, None);
        decision
    }

    /// Record the result digest of an allowed invocation after the fact.
    pub fn audit_result(&self, tool_name: &str, args: &Value, caller: &Caller, result: &Value) {
        let decision = PolicyDecision::allow();
        self.audit_decision(tool_name, args, caller, &decision, Some(sha256_value(result)));
    }

    fn decide_inner(
        &self,
        tool_name: &str,
        args: &Value,
        caller: &Caller,
        risk: Risk,
    ) -> PolicyDecision {
        // Path arguments are canonicalized first; a traversal denies the
        // call regardless of the tool lists.
        // Run-scoped scratch space is writable for the owning run.
        if let Err(reason) = self.check_path_args(args, caller) {
            return PolicyDecision::deny(reason);
        }

        if matches_any(&self.lists.deny, tool_name) {
            return PolicyDecision::deny(format!("{}: matched deny rule", ErrorKind::ToolDenied));
        }
        if matches_any(&self.lists.ask, tool_name) {
            return PolicyDecision::ask("matched ask rule");
        }
        if matches_any(&self.lists.allow, tool_name) {
            if risk == Risk::High {
                return PolicyDecision::ask("high-risk tool demoted to ask");
            }
            return PolicyDecision::allow();
        }
        PolicyDecision::deny(format!("{}: no matching allow rule", ErrorKind::ToolDenied))
    }

    fn check_path_args(&self, args: &Value, caller: &Caller) -> Result<(), String> {
        let Value::Object(map) = args else { return Ok(()) };
        for key in PATH_ARG_KEYS {
            if let Some(Value::String(path)) = map.get(*key) {
                self.check_path_for_run(path, caller)?;
            }
        }
        Ok(())
    }

    fn check_path_for_run(&self, rel_path: &str, caller: &Caller) -> Result<(), String> {
        match self.check_path(rel_path, false) {
            Ok(()) => Ok(()),
            Err(reason) => {
                // The run's own scratch directory is an implicit prefix.
                if let Some(run_id) = &caller.run_id {
                    let run_prefix = format!(".amon/runs/{}/", run_id);
                    if rel_path.starts_with(&run_prefix)
                        && self.vault.resolve_in_project(rel_path).is_ok()
                    {
                        return Ok(());
                    }
                }
                Err(reason)
            }
        }
    }

    fn check_path(&self, rel_path: &str, _is_write: bool) -> Result<(), String> {
        match self.vault.resolve_in_project(rel_path) {
            Ok(_) => {
                if self.allowed_prefixes.iter().any(|p| rel_path.starts_with(p.as_str())) {
                    Ok(())
                } else {
                    Err(format!("{}: outside allowed prefixes", ErrorKind::PathNotAllowed))
                }
            }
            Err(VaultError::PathNotAllowed(_)) => {
                Err(format!("{}: path escapes project", ErrorKind::PathNotAllowed))
            }
            Err(e) => Err(format!("{}: {e}", ErrorKind::IoError)),
        }
    }

    fn audit_decision(
        &self,
        tool_name: &str,
        args: &Value,
        caller: &Caller,
        decision: &PolicyDecision,
        result_sha256: Option<String>,
    ) {
        let entry = AuditEntry {
            ts: Utc::now(),
            tool: tool_name.to_string(),
            decision: decision.decision,
            reason: decision.reason.clone(),
            require_confirm: decision.require_confirm,
            args_sha256: sha256_value(args),
            result_sha256,
            preview: structural_preview(args),
            project_id: Some(caller.project_id),
            run_id: caller.run_id,
            chat_id: caller.chat_id,
            source: caller.source,
        };
        if let Err(e) = self.audit.append(&entry) {
            tracing::error!(error = %e, tool = tool_name, "failed to append audit entry");
        }
    }
}

fn matches_any(patterns: &[String], tool_name: &str) -> bool {
    patterns.iter().any(|p| {
        if p == tool_name {
            return true;
        }
        glob::Pattern::new(p).map(|pat| pat.matches(tool_name)).unwrap_or(false)
    })
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
