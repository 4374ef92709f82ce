// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event envelope and the closed event taxonomy.
//!
//! Events are the durable record of everything the platform does. One
//! envelope shape is shared by the global, project, and run streams;
//! `event_id` is assigned by the log at append time and is monotonic per
//! stream.

use crate::id::{ChatId, NodeId, ProjectId, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event types (closed set). Serialized as dotted names, e.g. `"run.started"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    // -- run lifecycle --
    #[serde(rename = "run.queued")]
    RunQueued,
    #[serde(rename = "run.started")]
    RunStarted,
    #[serde(rename = "run.completed")]
    RunCompleted,
    #[serde(rename = "run.pending_confirmation")]
    RunPendingConfirmation,
    #[serde(rename = "run.resumed")]
    RunResumed,

    // -- node lifecycle --
    #[serde(rename = "node.started")]
    NodeStarted,
    #[serde(rename = "node.succeeded")]
    NodeSucceeded,
    #[serde(rename = "node.failed")]
    NodeFailed,
    #[serde(rename = "node.skipped")]
    NodeSkipped,
    #[serde(rename = "node.retried")]
    NodeRetried,
    #[serde(rename = "node.warning")]
    NodeWarning,

    // -- documents and workspace files --
    #[serde(rename = "doc.created")]
    DocCreated,
    #[serde(rename = "doc.updated")]
    DocUpdated,
    #[serde(rename = "doc.deleted")]
    DocDeleted,
    #[serde(rename = "workspace.file_created")]
    WorkspaceFileCreated,
    #[serde(rename = "workspace.file_updated")]
    WorkspaceFileUpdated,
    #[serde(rename = "workspace.file_deleted")]
    WorkspaceFileDeleted,

    // -- daemon jobs --
    #[serde(rename = "job.started")]
    JobStarted,
    #[serde(rename = "job.stopped")]
    JobStopped,
    #[serde(rename = "job.failed")]
    JobFailed,

    // -- tools --
    #[serde(rename = "tool.called")]
    ToolCalled,
    #[serde(rename = "tool.denied")]
    ToolDenied,

    // -- billing --
    #[serde(rename = "billing.usage")]
    BillingUsage,
    #[serde(rename = "billing.budget_exceeded")]
    BillingBudgetExceeded,

    // -- automation --
    #[serde(rename = "hook.fired")]
    HookFired,
    #[serde(rename = "hook.suppressed")]
    HookSuppressed,
    #[serde(rename = "schedule.fired")]
    ScheduleFired,
    #[serde(rename = "schedule.misfired")]
    ScheduleMisfired,
    #[serde(rename = "policy.llm_blocked")]
    PolicyLlmBlocked,

    // -- infrastructure --
    #[serde(rename = "bus.dropped")]
    BusDropped,

    // -- chat streaming --
    #[serde(rename = "chat.token")]
    ChatToken,
    #[serde(rename = "chat.reasoning")]
    ChatReasoning,
    #[serde(rename = "chat.notice")]
    ChatNotice,
    #[serde(rename = "chat.session_fallback")]
    ChatSessionFallback,
}

impl EventKind {
    /// Dotted wire name, e.g. `"node.failed"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::RunQueued => "run.queued",
            EventKind::RunStarted => "run.started",
            EventKind::RunCompleted => "run.completed",
            EventKind::RunPendingConfirmation => "run.pending_confirmation",
            EventKind::RunResumed => "run.resumed",
            EventKind::NodeStarted => "node.started",
            EventKind::NodeSucceeded => "node.succeeded",
            EventKind::NodeFailed => "node.failed",
            EventKind::NodeSkipped => "node.skipped",
            EventKind::NodeRetried => "node.retried",
            EventKind::NodeWarning => "node.warning",
            EventKind::DocCreated => "doc.created",
            EventKind::DocUpdated => "doc.updated",
            EventKind::DocDeleted => "doc.deleted",
            EventKind::WorkspaceFileCreated => "workspace.file_created",
            EventKind::WorkspaceFileUpdated => "workspace.file_updated",
            EventKind::WorkspaceFileDeleted => "workspace.file_deleted",
            EventKind::JobStarted => "job.started",
            EventKind::JobStopped => "job.stopped",
            EventKind::JobFailed => "job.failed",
            EventKind::ToolCalled => "tool.called",
            EventKind::ToolDenied => "tool.denied",
            EventKind::BillingUsage => "billing.usage",
            EventKind::BillingBudgetExceeded => "billing.budget_exceeded",
            EventKind::HookFired => "hook.fired",
            EventKind::HookSuppressed => "hook.suppressed",
            EventKind::ScheduleFired => "schedule.fired",
            EventKind::ScheduleMisfired => "schedule.misfired",
            EventKind::PolicyLlmBlocked => "policy.llm_blocked",
            EventKind::BusDropped => "bus.dropped",
            EventKind::ChatToken => "chat.token",
            EventKind::ChatReasoning => "chat.reasoning",
            EventKind::ChatNotice => "chat.notice",
            EventKind::ChatSessionFallback => "chat.session_fallback",
        }
    }

    /// Family prefix before the dot, e.g. `"node"`.
    pub fn family(&self) -> &'static str {
        let name = self.as_str();
        match name.find('.') {
            Some(i) => &name[..i],
            None => name,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stream an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Global,
    #[default]
    Project,
    Run,
}

crate::simple_display! {
    Scope {
        Global => "global",
        Project => "project",
        Run => "run",
    }
}

/// Where the activity that produced an event originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Chat,
    Hook,
    Schedule,
    Job,
    Cli,
    #[default]
    System,
}

crate::simple_display! {
    EventSource {
        Chat => "chat",
        Hook => "hook",
        Schedule => "schedule",
        Job => "job",
        Cli => "cli",
        System => "system",
    }
}

/// Risk level attached to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Risk {
    #[default]
    Low,
    Medium,
    High,
}

crate::simple_display! {
    Risk {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
}

/// The durable event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic per-stream id, assigned by the EventLog at append time.
    #[serde(default)]
    pub event_id: u64,
    pub ts: DateTime<Utc>,
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub actor: String,
    pub source: EventSource,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub risk: Risk,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,
    /// When set, the bus coalesces successive events sharing this key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            event_id: 0,
            ts: Utc::now(),
            scope: Scope::Project,
            project_id: None,
            kind,
            actor: "system".to_string(),
            source: EventSource::System,
            payload: Value::Null,
            risk: Risk::Low,
            run_id: None,
            node_id: None,
            chat_id: None,
            dedupe_key: None,
        }
    }

    crate::setters! {
        into {
            actor: String,
        }
        set {
            scope: Scope,
            source: EventSource,
            payload: Value,
            risk: Risk,
            ts: DateTime<Utc>,
        }
        option {
            project_id: ProjectId,
            run_id: RunId,
            node_id: NodeId,
            chat_id: ChatId,
            dedupe_key: String,
        }
    }

    /// One-line summary for log spans.
    pub fn log_summary(&self) -> String {
        let mut s = self.kind.as_str().to_string();
        if let Some(run) = &self.run_id {
            s.push_str(&format!(" run={}", crate::id::short(run.as_str(), 12)));
        }
        if let Some(node) = &self.node_id {
            s.push_str(&format!(" node={}", node));
        }
        s
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
