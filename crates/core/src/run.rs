// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run and node state machines.

use crate::graph::Graph;
use crate::id::{ChatId, ProjectId, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Why a run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Chat,
    Hook,
    Schedule,
    Job,
    Cli,
}

crate::simple_display! {
    TriggerKind {
        Chat => "chat",
        Hook => "hook",
        Schedule => "schedule",
        Job => "job",
        Cli => "cli",
    }
}

/// Trigger metadata attached to every run: what started it, which rule or
/// chat it came from, and (for event-driven triggers) the event that fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    /// The hook/schedule/job/chat id behind the trigger.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<u64>,
}

impl Trigger {
    pub fn new(kind: TriggerKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into(), event_id: None }
    }

    pub fn event_id(mut self, id: u64) -> Self {
        self.event_id = Some(id);
        self
    }
}

/// Run status (terminal states are never left except `pending_confirmation`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    PendingConfirmation,
}

crate::simple_display! {
    RunStatus {
        Queued => "queued",
        Running => "running",
        Succeeded => "succeeded",
        Failed => "failed",
        Cancelled => "cancelled",
        PendingConfirmation => "pending_confirmation",
    }
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled)
    }
}

/// Node status within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

crate::simple_display! {
    NodeStatus {
        Pending => "pending",
        Running => "running",
        Succeeded => "succeeded",
        Failed => "failed",
        Skipped => "skipped",
    }
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Skipped)
    }
}

/// Per-node execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NodeState {
    pub status: NodeStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Event ids in the run's event stream emitted for this node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<u64>,
}

/// One execution of a resolved graph.
///
/// Immutable once finalized except for a compact status patch
/// ([`Run::patch_status`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: RunId,
    pub project_id: ProjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,
    pub trigger: Trigger,
    pub graph: Graph,
    /// node_id → state
    #[serde(default)]
    pub state: HashMap<String, NodeState>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Whether this run may dispatch model calls (budget / automation gate).
    #[serde(default)]
    pub allow_llm: bool,
}

impl Run {
    pub fn new(project_id: ProjectId, trigger: Trigger, graph: Graph) -> Self {
        let state = graph.nodes.iter().map(|n| (n.id.clone(), NodeState::default())).collect();
        Self {
            run_id: RunId::new(),
            project_id,
            chat_id: None,
            trigger,
            graph,
            state,
            status: RunStatus::Queued,
            started_at: Utc::now(),
            finished_at: None,
            allow_llm: false,
        }
    }

    crate::setters! {
        set {
            allow_llm: bool,
        }
        option {
            chat_id: ChatId,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Compact status patch, the only mutation allowed after finalization.
    pub fn patch_status(&mut self, status: RunStatus, finished_at: Option<DateTime<Utc>>) {
        self.status = status;
        if finished_at.is_some() {
            self.finished_at = finished_at;
        }
    }

    pub fn node_state(&self, node_id: &str) -> Option<&NodeState> {
        self.state.get(node_id)
    }

    pub fn node_state_mut(&mut self, node_id: &str) -> &mut NodeState {
        self.state.entry(node_id.to_string()).or_default()
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
