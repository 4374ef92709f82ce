// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::graph::{NodeKind, NodeSpec};

fn one_node_graph() -> Graph {
    Graph::new(vec![NodeSpec::new("only", NodeKind::Condition { predicate: "x".into() })], vec![])
}

#[test]
fn new_run_seeds_pending_node_state() {
    let run = Run::new(
        ProjectId::from_string("p1"),
        Trigger::new(TriggerKind::Chat, "chat-1"),
        one_node_graph(),
    );
    assert_eq!(run.status, RunStatus::Queued);
    assert_eq!(run.node_state("only").unwrap().status, NodeStatus::Pending);
    assert_eq!(run.node_state("only").unwrap().attempts, 0);
}

#[test]
fn terminal_statuses() {
    assert!(RunStatus::Succeeded.is_terminal());
    assert!(RunStatus::Failed.is_terminal());
    assert!(RunStatus::Cancelled.is_terminal());
    assert!(!RunStatus::Running.is_terminal());
    assert!(!RunStatus::PendingConfirmation.is_terminal());
    assert!(!RunStatus::Queued.is_terminal());
}

#[test]
fn patch_status_sets_finish_once() {
    let mut run = Run::new(
        ProjectId::from_string("p1"),
        Trigger::new(TriggerKind::Cli, "cli"),
        one_node_graph(),
    );
    run.patch_status(RunStatus::Running, None);
    assert!(run.finished_at.is_none());

    let done = Utc::now();
    run.patch_status(RunStatus::Succeeded, Some(done));
    assert_eq!(run.finished_at, Some(done));
}

#[test]
fn run_serde_round_trip() {
    let run = Run::new(
        ProjectId::from_string("p1"),
        Trigger::new(TriggerKind::Schedule, "nightly").event_id(42),
        one_node_graph(),
    )
    .chat_id(ChatId::from_string("chat-1"))
    .allow_llm(true);

    let json = serde_json::to_string(&run).unwrap();
    let back: Run = serde_json::from_str(&json).unwrap();
    assert_eq!(back, run);
    assert_eq!(back.trigger.event_id, Some(42));
}

#[test]
fn trigger_kind_wire_names() {
    let json = serde_json::to_string(&TriggerKind::Schedule).unwrap();
    assert_eq!(json, "\"schedule\"");
    assert_eq!(TriggerKind::Hook.to_string(), "hook");
}
