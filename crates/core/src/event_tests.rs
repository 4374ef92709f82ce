// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn kind_serializes_as_dotted_name() {
    let json = serde_json::to_string(&EventKind::NodeFailed).unwrap();
    assert_eq!(json, "\"node.failed\"");
    let back: EventKind = serde_json::from_str("\"billing.budget_exceeded\"").unwrap();
    assert_eq!(back, EventKind::BillingBudgetExceeded);
}

#[test]
fn kind_as_str_matches_serde_name() {
    // as_str is used for filter matching; it must agree with the wire name.
    for kind in [
        EventKind::RunStarted,
        EventKind::NodeSucceeded,
        EventKind::DocCreated,
        EventKind::WorkspaceFileUpdated,
        EventKind::PolicyLlmBlocked,
        EventKind::ChatSessionFallback,
    ] {
        let wire = serde_json::to_value(kind).unwrap();
        assert_eq!(wire, serde_json::Value::String(kind.as_str().to_string()));
    }
}

#[test]
fn family_is_prefix_before_dot() {
    assert_eq!(EventKind::NodeRetried.family(), "node");
    assert_eq!(EventKind::WorkspaceFileDeleted.family(), "workspace");
    assert_eq!(EventKind::BusDropped.family(), "bus");
}

#[test]
fn envelope_round_trips() {
    let ev = Event::new(EventKind::RunStarted)
        .project_id(ProjectId::from_string("p1"))
        .run_id(RunId::from_string("run-1"))
        .source(EventSource::Chat)
        .actor("user")
        .payload(json!({"trigger": "chat"}));

    let line = serde_json::to_string(&ev).unwrap();
    let back: Event = serde_json::from_str(&line).unwrap();
    assert_eq!(back, ev);
    // "type" is the wire field name for the kind
    assert!(line.contains("\"type\":\"run.started\""));
}

#[test]
fn optional_ids_are_omitted() {
    let ev = Event::new(EventKind::BusDropped).scope(Scope::Global);
    let line = serde_json::to_string(&ev).unwrap();
    assert!(!line.contains("run_id"));
    assert!(!line.contains("chat_id"));
    assert!(!line.contains("dedupe_key"));
}

#[test]
fn log_summary_truncates_run_id() {
    let ev = Event::new(EventKind::NodeStarted)
        .run_id(RunId::from_string("run-0123456789abcdef0123"))
        .node_id(NodeId::from_string("draft"));
    let summary = ev.log_summary();
    assert_eq!(summary, "node.started run=0123456789ab node=draft");
}
