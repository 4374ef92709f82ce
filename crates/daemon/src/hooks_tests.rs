// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_fixtures::{test_daemon, wait_for_run};
use amon_core::{EventSource, RunStatus, Scope};
use serde_json::json;

fn doc_event(project_id: ProjectId, path: &str, size: u64) -> Event {
    Event::new(EventKind::DocCreated)
        .project_id(project_id)
        .actor("user")
        .payload(json!({"path": path, "size": size}))
}

fn tool_rule(project_id: ProjectId) -> HookRule {
    HookRule {
        id: HookId::from_string("hook-copy"),
        project_id,
        event_type: "doc.*".into(),
        path_glob: Some("docs/**/*.md".into()),
        min_size: None,
        ignore_actors: vec!["system".into()],
        action: HookAction::ToolCall { tool: "echo".into(), args: json!({"op": "copy"}) },
        cooldown_seconds: 30,
        dedupe_key: Some("{hook}:{path}".into()),
        max_concurrency: 1,
        high_risk: false,
        enabled: true,
    }
}

#[test]
fn rule_matching() {
    let project = ProjectId::from_string("p1");
    let rule = tool_rule(project);

    assert!(rule.matches(&doc_event(project, "docs/a.md", 10)));
    // Wrong event family
    assert!(!rule.matches(&Event::new(EventKind::RunStarted).project_id(project).actor("user")));
    // Path glob mismatch
    assert!(!rule.matches(&doc_event(project, "docs/a.txt", 10)));
    // Ignored actor
    let mut system = doc_event(project, "docs/a.md", 10);
    system.actor = "system".into();
    assert!(!rule.matches(&system));
    // Different project
    assert!(!rule.matches(&doc_event(ProjectId::from_string("p2"), "docs/a.md", 10)));
    // Disabled
    let mut disabled = tool_rule(project);
    disabled.enabled = false;
    assert!(!disabled.matches(&doc_event(project, "docs/a.md", 10)));
}

#[test]
fn min_size_filter() {
    let project = ProjectId::from_string("p1");
    let mut rule = tool_rule(project);
    rule.min_size = Some(100);
    assert!(!rule.matches(&doc_event(project, "docs/a.md", 99)));
    assert!(rule.matches(&doc_event(project, "docs/a.md", 100)));
}

#[test]
fn yaml_rule_round_trip() {
    let rule = tool_rule(ProjectId::from_string("p1"));
    let yaml = serde_yaml::to_string(&rule).unwrap();
    let back: HookRule = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(back, rule);
}

#[test]
fn load_rules_reads_hook_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let data = DataDir::new(tmp.path());
    std::fs::create_dir_all(data.hooks_dir()).unwrap();
    let rule = tool_rule(ProjectId::from_string("p1"));
    std::fs::write(
        data.hook_file(&rule.id),
        serde_yaml::to_string(&rule).unwrap(),
    )
    .unwrap();
    // Non-yaml files are ignored
    std::fs::write(data.hooks_dir().join("README"), "not a rule").unwrap();

    let rules = load_rules(&data).unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].id, rule.id);
}

#[tokio::test]
async fn matched_hook_dispatches_tool_run() {
    let f = test_daemon();
    let engine = HookEngine::new(Arc::clone(&f.daemon), vec![tool_rule(f.project_id)]);

    engine.on_event(&doc_event(f.project_id, "docs/new.md", 42));

    // The dispatched run shows up in the index with a hook trigger.
    let record = f
        .daemon
        .runs_for_project(&f.project_id)
        .into_iter()
        .find(|r| r.trigger == TriggerKind::Hook)
        .expect("hook run dispatched");
    let status = wait_for_run(&f.daemon, &record.run_id).await;
    assert_eq!(status, RunStatus::Succeeded);
    assert_eq!(f.echo_tool.calls().len(), 1);

    let log = f.daemon.project_events(&f.project_id).unwrap();
    let fired = log.read_filtered(|e| e.kind == EventKind::HookFired).unwrap();
    assert_eq!(fired.len(), 1);
}

#[tokio::test]
async fn cooldown_suppresses_repeat_fires() {
    let f = test_daemon();
    let engine = HookEngine::new(Arc::clone(&f.daemon), vec![tool_rule(f.project_id)]);

    engine.on_event(&doc_event(f.project_id, "docs/new.md", 42));
    engine.on_event(&doc_event(f.project_id, "docs/new.md", 42));

    let log = f.daemon.project_events(&f.project_id).unwrap();
    let fired = log.read_filtered(|e| e.kind == EventKind::HookFired).unwrap();
    let suppressed = log.read_filtered(|e| e.kind == EventKind::HookSuppressed).unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(suppressed.len(), 1);

    // A different path has its own dedupe key and fires.
    engine.on_event(&doc_event(f.project_id, "docs/other.md", 42));
    let fired = log.read_filtered(|e| e.kind == EventKind::HookFired).unwrap();
    assert_eq!(fired.len(), 2);
}

#[tokio::test]
async fn llm_rule_blocked_by_automation_budget() {
    let f = test_daemon();
    let mut rule = tool_rule(f.project_id);
    rule.action = HookAction::GraphRun {
        template_id: "summarize_doc".into(),
        vars: Default::default(),
    };
    let engine = HookEngine::new(Arc::clone(&f.daemon), vec![rule]);

    engine.on_event(&doc_event(f.project_id, "docs/new.md", 42));

    // Dispatch was rejected: no run, and policy.llm_blocked recorded.
    assert!(f.daemon.runs_for_project(&f.project_id).is_empty());
    let log = f.daemon.project_events(&f.project_id).unwrap();
    let blocked = log.read_filtered(|e| e.kind == EventKind::PolicyLlmBlocked).unwrap();
    assert_eq!(blocked.len(), 1);
}

#[tokio::test]
async fn high_risk_rule_parks_for_confirmation() {
    let f = test_daemon();
    let mut rule = tool_rule(f.project_id);
    rule.high_risk = true;
    let engine = HookEngine::new(Arc::clone(&f.daemon), vec![rule]);

    engine.on_event(&doc_event(f.project_id, "docs/new.md", 42));

    let record = f
        .daemon
        .runs_for_project(&f.project_id)
        .into_iter()
        .find(|r| r.trigger == TriggerKind::Hook)
        .expect("hook run dispatched");
    let status = wait_for_run(&f.daemon, &record.run_id).await;
    assert_eq!(status, RunStatus::PendingConfirmation);
    // The tool never ran.
    assert!(f.echo_tool.calls().is_empty());
}

#[tokio::test]
async fn pump_feeds_bus_events() {
    let f = test_daemon();
    let engine = Arc::new(HookEngine::new(Arc::clone(&f.daemon), vec![tool_rule(f.project_id)]));
    let cancel = tokio_util::sync::CancellationToken::new();
    let pump_task = tokio::spawn(pump(Arc::clone(&engine), cancel.clone()));

    f.daemon.emit_project(&f.project_id, doc_event(f.project_id, "docs/new.md", 42).scope(Scope::Project).source(EventSource::System));

    // Wait for the dispatched run to appear.
    let mut dispatched = false;
    for _ in 0..300 {
        if !f.daemon.runs_for_project(&f.project_id).is_empty() {
            dispatched = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    cancel.cancel();
    let _ = pump_task.await;
    assert!(dispatched, "pump should have dispatched a hook run");
}
