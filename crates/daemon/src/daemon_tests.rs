// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_fixtures::test_daemon;
use amon_core::graph::{Graph, NodeKind, NodeSpec};
use amon_core::{EventKind, Trigger};

#[tokio::test]
async fn create_and_list_projects() {
    let f = test_daemon();
    let projects = f.daemon.list_projects().unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].0, f.project_id);
    assert_eq!(projects[0].1, "test project");

    let second = f.daemon.create_project(None, "another").unwrap();
    assert!(f.daemon.project_paths(&second).is_ok());
    assert_eq!(f.daemon.list_projects().unwrap().len(), 2);
}

#[tokio::test]
async fn project_paths_unknown_project_fails() {
    let f = test_daemon();
    let missing = ProjectId::from_string("ghost");
    assert!(matches!(
        f.daemon.project_paths(&missing),
        Err(crate::error::DaemonError::ProjectNotFound(_))
    ));
}

#[tokio::test]
async fn run_env_reflects_project_config() {
    let f = test_daemon();
    let run_id = RunId::new();
    let env = f.daemon.run_env(&f.project_id, &run_id).unwrap();
    assert_eq!(env.automation_budget_daily, 0.0);
    assert!(env.paths.root().ends_with("projects/p1"));
}

#[tokio::test]
async fn run_index_tracks_status_and_chat() {
    let f = test_daemon();
    let graph = Graph::new(
        vec![NodeSpec::new("only", NodeKind::Condition { predicate: "x".into() })],
        vec![],
    );
    let run = Run::new(f.project_id, Trigger::new(TriggerKind::Chat, "chat-1"), graph)
        .chat_id(ChatId::from_string("chat-1"));
    let run_id = run.run_id;

    f.daemon.register_run(&run, None);
    assert_eq!(f.daemon.run_record(&run_id).unwrap().status, RunStatus::Queued);
    assert_eq!(
        f.daemon.latest_run_for_chat(&ChatId::from_string("chat-1")).unwrap().run_id,
        run_id
    );

    f.daemon.update_run_status(&run_id, RunStatus::Succeeded);
    assert_eq!(f.daemon.run_record(&run_id).unwrap().status, RunStatus::Succeeded);
    // Terminal runs can no longer be cancelled.
    assert!(!f.daemon.cancel_run(&run_id));
}

#[tokio::test]
async fn emit_project_lands_in_log_and_bus() {
    let f = test_daemon();
    let sub = f.daemon.bus.subscribe(|e| e.kind == EventKind::ChatNotice);

    f.daemon.emit_project(&f.project_id, Event::new(EventKind::ChatNotice));

    let received = sub.recv().await;
    assert_eq!(received.project_id, Some(f.project_id));
    assert!(received.event_id > 0);

    let log = f.daemon.project_events(&f.project_id).unwrap();
    let stored = log.read_filtered(|e| e.kind == EventKind::ChatNotice).unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn metrics_window_counts() {
    let f = test_daemon();
    f.daemon.metrics.record(false);
    f.daemon.metrics.record(true);
    f.daemon.metrics.record(false);

    let (requests, errors, rate) = f.daemon.metrics.recent();
    assert_eq!(requests, 3);
    assert_eq!(errors, 1);
    assert!((rate - 1.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn find_run_on_disk_scans_projects() {
    let f = test_daemon();
    let run_id = RunId::new();
    let paths = f.daemon.project_paths(&f.project_id).unwrap();
    std::fs::create_dir_all(paths.run_dir(&run_id)).unwrap();

    assert_eq!(f.daemon.find_run_on_disk(&run_id).unwrap(), f.project_id);
    assert!(f.daemon.find_run_on_disk(&RunId::new()).is_err());
}
