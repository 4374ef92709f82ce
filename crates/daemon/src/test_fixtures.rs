// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared daemon test fixtures.

use crate::config;
use crate::daemon::Daemon;
use amon_adapters::{FakeChatModel, FakeTool, ToolRegistry};
use amon_core::{DataDir, PolicyLists, ProjectConfig, ProjectId, RunId, RunStatus};
use amon_runtime::RuntimeDeps;
use std::sync::Arc;
use tempfile::TempDir;

pub(crate) struct TestDaemon {
    pub tmp: TempDir,
    pub daemon: Arc<Daemon>,
    pub model: FakeChatModel,
    pub echo_tool: FakeTool,
    pub project_id: ProjectId,
}

/// A daemon over a temp data dir with one project (`p1`) whose policy
/// allows every tool.
pub(crate) fn test_daemon() -> TestDaemon {
    let tmp = TempDir::new().expect("tempdir");
    let model = FakeChatModel::new();
    let echo_tool = FakeTool::new("echo");

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(echo_tool.clone()));
    let deps =
        RuntimeDeps { model: Arc::new(model.clone()), tools, sandbox: None };

    let daemon = Daemon::new(DataDir::new(tmp.path()), deps).expect("daemon");
    let project_id = ProjectId::from_string("p1");
    daemon.create_project(Some(project_id), "test project").expect("project");

    let paths = daemon.project_paths(&project_id).expect("paths");
    let project_config = ProjectConfig {
        name: "test project".into(),
        policy: PolicyLists { deny: vec![], ask: vec![], allow: vec!["*".into()] },
        ..Default::default()
    };
    config::save_project(&paths, &project_config).expect("config");

    TestDaemon { tmp, daemon, model, echo_tool, project_id }
}

/// Poll the run index until the run leaves the live states.
pub(crate) async fn wait_for_run(daemon: &Daemon, run_id: &RunId) -> RunStatus {
    for _ in 0..500 {
        if let Some(record) = daemon.run_record(run_id) {
            if record.status.is_terminal() || record.status == RunStatus::PendingConfirmation {
                return record.status;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("run {run_id} did not settle in time");
}
