// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixture for the end-to-end specs.

use amon_adapters::{FakeChatModel, FakeTool, ToolRegistry};
use amon_core::{DataDir, PolicyLists, ProjectConfig, ProjectId, RunId, RunStatus};
use amon_daemon::daemon::Daemon;
use amon_runtime::RuntimeDeps;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub struct Platform {
    pub tmp: TempDir,
    pub daemon: Arc<Daemon>,
    pub model: FakeChatModel,
    pub echo_tool: FakeTool,
    pub project_id: ProjectId,
}

/// An in-process platform over a temp data dir: one project `p1` whose
/// policy allows every tool, a scripted model, and an echo tool.
pub fn platform() -> Platform {
    let tmp = TempDir::new().expect("tempdir");
    let model = FakeChatModel::new();
    let echo_tool = FakeTool::new("echo");

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(echo_tool.clone()));
    let deps = RuntimeDeps { model: Arc::new(model.clone()), tools, sandbox: None };

    let daemon = Daemon::new(DataDir::new(tmp.path()), deps).expect("daemon");
    let project_id = ProjectId::from_string("p1");
    daemon.create_project(Some(project_id), "demo project").expect("project");

    let paths = daemon.project_paths(&project_id).expect("paths");
    let config = ProjectConfig {
        name: "demo project".into(),
        policy: PolicyLists { deny: vec![], ask: vec![], allow: vec!["*".into()] },
        ..Default::default()
    };
    amon_daemon::config::save_project(&paths, &config).expect("config");

    Platform { tmp, daemon, model, echo_tool, project_id }
}

impl Platform {
    /// Bind the HTTP API on an ephemeral localhost port.
    pub async fn serve_http(&self) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let router = amon_daemon::http::router(Arc::clone(&self.daemon));
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        addr
    }

    pub async fn wait_for_run(&self, run_id: &RunId) -> RunStatus {
        for _ in 0..500 {
            if let Some(record) = self.daemon.run_record(run_id) {
                if record.status.is_terminal() || record.status == RunStatus::PendingConfirmation
                {
                    return record.status;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("run {run_id} did not settle");
    }
}

/// Minimal HTTP/1.1 client: one request, connection closed by the server.
pub async fn http_request(
    addr: SocketAddr,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> (u16, String) {
    let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    let body = body.unwrap_or("");
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.expect("write");

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.expect("read");
    let text = String::from_utf8_lossy(&raw).into_owned();

    let status = text
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    let body = text.split_once("\r\n\r\n").map(|(_, b)| b.to_string()).unwrap_or_default();
    (status, body)
}

/// Strip chunked-transfer framing well enough for JSON bodies.
pub fn json_body(raw_body: &str) -> serde_json::Value {
    // Try as-is first (Content-Length responses).
    if let Ok(value) = serde_json::from_str(raw_body) {
        return value;
    }
    // Chunked: drop size lines.
    let joined: String = raw_body
        .lines()
        .filter(|line| !line.trim().is_empty() && u64::from_str_radix(line.trim(), 16).is_err())
        .collect();
    serde_json::from_str(&joined).unwrap_or_else(|e| panic!("bad body ({e}): {raw_body}"))
}
