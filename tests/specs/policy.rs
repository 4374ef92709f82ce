// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Path traversal denial and hash-only auditing.

use crate::prelude::*;
use amon_core::graph::{Graph, NodeKind, NodeSpec};
use amon_core::{NodeStatus, Run, RunStatus, Trigger, TriggerKind};
use amon_policy::AuditEntry;
use serde_json::json;
use sha2::{Digest, Sha256};

#[tokio::test]
async fn traversal_denied_audited_and_never_retried() {
    let platform = platform();

    let args = json!({"path": "../../etc/passwd"});
    let mut node = NodeSpec::new(
        "read",
        NodeKind::ToolCall { tool: "echo".into(), args: args.clone() },
    );
    // Generous retry budget to prove denials are final.
    node.retry = amon_core::RetryPolicy { max_attempts: 3, backoff_s: 0.0, jitter_s: 0.0 };
    let graph = Graph::new(vec![node], vec![]);

    let run = Run::new(
        platform.project_id,
        Trigger::new(TriggerKind::Chat, "chat-x"),
        graph,
    );
    let run_id = run.run_id;
    let cancel = platform.daemon.register_run(&run, None);
    let env = platform.daemon.run_env(&platform.project_id, &run_id).unwrap();

    let done = platform.daemon.runtime.execute(run, &env, cancel).await.unwrap();
    assert_eq!(done.status, RunStatus::Failed);

    let node_state = done.node_state("read").unwrap();
    assert_eq!(node_state.status, NodeStatus::Failed);
    assert_eq!(node_state.attempts, 1, "policy denials never retry");
    assert!(node_state.error.as_deref().unwrap().contains("PATH_NOT_ALLOWED"));

    // The tool itself never ran.
    assert!(platform.echo_tool.calls().is_empty());

    // The audit entry carries the args digest and no raw path fields.
    let audit_path = amon_core::DataDir::new(platform.tmp.path()).audit_log();
    let audit_text = std::fs::read_to_string(&audit_path).unwrap();
    let entries: Vec<AuditEntry> =
        audit_text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert!(!entries.is_empty());

    let expected_digest = format!("{:x}", Sha256::digest(args.to_string().as_bytes()));
    let denial = entries
        .iter()
        .find(|e| e.tool == "echo")
        .expect("audit entry for the denied call");
    assert_eq!(denial.args_sha256, expected_digest);
    assert!(!audit_text.contains("passwd"));
    assert!(!audit_text.contains("../"));
}

#[tokio::test]
async fn write_nodes_cannot_leave_allowed_prefixes() {
    let platform = platform();

    // The graph validator rejects escapes before the runtime ever runs.
    let graph = Graph::new(
        vec![NodeSpec::new(
            "w",
            NodeKind::WriteFile { content: "x".into(), output_path: "../outside.md".into() },
        )],
        vec![],
    );
    assert!(graph.validate().is_err());

    // A non-listed prefix is denied at write time with PATH_NOT_ALLOWED.
    let graph = Graph::new(
        vec![NodeSpec::new(
            "w",
            NodeKind::WriteFile { content: "x".into(), output_path: "docs/ok.md".into() },
        )],
        vec![],
    );
    let run = Run::new(platform.project_id, Trigger::new(TriggerKind::Cli, "cli"), graph);
    let run_id = run.run_id;
    let cancel = platform.daemon.register_run(&run, None);
    let env = platform.daemon.run_env(&platform.project_id, &run_id).unwrap();
    let done = platform.daemon.runtime.execute(run, &env, cancel).await.unwrap();
    assert_eq!(done.status, RunStatus::Succeeded);
    assert!(env.paths.root().join("docs/ok.md").is_file());
}
