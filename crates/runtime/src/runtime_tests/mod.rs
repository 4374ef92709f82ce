// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime integration tests: scheduling, guards, retries, parking,
//! cancellation, fan-out.

use super::*;
use amon_adapters::{FakeChatModel, FakeTool, NullChatModel};
use amon_core::graph::{Edge, Graph, NodeKind, NodeSpec, RetryPolicy, Timeouts};
use amon_core::{
    AmonConfig, DataDir, EventKind, PolicyLists, ProjectId, SystemClock, Trigger, TriggerKind,
};
use amon_policy::AuditWriter;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _tmp: TempDir,
    env: RunEnv,
    runtime: GraphRuntime<SystemClock>,
    project_id: ProjectId,
}

fn fixture(model: Arc<dyn amon_adapters::ChatModel>, tools: Vec<Arc<dyn amon_adapters::Tool>>) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let data = DataDir::new(tmp.path());
    let project_id = ProjectId::from_string("p1");
    let paths = data.project(&project_id);
    paths.create_dirs().unwrap();

    let vault = amon_policy::PathVault::new(paths.root(), data.trash_dir());
    let gate = Arc::new(amon_policy::PolicyGate::new(
        PolicyLists { deny: vec!["danger.*".into()], ask: vec![], allow: vec!["*".into()] },
        vault.clone(),
        amon_core::default_allowed_prefixes(),
        Arc::new(AuditWriter::new(data.audit_log())),
    ));

    let mut registry = amon_adapters::ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }

    let config = AmonConfig::with_defaults();
    let env = RunEnv {
        gate,
        vault,
        run_log: Arc::new(amon_storage::EventLog::open(paths.events_log()).unwrap()),
        project_log: Arc::new(
            amon_storage::EventLog::open(paths.logs_dir().join("project-events.jsonl")).unwrap(),
        ),
        billing_log: Arc::new(amon_storage::EventLog::open(paths.billing_log()).unwrap()),
        budget: Arc::new(BudgetGate::unlimited()),
        automation_budget_daily: 0.0,
        paths,
    };

    let runtime = GraphRuntime::new(
        RuntimeDeps { model, tools: registry, sandbox: None },
        EventBus::new(config.bus.clone()),
        SystemClock,
        config.runtime.clone(),
    );
    Fixture { _tmp: tmp, env, runtime, project_id }
}

impl Fixture {
    fn run_log_for(&self, run: &amon_core::Run) -> Arc<amon_storage::EventLog> {
        Arc::new(amon_storage::EventLog::open(self.env.paths.run_events_file(&run.run_id)).unwrap())
    }

    fn env_for(&self, run: &amon_core::Run) -> RunEnv {
        RunEnv { run_log: self.run_log_for(run), ..self.env.clone() }
    }

    fn chat_run(&self, graph: Graph) -> amon_core::Run {
        amon_core::Run::new(self.project_id, Trigger::new(TriggerKind::Chat, "chat-1"), graph)
            .allow_llm(true)
    }
}

fn write_node(id: &str, path: &str) -> NodeSpec {
    NodeSpec::new(
        id,
        NodeKind::WriteFile { content: format!("content of {id}"), output_path: path.into() },
    )
}

fn kinds(events: &[amon_core::Event]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind).collect()
}

#[tokio::test]
async fn linear_graph_executes_in_order() {
    let graph = Graph::new(
        vec![write_node("a", "docs/a.md"), write_node("b", "docs/b.md")],
        vec![Edge::new("a", "b")],
    );
    let f = fixture(Arc::new(NullChatModel), vec![]);
    let run = f.chat_run(graph);
    let env = f.env_for(&run);

    let done = f.runtime.execute(run, &env, Default::default()).await.unwrap();
    assert_eq!(done.status, amon_core::RunStatus::Succeeded);
    assert!(f.env.paths.root().join("docs/a.md").is_file());
    assert!(f.env.paths.root().join("docs/b.md").is_file());

    // run.started < node.started(a) <= node.succeeded(a) <= node.started(b)
    // <= node.succeeded(b) < run.completed
    let events = env.run_log.read_since(0, 1000).unwrap();
    let sequence = kinds(&events);
    assert_eq!(sequence.first(), Some(&EventKind::RunStarted));
    assert_eq!(sequence.last(), Some(&EventKind::RunCompleted));
    let pos = |kind: EventKind, node: &str| {
        events
            .iter()
            .position(|e| {
                e.kind == kind && e.node_id.as_ref().map(|n| n.as_str()) == Some(node)
            })
            .unwrap()
    };
    assert!(pos(EventKind::NodeStarted, "a") < pos(EventKind::NodeSucceeded, "a"));
    assert!(pos(EventKind::NodeSucceeded, "a") < pos(EventKind::NodeStarted, "b"));

    // Artifacts manifest captured both writes
    let manifest: Vec<amon_core::Artifact> = serde_json::from_slice(
        &std::fs::read(f.env.paths.run_artifacts_file(&done.run_id)).unwrap(),
    )
    .unwrap();
    assert_eq!(manifest.len(), 2);

    // Resolved graph is persisted canonically
    let graph_text =
        std::fs::read_to_string(f.env.paths.run_graph_file(&done.run_id)).unwrap();
    let reloaded = Graph::load(&graph_text).unwrap();
    assert_eq!(reloaded.dump().unwrap(), graph_text);
}

#[tokio::test]
async fn falsy_guard_skips_transitively() {
    // a -> b (when ok) -> c ; ok is never set, so b and c skip.
    let graph = Graph::new(
        vec![write_node("a", "docs/a.md"), write_node("b", "docs/b.md"), write_node("c", "docs/c.md")],
        vec![Edge::new("a", "b").when("ok"), Edge::new("b", "c")],
    );
    let f = fixture(Arc::new(NullChatModel), vec![]);
    let run = f.chat_run(graph);
    let env = f.env_for(&run);

    let done = f.runtime.execute(run, &env, Default::default()).await.unwrap();
    assert_eq!(done.status, amon_core::RunStatus::Succeeded);
    assert_eq!(done.node_state("b").unwrap().status, amon_core::NodeStatus::Skipped);
    assert_eq!(done.node_state("c").unwrap().status, amon_core::NodeStatus::Skipped);
    assert!(!f.env.paths.root().join("docs/b.md").exists());
}

#[tokio::test]
async fn condition_output_satisfies_guard() {
    let mut cond = NodeSpec::new("check", NodeKind::Condition { predicate: "draft".into() });
    cond.writes = vec!["ok".into()];
    let seed = NodeSpec::new(
        "seed",
        NodeKind::ToolCall { tool: "emit".into(), args: json!({}) },
    )
    .writes(vec!["draft".into()]);
    let graph = Graph::new(
        vec![seed, cond, write_node("out", "docs/out.md")],
        vec![Edge::new("seed", "check"), Edge::new("check", "out").when("ok")],
    );

    let tool = FakeTool::new("emit").respond_with(json!("the draft"));
    let f = fixture(Arc::new(NullChatModel), vec![Arc::new(tool)]);
    let run = f.chat_run(graph);
    let env = f.env_for(&run);

    let done = f.runtime.execute(run, &env, Default::default()).await.unwrap();
    assert_eq!(done.status, amon_core::RunStatus::Succeeded);
    assert!(f.env.paths.root().join("docs/out.md").is_file());
}

#[tokio::test]
async fn failed_node_skips_downstream_but_siblings_complete() {
    // root -> bad -> after_bad ; root -> good
    let bad = NodeSpec::new("bad", NodeKind::ToolCall { tool: "missing".into(), args: json!({}) });
    let graph = Graph::new(
        vec![
            write_node("root", "docs/root.md"),
            bad,
            write_node("after_bad", "docs/after.md"),
            write_node("good", "docs/good.md"),
        ],
        vec![Edge::new("root", "bad"), Edge::new("bad", "after_bad"), Edge::new("root", "good")],
    );
    let f = fixture(Arc::new(NullChatModel), vec![]);
    let run = f.chat_run(graph);
    let env = f.env_for(&run);

    let done = f.runtime.execute(run, &env, Default::default()).await.unwrap();
    assert_eq!(done.status, amon_core::RunStatus::Failed);
    assert_eq!(done.node_state("bad").unwrap().status, amon_core::NodeStatus::Failed);
    assert_eq!(done.node_state("after_bad").unwrap().status, amon_core::NodeStatus::Skipped);
    assert_eq!(done.node_state("good").unwrap().status, amon_core::NodeStatus::Succeeded);
    assert!(f.env.paths.root().join("docs/good.md").is_file());
}

#[tokio::test]
async fn rate_limit_retries_then_succeeds() {
    let model = FakeChatModel::new().fail_rate_limited().respond("recovered");
    let mut node = NodeSpec::new(
        "draft",
        NodeKind::AgentTask {
            prompt: "write".into(),
            model: None,
            output_path: Some("docs/draft.md".into()),
        },
    );
    node.retry = RetryPolicy { max_attempts: 2, backoff_s: 0.0, jitter_s: 0.0 };
    let graph = Graph::new(vec![node], vec![]);

    let f = fixture(Arc::new(model.clone()), vec![]);
    let run = f.chat_run(graph);
    let env = f.env_for(&run);

    let done = f.runtime.execute(run, &env, Default::default()).await.unwrap();
    assert_eq!(done.status, amon_core::RunStatus::Succeeded);
    assert_eq!(model.call_count(), 2);
    assert_eq!(
        std::fs::read_to_string(f.env.paths.root().join("docs/draft.md")).unwrap(),
        "recovered"
    );

    let events = env.run_log.read_since(0, 1000).unwrap();
    assert!(kinds(&events).contains(&EventKind::NodeRetried));
}

#[tokio::test]
async fn denial_fails_without_retry() {
    let tool = FakeTool::new("danger.wipe");
    let mut node = NodeSpec::new(
        "wipe",
        NodeKind::ToolCall { tool: "danger.wipe".into(), args: json!({}) },
    );
    node.retry = RetryPolicy { max_attempts: 3, backoff_s: 0.0, jitter_s: 0.0 };
    let graph = Graph::new(vec![node], vec![]);

    let tool_handle = tool.clone();
    let f = fixture(Arc::new(NullChatModel), vec![Arc::new(tool)]);
    let run = f.chat_run(graph);
    let env = f.env_for(&run);

    let done = f.runtime.execute(run, &env, Default::default()).await.unwrap();
    assert_eq!(done.status, amon_core::RunStatus::Failed);
    // Deny is final: the tool itself was never invoked, and no retries ran.
    assert_eq!(tool_handle.calls().len(), 0);
    assert_eq!(done.node_state("wipe").unwrap().attempts, 1);

    let events = env.run_log.read_since(0, 1000).unwrap();
    assert!(kinds(&events).contains(&EventKind::ToolDenied));
    assert!(!kinds(&events).contains(&EventKind::NodeRetried));
}

#[tokio::test]
async fn path_traversal_denied_and_audited() {
    let tool = FakeTool::new("fs.read");
    let node = NodeSpec::new(
        "read",
        NodeKind::ToolCall {
            tool: "fs.read".into(),
            args: json!({"path": "../../etc/passwd"}),
        },
    );
    let graph = Graph::new(vec![node], vec![]);
    let f = fixture(Arc::new(NullChatModel), vec![Arc::new(tool)]);
    let run = f.chat_run(graph);
    let env = f.env_for(&run);

    let done = f.runtime.execute(run, &env, Default::default()).await.unwrap();
    assert_eq!(done.status, amon_core::RunStatus::Failed);
    let error = done.node_state("read").unwrap().error.clone().unwrap();
    assert!(error.contains("PATH_NOT_ALLOWED"), "{error}");
    assert_eq!(done.node_state("read").unwrap().attempts, 1);
}

#[tokio::test]
async fn budget_blocked_automation_run_parks() {
    let model = FakeChatModel::new();
    let node = NodeSpec::new(
        "draft",
        NodeKind::AgentTask { prompt: "write".into(), model: None, output_path: None },
    );
    let graph = Graph::new(vec![node], vec![]);

    let f = fixture(Arc::new(model.clone()), vec![]);
    // Schedule-triggered run with automation budget 0
    let run = amon_core::Run::new(
        f.project_id,
        Trigger::new(TriggerKind::Schedule, "nightly"),
        graph,
    )
    .allow_llm(true);
    let env = f.env_for(&run);

    let done = f.runtime.execute(run, &env, Default::default()).await.unwrap();
    assert_eq!(done.status, amon_core::RunStatus::PendingConfirmation);
    // The model was never called
    assert_eq!(model.call_count(), 0);

    let events = env.run_log.read_since(0, 1000).unwrap();
    assert!(kinds(&events).contains(&EventKind::BillingBudgetExceeded));
    assert!(kinds(&events).contains(&EventKind::RunPendingConfirmation));

    // Approving unlocks the model and completes the run.
    let resumed = f
        .runtime
        .confirm_run(&done.run_id, &env, true, Default::default())
        .await
        .unwrap();
    assert_eq!(resumed.status, amon_core::RunStatus::Succeeded);
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn confirm_node_parks_then_approval_resumes() {
    let confirm = NodeSpec::new(
        "gate",
        NodeKind::Confirm {
            command: "deploy".into(),
            args: json!({"env": "prod"}),
            risk: amon_core::Risk::High,
            expiry_s: 3600,
        },
    );
    let graph = Graph::new(
        vec![write_node("before", "docs/before.md"), confirm, write_node("after", "docs/after.md")],
        vec![Edge::new("before", "gate"), Edge::new("gate", "after")],
    );
    let f = fixture(Arc::new(NullChatModel), vec![]);
    let run = f.chat_run(graph);
    let env = f.env_for(&run);

    let parked = f.runtime.execute(run, &env, Default::default()).await.unwrap();
    assert_eq!(parked.status, amon_core::RunStatus::PendingConfirmation);
    assert!(f.env.paths.root().join("docs/before.md").is_file());
    assert!(!f.env.paths.root().join("docs/after.md").exists());

    // Plan card persisted
    let plan: amon_core::PlanCard =
        serde_json::from_slice(&std::fs::read(f.env.paths.run_plan_file(&parked.run_id)).unwrap())
            .unwrap();
    assert_eq!(plan.command, "deploy");

    let resumed = f
        .runtime
        .confirm_run(&parked.run_id, &env, true, Default::default())
        .await
        .unwrap();
    assert_eq!(resumed.status, amon_core::RunStatus::Succeeded);
    assert!(f.env.paths.root().join("docs/after.md").is_file());
}

#[tokio::test]
async fn rejected_confirmation_cancels_but_retains_artifacts() {
    let confirm = NodeSpec::new(
        "gate",
        NodeKind::Confirm {
            command: "deploy".into(),
            args: json!({}),
            risk: amon_core::Risk::Medium,
            expiry_s: 3600,
        },
    );
    let graph = Graph::new(
        vec![write_node("before", "docs/before.md"), confirm, write_node("after", "docs/after.md")],
        vec![Edge::new("before", "gate"), Edge::new("gate", "after")],
    );
    let f = fixture(Arc::new(NullChatModel), vec![]);
    let run = f.chat_run(graph);
    let env = f.env_for(&run);

    let parked = f.runtime.execute(run, &env, Default::default()).await.unwrap();
    let rejected = f
        .runtime
        .confirm_run(&parked.run_id, &env, false, Default::default())
        .await
        .unwrap();
    assert_eq!(rejected.status, amon_core::RunStatus::Cancelled);
    // Already-written artifacts stay.
    assert!(f.env.paths.root().join("docs/before.md").is_file());
    assert!(!f.env.paths.root().join("docs/after.md").exists());
}

#[tokio::test]
async fn expired_plan_auto_rejects() {
    let confirm = NodeSpec::new(
        "gate",
        NodeKind::Confirm {
            command: "deploy".into(),
            args: json!({}),
            risk: amon_core::Risk::Low,
            expiry_s: 0,
        },
    );
    let graph = Graph::new(vec![confirm], vec![]);
    let f = fixture(Arc::new(NullChatModel), vec![]);
    let run = f.chat_run(graph);
    let env = f.env_for(&run);

    let parked = f.runtime.execute(run, &env, Default::default()).await.unwrap();
    assert_eq!(parked.status, amon_core::RunStatus::PendingConfirmation);

    let expired = f.runtime.expire_parked(&parked.run_id, &env).unwrap().unwrap();
    assert_eq!(expired.status, amon_core::RunStatus::Cancelled);

    // A second sweep is a no-op.
    assert!(f.runtime.expire_parked(&parked.run_id, &env).unwrap().is_none());
}

#[tokio::test]
async fn map_fans_out_bounded() {
    let seed = NodeSpec::new("seed", NodeKind::ToolCall { tool: "emit".into(), args: json!({}) })
        .writes(vec!["items".into()]);
    let map = NodeSpec::new(
        "fan",
        NodeKind::Map {
            over: "items".into(),
            template: Box::new(NodeKind::WriteFile {
                content: "review of {item}".into(),
                output_path: "docs/reviews/{index}.md".into(),
            }),
            max_children: Some(2),
        },
    )
    .writes(vec!["reviews".into()]);
    let graph = Graph::new(vec![seed, map], vec![Edge::new("seed", "fan")]);

    let tool = FakeTool::new("emit").respond_with(json!(["a", "b", "c"]));
    let f = fixture(Arc::new(NullChatModel), vec![Arc::new(tool)]);
    let run = f.chat_run(graph);
    let env = f.env_for(&run);

    let done = f.runtime.execute(run, &env, Default::default()).await.unwrap();
    assert_eq!(done.status, amon_core::RunStatus::Succeeded);
    // Capped at 2 children
    assert!(f.env.paths.root().join("docs/reviews/0.md").is_file());
    assert!(f.env.paths.root().join("docs/reviews/1.md").is_file());
    assert!(!f.env.paths.root().join("docs/reviews/2.md").exists());
    assert_eq!(
        std::fs::read_to_string(f.env.paths.root().join("docs/reviews/0.md")).unwrap(),
        "review of a"
    );
}

#[tokio::test(start_paused = true)]
async fn inactivity_timeout_fails_node() {
    struct SlowTool;
    #[async_trait::async_trait]
    impl amon_adapters::Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        async fn invoke(
            &self,
            _args: serde_json::Value,
        ) -> Result<serde_json::Value, amon_adapters::ToolError> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(json!("done"))
        }
    }

    let mut node =
        NodeSpec::new("slow", NodeKind::ToolCall { tool: "slow".into(), args: json!({}) });
    node.timeout = Timeouts { inactivity_s: 2, hard_s: 600, warning_after_s: Some(1) };
    let graph = Graph::new(vec![node], vec![]);

    let f = fixture(Arc::new(NullChatModel), vec![Arc::new(SlowTool)]);
    let run = f.chat_run(graph);
    let env = f.env_for(&run);

    let done = f.runtime.execute(run, &env, Default::default()).await.unwrap();
    assert_eq!(done.status, amon_core::RunStatus::Failed);
    let error = done.node_state("slow").unwrap().error.clone().unwrap();
    assert!(error.contains("TIMEOUT"), "{error}");

    // Soft warning preceded the timeout
    let events = env.run_log.read_since(0, 1000).unwrap();
    assert!(kinds(&events).contains(&EventKind::NodeWarning));
}

#[tokio::test(start_paused = true)]
async fn cancellation_skips_pending_and_cancels_run() {
    struct SlowTool;
    #[async_trait::async_trait]
    impl amon_adapters::Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        async fn invoke(
            &self,
            _args: serde_json::Value,
        ) -> Result<serde_json::Value, amon_adapters::ToolError> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(json!("done"))
        }
    }

    let slow = NodeSpec::new("slow", NodeKind::ToolCall { tool: "slow".into(), args: json!({}) });
    let graph = Graph::new(
        vec![slow, write_node("after", "docs/after.md")],
        vec![Edge::new("slow", "after")],
    );
    let f = fixture(Arc::new(NullChatModel), vec![Arc::new(SlowTool)]);
    let run = f.chat_run(graph);
    let env = f.env_for(&run);

    let cancel = tokio_util::sync::CancellationToken::new();
    let handle = {
        let runtime = f.runtime.clone();
        let env = env.clone();
        let token = cancel.clone();
        tokio::spawn(async move { runtime.execute(run, &env, token).await })
    };
    tokio::task::yield_now().await;
    cancel.cancel();

    let done = handle.await.unwrap().unwrap();
    assert_eq!(done.status, amon_core::RunStatus::Cancelled);
    assert_eq!(done.node_state("after").unwrap().status, amon_core::NodeStatus::Skipped);
    let slow_state = done.node_state("slow").unwrap();
    assert_eq!(slow_state.status, amon_core::NodeStatus::Failed);
    assert!(slow_state.error.as_deref().unwrap_or("").contains("CANCELLED"));
}

#[tokio::test]
async fn agent_task_streams_tokens_to_bus() {
    let model = FakeChatModel::new().respond("streamed answer");
    let node = NodeSpec::new(
        "draft",
        NodeKind::AgentTask { prompt: "write".into(), model: None, output_path: None },
    );
    let graph = Graph::new(vec![node], vec![]);

    let f = fixture(Arc::new(model), vec![]);
    let sub = f.runtime.bus().subscribe(|e| e.kind == EventKind::ChatToken);
    let run = f.chat_run(graph);
    let env = f.env_for(&run);

    f.runtime.execute(run, &env, Default::default()).await.unwrap();

    let mut streamed = String::new();
    while let Some(event) = sub.try_recv() {
        streamed.push_str(event.payload["text"].as_str().unwrap_or_default());
    }
    assert_eq!(streamed, "streamed answer");
}

#[tokio::test]
async fn state_file_tracks_session_and_survives_reload() {
    let seed = NodeSpec::new("seed", NodeKind::ToolCall { tool: "emit".into(), args: json!({}) })
        .writes(vec!["draft".into()]);
    let graph = Graph::new(vec![seed], vec![]);

    let tool = FakeTool::new("emit").respond_with(json!("the draft"));
    let f = fixture(Arc::new(NullChatModel), vec![Arc::new(tool)]);
    let run = f.chat_run(graph);
    let env = f.env_for(&run);

    let done = f.runtime.execute(run, &env, Default::default()).await.unwrap();
    let state = f.runtime.load_state(&done.run_id, &env).unwrap();
    assert_eq!(state.session.get("draft"), Some(&json!("the draft")));
    assert_eq!(state.run.status, amon_core::RunStatus::Succeeded);
}
