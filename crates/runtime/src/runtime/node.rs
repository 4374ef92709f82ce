// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-node execution: dispatch by node kind, retry/backoff, timeouts.

use super::Emitter;
use crate::artifact::ArtifactRecorder;
use crate::budget::{BudgetDenial, BudgetGate};
use crate::runtime::RuntimeDeps;
use amon_adapters::{ChatRequest, SandboxRequest};
use amon_core::graph::{eval_guard, is_truthy};
use amon_core::{
    Clock, ErrorKind, EventKind, NodeId, NodeKind, NodeSpec, PlanCard, ProjectPaths, SystemClock,
    Timeouts, TriggerKind,
};
use amon_policy::{Caller, Decision, PathVault, PolicyGate};
use amon_storage::{save_json_atomic, EventLog};
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What executing one node produced.
#[derive(Debug)]
pub(crate) enum NodeOutcome {
    Success(Value),
    Failed { kind: ErrorKind, message: String, attempts: u32 },
    Park(ParkReason),
}

/// Why a node parked its run.
#[derive(Debug)]
pub(crate) enum ParkReason {
    Plan(PlanCard),
    Budget { message: String },
}

/// Everything a node needs, cheap to clone into its task.
#[derive(Clone)]
pub(crate) struct NodeCtx {
    pub deps: RuntimeDeps,
    pub emitter: Arc<Emitter>,
    pub gate: Arc<PolicyGate>,
    pub vault: PathVault,
    pub paths: ProjectPaths,
    pub billing_log: Arc<EventLog>,
    pub artifacts: Arc<ArtifactRecorder>,
    pub session: Arc<Mutex<HashMap<String, Value>>>,
    pub caller: Caller,
    pub budget: Arc<BudgetGate>,
    pub automation_budget_daily: f64,
    pub trigger: TriggerKind,
    pub allow_llm: bool,
    pub budget_override: bool,
    pub map_max_children: usize,
    pub cancel: CancellationToken,
}

/// Execute a node with its retry policy. Timeouts apply per attempt.
///
/// Returns a boxed future: `run_node` recurses indirectly through
/// `map_node`, and without this indirection the compiler cannot resolve
/// the auto-trait (`Send`) obligations of the resulting self-referential
/// future type.
pub(crate) fn run_node<'a>(
    ctx: &'a NodeCtx,
    spec: &'a NodeSpec,
) -> BoxFuture<'a, NodeOutcome> {
    Box::pin(run_node_inner(ctx, spec))
}

async fn run_node_inner(ctx: &NodeCtx, spec: &NodeSpec) -> NodeOutcome {
    let max = spec.retry.max_attempts.max(1);
    for attempt in 1..=max {
        if attempt > 1 {
            let backoff = spec.retry.backoff_for_attempt(attempt - 1);
            let wait = backoff + jitter(spec.retry.jitter_s);
            ctx.emitter.emit(
                EventKind::NodeRetried,
                Some(&spec.id),
                serde_json::json!({"attempt": attempt, "backoff_s": wait}),
            );
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs_f64(wait)) => {}
                _ = ctx.cancel.cancelled() => {
                    return NodeOutcome::Failed {
                        kind: ErrorKind::Cancelled,
                        message: "cancelled".into(),
                        attempts: attempt,
                    };
                }
            }
        }

        match supervise(ctx, spec, attempt).await {
            NodeOutcome::Failed { kind, message, .. } if kind.is_retryable() && attempt < max => {
                tracing::warn!(
                    node = %spec.id,
                    attempt,
                    error = %message,
                    "node attempt failed, retrying"
                );
            }
            outcome => return outcome,
        }
    }
    // Unreachable: the loop always returns on the last attempt.
    NodeOutcome::Failed {
        kind: ErrorKind::IoError,
        message: "retries exhausted".into(),
        attempts: max,
    }
}

/// Uniform jitter in `[0, max_s]`, seeded from UUID entropy so the runtime
/// carries no RNG dependency.
fn jitter(max_s: f64) -> f64 {
    if max_s <= 0.0 {
        return 0.0;
    }
    let bytes = uuid::Uuid::new_v4().into_bytes();
    let n = u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]);
    max_s * (n as f64 / u64::MAX as f64)
}

/// Run one attempt under the node's timeouts. The inactivity window resets
/// on every progress token; `hard_s` is absolute; `warning_after_s` emits a
/// single non-terminal warning.
async fn supervise(ctx: &NodeCtx, spec: &NodeSpec, attempt: u32) -> NodeOutcome {
    let (progress_tx, mut progress_rx) = mpsc::channel::<()>(64);
    let Timeouts { inactivity_s, hard_s, warning_after_s } = spec.timeout.clone();

    let start = Instant::now();
    let hard_deadline = start + Duration::from_secs(hard_s.max(1));
    let mut inactivity_deadline = start + Duration::from_secs(inactivity_s.max(1));
    let far_future = start + Duration::from_secs(86_400 * 365);
    let mut warning_deadline =
        warning_after_s.map(|s| start + Duration::from_secs(s)).unwrap_or(far_future);

    let mut work = Box::pin(execute_kind(ctx, spec, progress_tx, attempt));
    let mut progress_open = true;

    loop {
        tokio::select! {
            outcome = &mut work => return outcome,
            _ = ctx.cancel.cancelled() => {
                return NodeOutcome::Failed {
                    kind: ErrorKind::Cancelled,
                    message: "cancelled".into(),
                    attempts: attempt,
                };
            }
            received = progress_rx.recv(), if progress_open => {
                match received {
                    Some(()) => {
                        inactivity_deadline =
                            Instant::now() + Duration::from_secs(inactivity_s.max(1));
                    }
                    None => progress_open = false,
                }
            }
            _ = tokio::time::sleep_until(warning_deadline) => {
                ctx.emitter.emit(
                    EventKind::NodeWarning,
                    Some(&spec.id),
                    serde_json::json!({"message": "no progress yet", "after_s": warning_after_s}),
                );
                warning_deadline = far_future;
            }
            _ = tokio::time::sleep_until(inactivity_deadline) => {
                return NodeOutcome::Failed {
                    kind: ErrorKind::Timeout,
                    message: format!("no progress for {inactivity_s}s"),
                    attempts: attempt,
                };
            }
            _ = tokio::time::sleep_until(hard_deadline) => {
                return NodeOutcome::Failed {
                    kind: ErrorKind::Timeout,
                    message: format!("exceeded hard cap of {hard_s}s"),
                    attempts: attempt,
                };
            }
        }
    }
}

/// Dispatch table over the closed node kind set.
async fn execute_kind(
    ctx: &NodeCtx,
    spec: &NodeSpec,
    progress: mpsc::Sender<()>,
    attempt: u32,
) -> NodeOutcome {
    match &spec.kind {
        NodeKind::AgentTask { prompt, model, output_path } => {
            agent_task(ctx, spec, prompt, model.as_deref(), output_path.as_deref(), progress, attempt)
                .await
        }
        NodeKind::WriteFile { content, output_path } => {
            write_file(ctx, spec, content, output_path, attempt)
        }
        NodeKind::ToolCall { tool, args } => tool_call(ctx, spec, tool, args, attempt).await,
        NodeKind::Condition { predicate } => {
            let result = {
                let session = ctx.session.lock();
                eval_guard(predicate, &session)
            };
            apply_writes(ctx, spec, Value::Bool(result));
            NodeOutcome::Success(Value::Bool(result))
        }
        NodeKind::Map { over, template, max_children } => {
            map_node(ctx, spec, over, template, *max_children, attempt).await
        }
        NodeKind::SandboxRun { command, args, output_path } => {
            sandbox_run(ctx, spec, command, args, output_path.as_deref(), attempt).await
        }
        NodeKind::Confirm { command, args, risk, expiry_s } => {
            let card = PlanCard {
                run_id: ctx.caller.run_id.unwrap_or_else(|| amon_core::RunId::from_string("")),
                node_id: NodeId::from_string(&spec.id),
                command: command.clone(),
                args: args.clone(),
                risk: *risk,
                expiry: SystemClock.now_utc() + chrono::Duration::seconds(*expiry_s as i64),
            };
            NodeOutcome::Park(ParkReason::Plan(card))
        }
    }
}

async fn agent_task(
    ctx: &NodeCtx,
    spec: &NodeSpec,
    prompt: &str,
    model: Option<&str>,
    output_path: Option<&str>,
    progress: mpsc::Sender<()>,
    attempt: u32,
) -> NodeOutcome {
    // Budget gate runs before any provider traffic.
    if !ctx.budget_override {
        if !ctx.allow_llm {
            let message = "llm not permitted for this run".to_string();
            emit_budget_exceeded(ctx, spec, &message);
            return NodeOutcome::Park(ParkReason::Budget { message });
        }
        let now = SystemClock.now_utc();
        if let Err(denial) = ctx.budget.check(
            &ctx.caller.project_id,
            ctx.trigger,
            ctx.automation_budget_daily,
            now,
        ) {
            let message = match denial {
                BudgetDenial::DailyExceeded { spent, budget } => {
                    format!("daily budget exceeded: spent {spent:.4} of {budget:.4}")
                }
                BudgetDenial::AutomationBlocked { spent, budget } => {
                    format!("automation budget exhausted: spent {spent:.4} of {budget:.4}")
                }
            };
            emit_budget_exceeded(ctx, spec, &message);
            return NodeOutcome::Park(ParkReason::Budget { message });
        }
    }

    let rendered = render(prompt, &ctx.session.lock());
    let request = {
        let mut req = ChatRequest::new(rendered);
        if let Some(m) = model {
            req = req.model(m);
        }
        req
    };

    // Forward streamed tokens to the inactivity timer and the live bus.
    let (token_tx, mut token_rx) = mpsc::channel::<String>(256);
    let emitter = Arc::clone(&ctx.emitter);
    let node_id = spec.id.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(chunk) = token_rx.recv().await {
            let _ = progress.try_send(());
            emitter.emit(
                EventKind::ChatToken,
                Some(&node_id),
                serde_json::json!({"text": chunk}),
            );
        }
    });

    let result = ctx.deps.model.complete(request, token_tx).await;
    let _ = forwarder.await;

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            return NodeOutcome::Failed { kind: e.kind(), message: e.to_string(), attempts: attempt }
        }
    };

    ctx.budget.record(ctx.caller.project_id, response.usage.cost_usd, SystemClock.now_utc());
    let billing_event = amon_core::Event::new(EventKind::BillingUsage)
        .project_id(ctx.caller.project_id)
        .payload(serde_json::json!({
            "input_tokens": response.usage.input_tokens,
            "output_tokens": response.usage.output_tokens,
            "cost_usd": response.usage.cost_usd,
        }));
    if let Err(e) = ctx.billing_log.append(billing_event) {
        tracing::error!(error = %e, "billing append failed");
    }

    if let Some(path_template) = output_path {
        let rel = render(path_template, &ctx.session.lock());
        if let Err(outcome) = write_artifact(ctx, spec, &rel, response.text.as_bytes(), attempt) {
            return outcome;
        }
    }

    apply_writes(ctx, spec, Value::String(response.text.clone()));
    NodeOutcome::Success(Value::String(response.text))
}

fn emit_budget_exceeded(ctx: &NodeCtx, spec: &NodeSpec, message: &str) {
    ctx.emitter.emit(
        EventKind::BillingBudgetExceeded,
        Some(&spec.id),
        serde_json::json!({"message": message}),
    );
    let billing_event = amon_core::Event::new(EventKind::BillingBudgetExceeded)
        .project_id(ctx.caller.project_id)
        .payload(serde_json::json!({"message": message}));
    if let Err(e) = ctx.billing_log.append(billing_event) {
        tracing::error!(error = %e, "billing append failed");
    }
}

fn write_file(
    ctx: &NodeCtx,
    spec: &NodeSpec,
    content: &str,
    output_path: &str,
    attempt: u32,
) -> NodeOutcome {
    let rendered = render(content, &ctx.session.lock());
    let rel = render(output_path, &ctx.session.lock());
    if let Err(outcome) = write_artifact(ctx, spec, &rel, rendered.as_bytes(), attempt) {
        return outcome;
    }
    apply_writes(ctx, spec, Value::String(rel.clone()));
    NodeOutcome::Success(Value::String(rel))
}

/// Gate + atomic write + artifact record. Returns `Err(outcome)` on denial
/// or I/O failure so callers can bail with `?`-like flow.
fn write_artifact(
    ctx: &NodeCtx,
    spec: &NodeSpec,
    rel: &str,
    bytes: &[u8],
    attempt: u32,
) -> Result<(), NodeOutcome> {
    let decision = ctx.gate.decide_write(rel, &ctx.caller);
    if decision.is_denied() {
        return Err(NodeOutcome::Failed {
            kind: ErrorKind::PathNotAllowed,
            message: decision.reason.unwrap_or_else(|| "write denied".into()),
            attempts: attempt,
        });
    }
    let abs = ctx.paths.root().join(rel);
    let existed = abs.exists();
    if let Err(e) = ctx.vault.atomic_write(&abs, bytes) {
        return Err(NodeOutcome::Failed {
            kind: ErrorKind::IoError,
            message: e.to_string(),
            attempts: attempt,
        });
    }
    if let Err(e) = ctx.artifacts.record(rel, &spec.id) {
        tracing::warn!(error = %e, path = rel, "artifact record failed");
    }

    // Announce the write with actor `system` so hook rules filtering on
    // actors can tell runtime output from user edits, and the watcher can
    // suppress the echo from the filesystem.
    let doc_kind = if rel.starts_with("docs/") {
        Some(if existed { EventKind::DocUpdated } else { EventKind::DocCreated })
    } else if rel.starts_with("workspace/") {
        Some(if existed {
            EventKind::WorkspaceFileUpdated
        } else {
            EventKind::WorkspaceFileCreated
        })
    } else {
        None
    };
    if let Some(kind) = doc_kind {
        ctx.emitter.emit(
            kind,
            Some(&spec.id),
            serde_json::json!({"path": rel, "size": bytes.len()}),
        );
    }
    Ok(())
}

async fn tool_call(
    ctx: &NodeCtx,
    spec: &NodeSpec,
    tool_name: &str,
    args: &Value,
    attempt: u32,
) -> NodeOutcome {
    let Some(tool) = ctx.deps.tools.get(tool_name) else {
        return NodeOutcome::Failed {
            kind: ErrorKind::ToolDenied,
            message: format!("unknown tool: {tool_name}"),
            attempts: attempt,
        };
    };

    let rendered_args = render_value(args, &ctx.session.lock());
    let decision = ctx.gate.decide(tool_name, &rendered_args, &ctx.caller, tool.risk());
    match decision.decision {
        Decision::Deny => {
            ctx.emitter.emit(
                EventKind::ToolDenied,
                Some(&spec.id),
                serde_json::json!({"tool": tool_name, "reason": decision.reason}),
            );
            return NodeOutcome::Failed {
                kind: if decision.reason.as_deref().unwrap_or("").contains("PATH_NOT_ALLOWED") {
                    ErrorKind::PathNotAllowed
                } else {
                    ErrorKind::ToolDenied
                },
                message: decision.reason.unwrap_or_else(|| "denied".into()),
                attempts: attempt,
            };
        }
        Decision::Ask => {
            let card = PlanCard {
                run_id: ctx.caller.run_id.unwrap_or_else(|| amon_core::RunId::from_string("")),
                node_id: NodeId::from_string(&spec.id),
                command: tool_name.to_string(),
                args: rendered_args,
                risk: tool.risk(),
                expiry: SystemClock.now_utc() + chrono::Duration::hours(1),
            };
            return NodeOutcome::Park(ParkReason::Plan(card));
        }
        Decision::Allow => {}
    }

    ctx.emitter.emit(
        EventKind::ToolCalled,
        Some(&spec.id),
        serde_json::json!({"tool": tool_name}),
    );
    match tool.invoke(rendered_args.clone()).await {
        Ok(result) => {
            ctx.gate.audit_result(tool_name, &rendered_args, &ctx.caller, &result);
            apply_writes(ctx, spec, result.clone());
            NodeOutcome::Success(result)
        }
        Err(e) => NodeOutcome::Failed {
            kind: ErrorKind::IoError,
            message: e.to_string(),
            attempts: attempt,
        },
    }
}

async fn map_node(
    ctx: &NodeCtx,
    spec: &NodeSpec,
    over: &str,
    template: &NodeKind,
    max_children: Option<usize>,
    attempt: u32,
) -> NodeOutcome {
    let items: Vec<Value> = {
        let session = ctx.session.lock();
        match session.get(over) {
            Some(Value::Array(items)) => items.clone(),
            Some(other) if is_truthy(other) => vec![other.clone()],
            _ => Vec::new(),
        }
    };
    let cap = max_children.unwrap_or(ctx.map_max_children);
    if items.len() > cap {
        tracing::warn!(node = %spec.id, items = items.len(), cap, "map fan-out capped");
    }

    // Children inherit the parent's timeouts; retry policy applies per
    // child (run_node handles it).
    let children: Vec<NodeSpec> = items
        .into_iter()
        .take(cap)
        .enumerate()
        .map(|(index, item)| {
            let child_kind = instantiate(template, &item, index);
            NodeSpec {
                id: format!("{}[{}]", spec.id, index),
                kind: child_kind,
                reads: spec.reads.clone(),
                writes: Vec::new(),
                engine: spec.engine,
                retry: spec.retry.clone(),
                timeout: spec.timeout.clone(),
            }
        })
        .collect();
    let mut futures: FuturesUnordered<BoxFuture<'_, (usize, NodeOutcome)>> =
        FuturesUnordered::new();

    for (index, child) in children.iter().enumerate() {
        futures.push(Box::pin(async move { (index, run_node(ctx, child).await) }));
    }

    let mut outputs: Vec<Value> = vec![Value::Null; children.len()];
    let mut failure: Option<(ErrorKind, String)> = None;
    while let Some((index, outcome)) = futures.next().await {
        match outcome {
            NodeOutcome::Success(value) => outputs[index] = value,
            NodeOutcome::Failed { kind, message, .. } => {
                failure.get_or_insert((kind, message));
            }
            NodeOutcome::Park(reason) => {
                drop(futures);
                return NodeOutcome::Park(reason);
            }
        }
    }

    if let Some((kind, message)) = failure {
        return NodeOutcome::Failed { kind, message, attempts: attempt };
    }
    let result = Value::Array(outputs);
    apply_writes(ctx, spec, result.clone());
    NodeOutcome::Success(result)
}

/// Substitute `{item}` and `{index}` into a map template.
fn instantiate(template: &NodeKind, item: &Value, index: usize) -> NodeKind {
    let subst = |text: &str| -> String {
        text.replace("{item}", &value_to_text(item)).replace("{index}", &index.to_string())
    };
    match template {
        NodeKind::AgentTask { prompt, model, output_path } => NodeKind::AgentTask {
            prompt: subst(prompt),
            model: model.clone(),
            output_path: output_path.as_deref().map(subst),
        },
        NodeKind::WriteFile { content, output_path } => {
            NodeKind::WriteFile { content: subst(content), output_path: subst(output_path) }
        }
        NodeKind::ToolCall { tool, args } => {
            let args_text = subst(&args.to_string());
            NodeKind::ToolCall {
                tool: tool.clone(),
                args: serde_json::from_str(&args_text).unwrap_or_else(|_| args.clone()),
            }
        }
        other => other.clone(),
    }
}

async fn sandbox_run(
    ctx: &NodeCtx,
    spec: &NodeSpec,
    command: &str,
    args: &[String],
    output_path: Option<&str>,
    attempt: u32,
) -> NodeOutcome {
    let Some(sandbox) = ctx.deps.sandbox.clone() else {
        return NodeOutcome::Failed {
            kind: ErrorKind::ConfigInvalid,
            message: "no sandbox runner configured".into(),
            attempts: attempt,
        };
    };

    let session = ctx.session.lock().clone();
    let request = SandboxRequest {
        command: render(command, &session),
        args: args.iter().map(|a| render(a, &session)).collect(),
        input_paths: Vec::new(),
        env: Default::default(),
    };

    let result = match sandbox.exec(request).await {
        Ok(result) => result,
        Err(e) => {
            return NodeOutcome::Failed {
                kind: ErrorKind::IoError,
                message: e.to_string(),
                attempts: attempt,
            }
        }
    };

    if let Some(run_id) = &ctx.caller.run_id {
        let path = ctx.paths.run_sandbox_result_file(run_id);
        if let Err(e) = save_json_atomic(&path, &result) {
            tracing::warn!(error = %e, "sandbox result persist failed");
        }
    }

    if !result.success() {
        return NodeOutcome::Failed {
            kind: ErrorKind::IoError,
            message: format!("sandbox exited {}: {}", result.exit_code, result.stderr),
            attempts: attempt,
        };
    }

    if let Some(path_template) = output_path {
        let rel = render(path_template, &ctx.session.lock());
        if let Err(outcome) = write_artifact(ctx, spec, &rel, result.stdout.as_bytes(), attempt) {
            return outcome;
        }
    }

    apply_writes(ctx, spec, Value::String(result.stdout.clone()));
    NodeOutcome::Success(Value::String(result.stdout))
}

/// Record a node's output into its declared write keys.
fn apply_writes(ctx: &NodeCtx, spec: &NodeSpec, output: Value) {
    let mut session = ctx.session.lock();
    for key in spec.write_keys() {
        session.insert(key.to_string(), output.clone());
    }
}

/// Substitute `{key}` placeholders from session state.
fn render(template: &str, session: &HashMap<String, Value>) -> String {
    let mut out = template.to_string();
    for (key, value) in session {
        let placeholder = format!("{{{key}}}");
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, &value_to_text(value));
        }
    }
    out
}

fn render_value(value: &Value, session: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(s) => Value::String(render(s, session)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| render_value(v, session)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter().map(|(k, v)| (k.clone(), render_value(v, session))).collect(),
        ),
        other => other.clone(),
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
