// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Graph runtime: executes a resolved DAG with ordering, retries,
//! timeouts, cancellation, and durable events.
//!
//! One `drive` loop owns a run: it computes the ready set, executes nodes
//! on a bounded worker pool (declaration order is the tie-break), applies
//! outcomes, and persists `state.json` after every transition. A `confirm`
//! node or an exhausted budget parks the run in `pending_confirmation`;
//! [`GraphRuntime::confirm_run`] resumes or rejects it later.

mod emit;
mod node;

pub(crate) use emit::Emitter;

use crate::artifact::ArtifactRecorder;
use crate::budget::BudgetGate;
use crate::bus::EventBus;
use crate::error::RuntimeError;
use amon_adapters::{ChatModel, SandboxRunner, ToolRegistry};
use amon_core::{
    Clock, ErrorKind, Event, EventKind, EventSource, NodeStatus, PlanCard, ProjectPaths, Run,
    RunId, RunStatus, RuntimeConfig, TriggerKind,
};
use amon_policy::{PathVault, PolicyGate};
use amon_storage::{load_json, save_json_atomic, EventLog};
use node::{NodeCtx, NodeOutcome, ParkReason};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Capabilities the runtime consumes.
#[derive(Clone)]
pub struct RuntimeDeps {
    pub model: Arc<dyn ChatModel>,
    pub tools: ToolRegistry,
    pub sandbox: Option<Arc<dyn SandboxRunner>>,
}

/// Per-run environment: where this run's project lives and which durable
/// streams it writes.
#[derive(Clone)]
pub struct RunEnv {
    pub paths: ProjectPaths,
    pub gate: Arc<PolicyGate>,
    pub vault: PathVault,
    /// The run's own `events.jsonl`.
    pub run_log: Arc<EventLog>,
    /// The project's `.amon/logs/events.log`.
    pub project_log: Arc<EventLog>,
    /// The project's `.amon/logs/billing.log`.
    pub billing_log: Arc<EventLog>,
    pub budget: Arc<BudgetGate>,
    /// Project's `automation_budget_daily` (applies to daemon triggers).
    pub automation_budget_daily: f64,
}

/// On-disk shape of `.amon/runs/<run_id>/state.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStateFile {
    pub run: Run,
    /// Session state the nodes read and write.
    #[serde(default)]
    pub session: HashMap<String, Value>,
    /// Set when a budget-parked run was approved by the user.
    #[serde(default)]
    pub budget_override: bool,
}

/// The runtime itself. Cheap to clone per run.
#[derive(Clone)]
pub struct GraphRuntime<C: Clock> {
    deps: RuntimeDeps,
    bus: EventBus,
    clock: C,
    config: RuntimeConfig,
}

impl<C: Clock + 'static> GraphRuntime<C> {
    pub fn new(deps: RuntimeDeps, bus: EventBus, clock: C, config: RuntimeConfig) -> Self {
        Self { deps, bus, clock, config }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Execute a run to a terminal status or to `pending_confirmation`.
    ///
    /// The resolved graph and state are persisted under the run directory
    /// before the first node starts.
    pub async fn execute(
        &self,
        run: Run,
        env: &RunEnv,
        cancel: CancellationToken,
    ) -> Result<Run, RuntimeError> {
        run.graph.validate()?;
        let run_id = run.run_id;
        std::fs::create_dir_all(env.paths.run_dir(&run_id))?;
        env.vault
            .atomic_write(&env.paths.run_graph_file(&run_id), run.graph.dump()?.as_bytes())?;

        let state = RunStateFile { run, session: HashMap::new(), budget_override: false };
        save_json_atomic(&env.paths.run_state_file(&run_id), &state)?;

        self.drive(state, env, cancel).await
    }

    /// Resume or reject a parked run.
    pub async fn confirm_run(
        &self,
        run_id: &RunId,
        env: &RunEnv,
        approve: bool,
        cancel: CancellationToken,
    ) -> Result<Run, RuntimeError> {
        let mut state = self.load_state(run_id, env)?;
        if state.run.status != RunStatus::PendingConfirmation {
            return Err(RuntimeError::NotPending(run_id.to_string()));
        }
        let emitter = self.emitter(&state.run, env);

        if !approve {
            return self.reject_parked(state, env, &emitter);
        }

        // A plan park recorded the confirm node; approving completes it.
        // A budget park has no plan file and instead unlocks the model.
        if let Some(plan) = load_json::<PlanCard>(&env.paths.run_plan_file(run_id))? {
            let node_state = state.run.node_state_mut(plan.node_id.as_str());
            node_state.status = NodeStatus::Succeeded;
            node_state.output = Some(Value::Bool(true));
            node_state.finished_at = Some(self.clock.now_utc());
            emitter.emit(EventKind::NodeSucceeded, Some(plan.node_id.as_str()), Value::Null);
        } else {
            state.budget_override = true;
        }

        state.run.status = RunStatus::Running;
        emitter.emit(EventKind::RunResumed, None, Value::Null);
        save_json_atomic(&env.paths.run_state_file(run_id), &state)?;
        self.drive(state, env, cancel).await
    }

    /// Auto-reject a parked run whose plan card expired. Returns the run
    /// when it was expired, `None` when it is still waiting.
    pub fn expire_parked(&self, run_id: &RunId, env: &RunEnv) -> Result<Option<Run>, RuntimeError> {
        let state = self.load_state(run_id, env)?;
        if state.run.status != RunStatus::PendingConfirmation {
            return Ok(None);
        }
        let Some(plan) = load_json::<PlanCard>(&env.paths.run_plan_file(run_id))? else {
            return Ok(None);
        };
        if !plan.is_expired(self.clock.now_utc()) {
            return Ok(None);
        }
        let emitter = self.emitter(&state.run, env);
        let run = self.reject_parked(state, env, &emitter)?;
        Ok(Some(run))
    }

    pub fn load_state(&self, run_id: &RunId, env: &RunEnv) -> Result<RunStateFile, RuntimeError> {
        load_json::<RunStateFile>(&env.paths.run_state_file(run_id))?
            .ok_or_else(|| RuntimeError::RunNotFound(run_id.to_string()))
    }

    fn reject_parked(
        &self,
        mut state: RunStateFile,
        env: &RunEnv,
        emitter: &Emitter,
    ) -> Result<Run, RuntimeError> {
        // Artifacts already written stay on disk; rejection only stops
        // future work.
        state.run.patch_status(RunStatus::Cancelled, Some(self.clock.now_utc()));
        for node_state in state.run.state.values_mut() {
            if node_state.status == NodeStatus::Pending || node_state.status == NodeStatus::Running
            {
                node_state.status = NodeStatus::Skipped;
            }
        }
        save_json_atomic(&env.paths.run_state_file(&state.run.run_id), &state)?;
        emitter.emit(
            EventKind::RunCompleted,
            None,
            serde_json::json!({"status": "cancelled"}),
        );
        let _ = env.run_log.flush();
        Ok(state.run)
    }

    fn emitter(&self, run: &Run, env: &RunEnv) -> Emitter {
        Emitter::new(
            Arc::clone(&env.run_log),
            Arc::clone(&env.project_log),
            self.bus.clone(),
            run.project_id,
            run.run_id,
            run.chat_id,
            trigger_source(run.trigger.kind),
        )
    }

    /// The scheduling loop.
    async fn drive(
        &self,
        mut state: RunStateFile,
        env: &RunEnv,
        cancel: CancellationToken,
    ) -> Result<Run, RuntimeError> {
        let run_id = state.run.run_id;
        let emitter = Arc::new(self.emitter(&state.run, env));
        let session = Arc::new(Mutex::new(std::mem::take(&mut state.session)));
        let artifacts = Arc::new(ArtifactRecorder::new(env.paths.clone(), run_id));

        if state.run.status == RunStatus::Queued {
            state.run.status = RunStatus::Running;
            state.run.started_at = self.clock.now_utc();
            emitter.emit(
                EventKind::RunStarted,
                None,
                serde_json::json!({"trigger": state.run.trigger}),
            );
        }

        let caller = amon_policy::Caller {
            project_id: state.run.project_id,
            run_id: Some(run_id),
            chat_id: state.run.chat_id,
            source: trigger_source(state.run.trigger.kind),
        };

        let ctx = NodeCtx {
            deps: self.deps.clone(),
            emitter: Arc::clone(&emitter),
            gate: Arc::clone(&env.gate),
            vault: env.vault.clone(),
            paths: env.paths.clone(),
            billing_log: Arc::clone(&env.billing_log),
            artifacts: Arc::clone(&artifacts),
            session: Arc::clone(&session),
            caller,
            budget: Arc::clone(&env.budget),
            automation_budget_daily: env.automation_budget_daily,
            trigger: state.run.trigger.kind,
            allow_llm: state.run.allow_llm,
            budget_override: state.budget_override,
            map_max_children: self.config.map_max_children,
            cancel: cancel.child_token(),
        };

        let mut joins: JoinSet<(String, NodeOutcome)> = JoinSet::new();
        let mut in_flight = 0usize;
        let mut parked: Option<ParkReason> = None;

        loop {
            if cancel.is_cancelled() {
                return self.finish_cancelled(state, session, env, &emitter, joins).await;
            }

            if parked.is_none() {
                // Transitive skips to fixpoint first, then fill the pool
                // with ready nodes.
                let ready = loop {
                    let (ready, skip) = {
                        let session_guard = session.lock();
                        plan_step(&state.run, &session_guard)
                    };
                    if skip.is_empty() {
                        break ready;
                    }
                    for node_id in skip {
                        let node_state = state.run.node_state_mut(&node_id);
                        node_state.status = NodeStatus::Skipped;
                        node_state.finished_at = Some(self.clock.now_utc());
                        emitter.emit(EventKind::NodeSkipped, Some(&node_id), Value::Null);
                    }
                };
                for node_id in ready {
                    if in_flight >= self.config.max_parallel_nodes {
                        break;
                    }
                    let Some(spec) = state.run.graph.node(&node_id).cloned() else { continue };
                    let node_state = state.run.node_state_mut(&node_id);
                    node_state.status = NodeStatus::Running;
                    node_state.started_at = Some(self.clock.now_utc());
                    let id = emitter.emit(
                        EventKind::NodeStarted,
                        Some(&node_id),
                        serde_json::json!({"kind": spec.kind.name()}),
                    );
                    state.run.node_state_mut(&node_id).events.push(id);

                    let ctx = ctx.clone();
                    in_flight += 1;
                    joins.spawn(async move {
                        let outcome = node::run_node(&ctx, &spec).await;
                        (spec.id, outcome)
                    });
                }
            }

            if in_flight == 0 {
                break;
            }

            let next = tokio::select! {
                joined = joins.join_next() => Some(joined),
                _ = cancel.cancelled() => None,
            };
            let Some(joined) = next else {
                return self.finish_cancelled(state, session, env, &emitter, joins).await;
            };
            let Some(joined) = joined else { break };
            in_flight -= 1;
            let (node_id, outcome) = match joined {
                Ok(pair) => pair,
                Err(join_err) => {
                    tracing::error!(error = %join_err, "node task panicked or was aborted");
                    continue;
                }
            };

            match outcome {
                NodeOutcome::Success(output) => {
                    let now = self.clock.now_utc();
                    let node_state = state.run.node_state_mut(&node_id);
                    node_state.status = NodeStatus::Succeeded;
                    node_state.attempts = node_state.attempts.max(1);
                    node_state.output = Some(output);
                    node_state.finished_at = Some(now);
                    let id = emitter.emit(EventKind::NodeSucceeded, Some(&node_id), Value::Null);
                    state.run.node_state_mut(&node_id).events.push(id);
                }
                NodeOutcome::Failed { kind, message, attempts } => {
                    let now = self.clock.now_utc();
                    let node_state = state.run.node_state_mut(&node_id);
                    node_state.status = NodeStatus::Failed;
                    node_state.attempts = attempts;
                    node_state.error = Some(format!("{kind}: {message}"));
                    node_state.finished_at = Some(now);
                    let id = emitter.emit(
                        EventKind::NodeFailed,
                        Some(&node_id),
                        serde_json::json!({"kind": kind, "message": message}),
                    );
                    state.run.node_state_mut(&node_id).events.push(id);
                }
                NodeOutcome::Park(reason) => {
                    // The parking node re-executes after approval.
                    let node_state = state.run.node_state_mut(&node_id);
                    node_state.status = NodeStatus::Pending;
                    node_state.started_at = None;
                    parked = Some(reason);
                }
            }
            self.persist(&mut state, &session, env)?;
        }

        if let Some(reason) = parked {
            return self.finish_parked(state, session, env, &emitter, reason, &artifacts).await;
        }

        // Terminal: failed if any node failed, else succeeded.
        let failed = state.run.state.values().any(|n| n.status == NodeStatus::Failed);
        let status = if failed { RunStatus::Failed } else { RunStatus::Succeeded };
        state.run.patch_status(status, Some(self.clock.now_utc()));
        artifacts.save()?;
        self.persist(&mut state, &session, env)?;
        emitter.emit(
            EventKind::RunCompleted,
            None,
            serde_json::json!({"status": status, "artifacts": artifacts.entries().len()}),
        );
        env.run_log.flush()?;
        env.project_log.flush()?;
        Ok(state.run)
    }

    async fn finish_parked(
        &self,
        mut state: RunStateFile,
        session: Arc<Mutex<HashMap<String, Value>>>,
        env: &RunEnv,
        emitter: &Emitter,
        reason: ParkReason,
        artifacts: &ArtifactRecorder,
    ) -> Result<Run, RuntimeError> {
        state.run.status = RunStatus::PendingConfirmation;
        let payload = match reason {
            ParkReason::Plan(card) => {
                save_json_atomic(&env.paths.run_plan_file(&state.run.run_id), &card)?;
                serde_json::to_value(&card).unwrap_or(Value::Null)
            }
            ParkReason::Budget { message } => serde_json::json!({"reason": message}),
        };
        artifacts.save()?;
        self.persist(&mut state, &session, env)?;
        emitter.emit(EventKind::RunPendingConfirmation, None, payload);
        env.run_log.flush()?;
        env.project_log.flush()?;
        Ok(state.run)
    }

    async fn finish_cancelled(
        &self,
        mut state: RunStateFile,
        session: Arc<Mutex<HashMap<String, Value>>>,
        env: &RunEnv,
        emitter: &Emitter,
        mut joins: JoinSet<(String, NodeOutcome)>,
    ) -> Result<Run, RuntimeError> {
        // Grace period: in-flight nodes observe the child token at their
        // next suspension point. Whatever is left gets abandoned.
        let grace = Duration::from_secs(self.config.cancel_grace_s);
        let drained = tokio::time::timeout(grace, async {
            while joins.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            joins.abort_all();
        }

        let now = self.clock.now_utc();
        for (node_id, node_state) in state.run.state.iter_mut() {
            match node_state.status {
                NodeStatus::Running => {
                    node_state.status = NodeStatus::Failed;
                    node_state.error = Some(format!("{}: cancelled", ErrorKind::Cancelled));
                    node_state.finished_at = Some(now);
                    emitter.emit(
                        EventKind::NodeFailed,
                        Some(node_id),
                        serde_json::json!({"kind": ErrorKind::Cancelled, "message": "cancelled"}),
                    );
                }
                NodeStatus::Pending => {
                    node_state.status = NodeStatus::Skipped;
                    emitter.emit(EventKind::NodeSkipped, Some(node_id), Value::Null);
                }
                _ => {}
            }
        }
        state.run.patch_status(RunStatus::Cancelled, Some(now));
        self.persist(&mut state, &session, env)?;
        emitter.emit(
            EventKind::RunCompleted,
            None,
            serde_json::json!({"status": "cancelled"}),
        );
        env.run_log.flush()?;
        Ok(state.run)
    }

    fn persist(
        &self,
        state: &mut RunStateFile,
        session: &Arc<Mutex<HashMap<String, Value>>>,
        env: &RunEnv,
    ) -> Result<(), RuntimeError> {
        state.session = session.lock().clone();
        save_json_atomic(&env.paths.run_state_file(&state.run.run_id), state)?;
        Ok(())
    }
}

/// Compute the ready set and the transitive-skip set for one step.
///
/// A node is ready when every incoming edge's source succeeded and every
/// guard is truthy (AND-join). Once all sources are terminal, a node with
/// a failed/skipped source or a falsy guard is skipped.
fn plan_step(run: &Run, session: &HashMap<String, Value>) -> (Vec<String>, Vec<String>) {
    let mut ready = Vec::new();
    let mut skip = Vec::new();

    for node in &run.graph.nodes {
        let Some(node_state) = run.node_state(&node.id) else { continue };
        if node_state.status != NodeStatus::Pending {
            continue;
        }

        let mut all_terminal = true;
        let mut all_satisfied = true;
        for edge in run.graph.edges_into(&node.id) {
            let source_status =
                run.node_state(&edge.from).map(|s| s.status).unwrap_or(NodeStatus::Pending);
            if !source_status.is_terminal() {
                all_terminal = false;
                break;
            }
            let guard_ok = edge
                .when
                .as_deref()
                .map(|expr| amon_core::graph::eval_guard(expr, session))
                .unwrap_or(true);
            if source_status != NodeStatus::Succeeded || !guard_ok {
                all_satisfied = false;
            }
        }

        if !all_terminal {
            continue;
        }
        if all_satisfied {
            ready.push(node.id.clone());
        } else {
            skip.push(node.id.clone());
        }
    }
    (ready, skip)
}

pub(crate) fn trigger_source(kind: TriggerKind) -> EventSource {
    match kind {
        TriggerKind::Chat => EventSource::Chat,
        TriggerKind::Hook => EventSource::Hook,
        TriggerKind::Schedule => EventSource::Schedule,
        TriggerKind::Job => EventSource::Job,
        TriggerKind::Cli => EventSource::Cli,
    }
}

/// Convenience: events a stream consumer uses to spot a run's terminal
/// frame.
pub fn is_terminal_event(event: &Event) -> bool {
    event.kind == EventKind::RunCompleted
}

#[cfg(test)]
#[path = "../runtime_tests/mod.rs"]
mod tests;
