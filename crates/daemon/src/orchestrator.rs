// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binds a chat message to a run and produces a durable assistant turn.
//!
//! The continuity contract: an incoming valid `chat_id` is never
//! overwritten, and every `user` record is eventually answered by exactly
//! one terminal `assistant` record or a final `error` record with the same
//! `turn_id` — including across parks, rejections, and crashes.

use crate::daemon::Daemon;
use crate::error::DaemonError;
use crate::graphs;
use amon_core::graph::Graph;
use amon_core::{
    ChatId, ChatKind, ChatRecord, DialogueTurn, Event, EventKind, ProjectId, Run, RunId,
    RunStatus, Trigger, TriggerKind, TurnId,
};
use amon_runtime::RunEnv;
use amon_storage::{EnsureSource, SessionStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How many prior exchanges are assembled into the prompt.
const HISTORY_TURNS: usize = 20;

/// Chat graph modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMode {
    Single,
    SelfCritique,
    Team,
}

amon_core::simple_display! {
    ChatMode {
        Single => "single",
        SelfCritique => "self_critique",
        Team => "team",
    }
}

impl ChatMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "single" => Some(Self::Single),
            "self_critique" => Some(Self::SelfCritique),
            "team" => Some(Self::Team),
            _ => None,
        }
    }
}

/// What `handle_message` hands back to the transport layer.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub chat_id: ChatId,
    pub run_id: RunId,
    pub turn_id: TurnId,
    pub source: EnsureSource,
    pub mode: ChatMode,
}

/// Route a message: short direct prompts run single; review requests run
/// the critique loop; multi-deliverable requests fan out to a team.
pub fn auto_mode(message: &str) -> ChatMode {
    let lower = message.to_lowercase();
    if lower.contains("review") || message.contains("批評") {
        return ChatMode::SelfCritique;
    }
    const DELIVERABLES: [&str; 8] =
        ["report", "plan", "summary", "slides", "presentation", "spec", "doc", "email"];
    let mentioned = DELIVERABLES.iter().filter(|d| lower.contains(*d)).count();
    let bullets = message.lines().filter(|l| l.trim_start().starts_with('-')).count();
    if mentioned >= 2 || bullets >= 2 {
        return ChatMode::Team;
    }
    ChatMode::Single
}

fn build_graph(mode: ChatMode, prompt: &str) -> Graph {
    match mode {
        ChatMode::Single => graphs::single(prompt),
        ChatMode::SelfCritique => graphs::self_critique(prompt),
        ChatMode::Team => graphs::team(prompt),
    }
}

/// Prompt assembly: prior dialogue first, current request last.
fn assemble_prompt(history: &[DialogueTurn], message: &str) -> String {
    // The just-appended user record is the final history entry.
    let prior = &history[..history.len().saturating_sub(1)];
    if prior.is_empty() {
        return message.to_string();
    }
    let mut out = String::from("Conversation so far:\n");
    for turn in prior {
        out.push_str(&format!("{}: {}\n", turn.role, turn.text));
    }
    out.push_str("\nCurrent request:\n");
    out.push_str(message);
    out
}

/// Handle one incoming chat message end to end. Returns as soon as the run
/// is submitted; streaming continues through the broker.
pub async fn handle_message(
    daemon: &Arc<Daemon>,
    project_id: ProjectId,
    chat_hint: Option<ChatId>,
    message: &str,
    mode: Option<ChatMode>,
) -> Result<ChatTurn, DaemonError> {
    let paths = daemon.project_paths(&project_id)?;
    let store = SessionStore::new(paths);

    let ensured = store.ensure_session(chat_hint.as_ref())?;
    if ensured.fell_back {
        daemon.emit_project(
            &project_id,
            Event::new(EventKind::ChatSessionFallback)
                .chat_id(ensured.chat_id)
                .payload(serde_json::json!({
                    "hint": chat_hint.map(|c| c.to_string()),
                })),
        );
    }
    let chat_id = ensured.chat_id;
    let turn_id = TurnId::new();
    store.append(&chat_id, &ChatRecord::user(message, turn_id))?;

    let history = store.load_recent_dialogue(&chat_id, HISTORY_TURNS)?;
    let mode = mode.unwrap_or_else(|| auto_mode(message));
    let prompt = assemble_prompt(&history, message);
    let graph = build_graph(mode, &prompt);

    store.append(
        &chat_id,
        &ChatRecord::new(ChatKind::Router)
            .turn_id(turn_id)
            .payload(serde_json::json!({"mode": mode.to_string(), "history_count": history.len()})),
    )?;

    let run = Run::new(project_id, Trigger::new(TriggerKind::Chat, chat_id.as_str()), graph)
        .chat_id(chat_id)
        .allow_llm(true);
    let run_id = run.run_id;
    let cancel = daemon.register_run(&run, Some(turn_id));
    let env = daemon.run_env(&project_id, &run_id)?;

    let daemon_task = Arc::clone(daemon);
    tokio::spawn(async move {
        drive_chat_run(daemon_task, run, env, cancel, turn_id).await;
    });

    Ok(ChatTurn { chat_id, run_id, turn_id, source: ensured.source, mode })
}

/// Execute the run while mirroring streamed tokens into the session as
/// `assistant_chunk` records, then append the turn's terminal record.
async fn drive_chat_run(
    daemon: Arc<Daemon>,
    run: Run,
    env: RunEnv,
    cancel: CancellationToken,
    turn_id: TurnId,
) {
    let run_id = run.run_id;
    let Some(chat_id) = run.chat_id else { return };

    let chunk_store = SessionStore::new(env.paths.clone());
    let sub = daemon
        .bus
        .subscribe(move |e| e.kind == EventKind::ChatToken && e.run_id == Some(run_id));
    let chunk_stop = CancellationToken::new();
    let chunk_task = {
        let stop = chunk_stop.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = sub.recv() => append_chunk(&chunk_store, &chat_id, turn_id, &event),
                    _ = stop.cancelled() => break,
                }
            }
            // Drain whatever arrived before the stop signal.
            while let Some(event) = sub.try_recv() {
                append_chunk(&chunk_store, &chat_id, turn_id, &event);
            }
        })
    };

    let result = daemon.runtime.execute(run, &env, cancel).await;
    chunk_stop.cancel();
    let _ = chunk_task.await;

    // The terminal session record must be durable before the run index
    // flips, so a caller that observed the terminal status always finds it.
    let store = SessionStore::new(env.paths.clone());
    match result {
        Ok(finished) => {
            finalize_chat_run(&daemon, &store, &env, &finished, turn_id);
            daemon.update_run_status(&run_id, finished.status);
        }
        Err(e) => {
            tracing::error!(run = %run_id, error = %e, "run aborted");
            let record = ChatRecord::error_final(format!("run aborted: {e}"), turn_id)
                .run_id(run_id);
            if let Err(e) = store.append(&chat_id, &record) {
                tracing::error!(chat = %chat_id, error = %e, "failed to append error record");
            }
            daemon.update_run_status(&run_id, RunStatus::Failed);
        }
    }
}

fn append_chunk(store: &SessionStore, chat_id: &ChatId, turn_id: TurnId, event: &Event) {
    let Some(text) = event.payload.get("text").and_then(|t| t.as_str()) else { return };
    let record = ChatRecord::assistant_chunk(text, turn_id).run_id(
        event.run_id.unwrap_or_else(|| RunId::from_string("")),
    );
    if let Err(e) = store.append(chat_id, &record) {
        tracing::warn!(chat = %chat_id, error = %e, "failed to append chunk");
    }
}

/// Append the terminal session record for a finished (or parked) run.
///
/// Parked runs get a non-terminal `plan` record; the terminal record is
/// appended when the plan is confirmed, rejected, or expires.
pub fn finalize_chat_run(
    daemon: &Arc<Daemon>,
    store: &SessionStore,
    env: &RunEnv,
    run: &Run,
    turn_id: TurnId,
) {
    let Some(chat_id) = run.chat_id else { return };
    let record = match run.status {
        RunStatus::Succeeded => {
            let text = final_text(daemon, run, env);
            ChatRecord::assistant(text, turn_id, run.run_id)
        }
        RunStatus::PendingConfirmation => {
            let plan = amon_storage::load_json::<amon_core::PlanCard>(
                &env.paths.run_plan_file(&run.run_id),
            )
            .ok()
            .flatten();
            ChatRecord::new(ChatKind::Plan)
                .turn_id(turn_id)
                .run_id(run.run_id)
                .payload(serde_json::to_value(&plan).unwrap_or_default())
        }
        RunStatus::Cancelled => {
            ChatRecord::error_final("run cancelled", turn_id).run_id(run.run_id)
        }
        _ => {
            let detail = run
                .state
                .values()
                .find_map(|n| n.error.clone())
                .unwrap_or_else(|| "run failed".to_string());
            ChatRecord::error_final(detail, turn_id).run_id(run.run_id)
        }
    };
    if let Err(e) = store.append(&chat_id, &record) {
        tracing::error!(chat = %chat_id, error = %e, "failed to append terminal record");
    }
}

/// The assistant text of a finished run: the `final` session key, falling
/// back to the last node output.
fn final_text(daemon: &Arc<Daemon>, run: &Run, env: &RunEnv) -> String {
    if let Ok(state) = daemon.runtime.load_state(&run.run_id, env) {
        if let Some(serde_json::Value::String(text)) = state.session.get("final") {
            return text.clone();
        }
    }
    run.graph
        .nodes
        .iter()
        .rev()
        .find_map(|n| run.node_state(&n.id).and_then(|s| s.output.clone()))
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| "done".to_string())
}

/// Resolve a parked plan for a chat: approve or reject, then append the
/// turn's terminal record.
pub async fn resolve_plan(
    daemon: &Arc<Daemon>,
    project_id: ProjectId,
    chat_id: ChatId,
    approve: bool,
) -> Result<Run, DaemonError> {
    let record = daemon
        .parked_run_for_chat(&chat_id)
        .ok_or_else(|| DaemonError::RunNotFound(format!("no parked run for {chat_id}")))?;
    let env = daemon.run_env(&project_id, &record.run_id)?;
    let run = daemon
        .runtime
        .confirm_run(&record.run_id, &env, approve, CancellationToken::new())
        .await?;
    daemon.update_run_status(&run.run_id, run.status);

    let store = SessionStore::new(env.paths.clone());
    let turn_id = record.turn_id.unwrap_or_default();
    finalize_chat_run(daemon, &store, &env, &run, turn_id);
    Ok(run)
}

/// Dispatch an automation-triggered run (hook, schedule, job, cli).
pub fn dispatch_automation(
    daemon: &Arc<Daemon>,
    project_id: ProjectId,
    graph: Graph,
    trigger: Trigger,
    allow_llm: bool,
) -> Result<(RunId, tokio::task::JoinHandle<()>), DaemonError> {
    let run = Run::new(project_id, trigger, graph).allow_llm(allow_llm);
    let run_id = run.run_id;
    let cancel = daemon.register_run(&run, None);
    let env = daemon.run_env(&project_id, &run_id)?;

    let daemon_task = Arc::clone(daemon);
    let handle = tokio::spawn(async move {
        match daemon_task.runtime.execute(run, &env, cancel).await {
            Ok(finished) => {
                daemon_task.update_run_status(&run_id, finished.status);
            }
            Err(e) => {
                daemon_task.update_run_status(&run_id, RunStatus::Failed);
                tracing::error!(run = %run_id, error = %e, "automation run aborted");
            }
        }
    });
    Ok((run_id, handle))
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
