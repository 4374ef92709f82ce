// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stream broker: fan-out of run events to clients with Last-Event-ID
//! resume.
//!
//! A stream attaches to the live bus first, then drains missed events from
//! the run's durable log starting after the client's cursor, then switches
//! to live delivery, deduplicating the overlap by event id. If the cursor
//! fell out of the recovery window, the client gets one `notice` frame
//! saying events were lost, then the live head.

use crate::daemon::Daemon;
use crate::error::DaemonError;
use amon_core::{ChatId, Event, EventKind, ProjectId, RunId};
use amon_storage::SessionStore;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Wire frame taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Token,
    Notice,
    Plan,
    Result,
    Reasoning,
    Warning,
    Error,
    Done,
}

amon_core::simple_display! {
    FrameKind {
        Token => "token",
        Notice => "notice",
        Plan => "plan",
        Result => "result",
        Reasoning => "reasoning",
        Warning => "warning",
        Error => "error",
        Done => "done",
    }
}

/// One frame on the wire. `event_id` is the run-stream id clients resume
/// from.
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    pub event_id: u64,
    #[serde(rename = "type")]
    pub kind: FrameKind,
    pub data: Value,
}

/// Parameters of a stream open.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub project_id: ProjectId,
    pub chat_id: Option<ChatId>,
    pub run_id: Option<RunId>,
    pub since_event_id: Option<u64>,
}

/// The broker. Stateless besides the daemon handle.
pub struct StreamBroker;

impl StreamBroker {
    /// Open a stream for a run (directly, or the chat's most recent run).
    /// The first frame echoes the resolved session binding.
    pub fn open(
        daemon: &Arc<Daemon>,
        request: StreamRequest,
    ) -> Result<mpsc::Receiver<Frame>, DaemonError> {
        let paths = daemon.project_paths(&request.project_id)?;

        // Session binding: honor a live incoming chat id, else resolve.
        let chat_id = match request.chat_id {
            Some(id) if SessionStore::new(paths.clone()).session_exists(&id) => id,
            other => {
                let store = SessionStore::new(paths.clone());
                let ensured = store.ensure_session(other.as_ref())?;
                ensured.chat_id
            }
        };

        let run_id = match request.run_id {
            Some(id) => id,
            None => daemon
                .latest_run_for_chat(&chat_id)
                .map(|r| r.run_id)
                .ok_or_else(|| DaemonError::RunNotFound(format!("no run for {chat_id}")))?,
        };

        let ids = StreamIds { project_id: request.project_id, chat_id, run_id };
        let (tx, rx) = mpsc::channel(256);

        // Subscribe before draining so nothing falls between.
        let sub = daemon
            .bus
            .subscribe(move |e| e.run_id == Some(run_id) && map_kind(e.kind).is_some());

        let env = daemon.run_env(&request.project_id, &run_id)?;
        let recovery_window = daemon.config.snapshot().stream.recovery_window;
        let since = request.since_event_id;

        tokio::spawn(async move {
            let first = Frame {
                event_id: 0,
                kind: FrameKind::Notice,
                data: json!({
                    "project_id": ids.project_id,
                    "chat_id": ids.chat_id,
                    "run_id": ids.run_id,
                }),
            };
            if tx.send(first).await.is_err() {
                return;
            }

            let head = env.run_log.head_event_id();
            let mut cursor = since.unwrap_or(0);
            if let Some(since) = since {
                if head > since && head - since > recovery_window {
                    let lost = Frame {
                        event_id: 0,
                        kind: FrameKind::Notice,
                        data: json!({
                            "message": "events lost: cursor outside recovery window",
                            "resume_from": head,
                        }),
                    };
                    if tx.send(lost).await.is_err() {
                        return;
                    }
                    cursor = head;
                }
            }

            // Drain the durable log from the cursor.
            match env.run_log.read_since(cursor, usize::MAX) {
                Ok(events) => {
                    for event in events {
                        cursor = cursor.max(event.event_id);
                        if send_event(&tx, &event, &ids).await.is_err() {
                            return;
                        }
                        if Daemon::is_stream_terminal(event.kind) {
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stream drain failed");
                }
            }

            // Live phase: skip the overlap already drained.
            loop {
                let event = sub.recv().await;
                if event.event_id <= cursor {
                    continue;
                }
                cursor = event.event_id;
                if send_event(&tx, &event, &ids).await.is_err() {
                    return;
                }
                if Daemon::is_stream_terminal(event.kind) {
                    return;
                }
            }
        });

        Ok(rx)
    }
}

#[derive(Clone, Copy)]
struct StreamIds {
    project_id: ProjectId,
    chat_id: ChatId,
    run_id: RunId,
}

async fn send_event(
    tx: &mpsc::Sender<Frame>,
    event: &Event,
    ids: &StreamIds,
) -> Result<(), ()> {
    for frame in map_event(event, ids) {
        tx.send(frame).await.map_err(|_| ())?;
    }
    Ok(())
}

fn map_kind(kind: EventKind) -> Option<FrameKind> {
    match kind {
        EventKind::ChatToken => Some(FrameKind::Token),
        EventKind::ChatReasoning => Some(FrameKind::Reasoning),
        EventKind::ChatNotice | EventKind::ChatSessionFallback => Some(FrameKind::Notice),
        EventKind::NodeWarning => Some(FrameKind::Warning),
        EventKind::NodeFailed => Some(FrameKind::Error),
        EventKind::NodeSucceeded => Some(FrameKind::Result),
        EventKind::RunPendingConfirmation => Some(FrameKind::Plan),
        EventKind::RunCompleted => Some(FrameKind::Done),
        _ => None,
    }
}

/// Map one durable event to zero or more wire frames.
fn map_event(event: &Event, ids: &StreamIds) -> Vec<Frame> {
    let Some(kind) = map_kind(event.kind) else { return Vec::new() };
    let node = event.node_id.map(|n| n.to_string());
    match kind {
        FrameKind::Token => vec![Frame {
            event_id: event.event_id,
            kind,
            data: json!({"text": event.payload.get("text").cloned().unwrap_or_default()}),
        }],
        FrameKind::Plan => {
            // A park surfaces the plan card and a confirm-required done.
            vec![
                Frame { event_id: event.event_id, kind, data: event.payload.clone() },
                done_frame(event.event_id, "confirm_required", ids),
            ]
        }
        FrameKind::Done => {
            let status = match event.payload.get("status").and_then(|s| s.as_str()) {
                Some("succeeded") => "ok",
                Some("cancelled") => "cancelled",
                Some("failed") | None => "error",
                Some(other) => {
                    tracing::debug!(status = other, "unmapped terminal status");
                    "error"
                }
            };
            vec![done_frame(event.event_id, status, ids)]
        }
        FrameKind::Error => vec![Frame {
            event_id: event.event_id,
            kind,
            data: json!({
                "node": node,
                "project_id": ids.project_id,
                "chat_id": ids.chat_id,
                "run_id": ids.run_id,
                "detail": event.payload,
            }),
        }],
        _ => vec![Frame {
            event_id: event.event_id,
            kind,
            data: json!({"node": node, "detail": event.payload}),
        }],
    }
}

fn done_frame(event_id: u64, status: &str, ids: &StreamIds) -> Frame {
    Frame {
        event_id,
        kind: FrameKind::Done,
        data: json!({
            "status": status,
            "project_id": ids.project_id,
            "chat_id": ids.chat_id,
            "run_id": ids.run_id,
        }),
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
