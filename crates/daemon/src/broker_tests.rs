// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::orchestrator::handle_message;
use crate::test_fixtures::{test_daemon, wait_for_run};

async fn collect_until_done(mut rx: tokio::sync::mpsc::Receiver<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        let is_done = frame.kind == FrameKind::Done;
        frames.push(frame);
        if is_done {
            break;
        }
    }
    frames
}

#[tokio::test]
async fn stream_carries_tokens_and_done() {
    let f = test_daemon();
    f.model.clone().respond("streamed text");

    let turn = handle_message(&f.daemon, f.project_id, None, "hello", None).await.unwrap();
    let rx = StreamBroker::open(
        &f.daemon,
        StreamRequest {
            project_id: f.project_id,
            chat_id: Some(turn.chat_id),
            run_id: Some(turn.run_id),
            since_event_id: None,
        },
    )
    .unwrap();

    let frames = collect_until_done(rx).await;

    // First frame echoes the session binding.
    assert_eq!(frames[0].kind, FrameKind::Notice);
    assert_eq!(frames[0].data["chat_id"], serde_json::json!(turn.chat_id));

    let tokens: String = frames
        .iter()
        .filter(|f| f.kind == FrameKind::Token)
        .map(|f| f.data["text"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(tokens, "streamed text");

    let done = frames.last().unwrap();
    assert_eq!(done.kind, FrameKind::Done);
    assert_eq!(done.data["status"], "ok");
    assert_eq!(done.data["run_id"], serde_json::json!(turn.run_id));
    assert_eq!(done.data["chat_id"], serde_json::json!(turn.chat_id));
    assert_eq!(done.data["project_id"], serde_json::json!(f.project_id));
}

#[tokio::test]
async fn resume_from_cursor_replays_only_missed_events() {
    let f = test_daemon();
    f.model.clone().respond("answer");

    let turn = handle_message(&f.daemon, f.project_id, None, "hello", None).await.unwrap();
    wait_for_run(&f.daemon, &turn.run_id).await;

    // First replay from the beginning.
    let rx = StreamBroker::open(
        &f.daemon,
        StreamRequest {
            project_id: f.project_id,
            chat_id: Some(turn.chat_id),
            run_id: Some(turn.run_id),
            since_event_id: Some(0),
        },
    )
    .unwrap();
    let all = collect_until_done(rx).await;
    let mid_cursor = all
        .iter()
        .filter(|f| f.event_id > 0)
        .map(|f| f.event_id)
        .nth(1)
        .expect("at least two identified frames");

    // Reconnect mid-stream: only events after the cursor come back.
    let rx = StreamBroker::open(
        &f.daemon,
        StreamRequest {
            project_id: f.project_id,
            chat_id: Some(turn.chat_id),
            run_id: Some(turn.run_id),
            since_event_id: Some(mid_cursor),
        },
    )
    .unwrap();
    let resumed = collect_until_done(rx).await;
    assert!(resumed.iter().all(|f| f.event_id == 0 || f.event_id > mid_cursor));
    assert_eq!(resumed.last().unwrap().kind, FrameKind::Done);
}

#[tokio::test]
async fn stale_cursor_gets_lost_notice() {
    let f = test_daemon();
    f.model.clone().respond("answer");

    // Shrink the recovery window so any gap is too wide.
    let mut config = amon_core::AmonConfig::with_defaults();
    config.stream.recovery_window = 1;
    f.daemon.config.replace(config);

    let turn = handle_message(&f.daemon, f.project_id, None, "hello", None).await.unwrap();
    wait_for_run(&f.daemon, &turn.run_id).await;

    let rx = StreamBroker::open(
        &f.daemon,
        StreamRequest {
            project_id: f.project_id,
            chat_id: Some(turn.chat_id),
            run_id: Some(turn.run_id),
            since_event_id: Some(1),
        },
    )
    .unwrap();

    // Binding notice, then the lost-events notice.
    let mut rx = rx;
    let _binding = rx.recv().await.unwrap();
    let lost = rx.recv().await.unwrap();
    assert_eq!(lost.kind, FrameKind::Notice);
    assert!(lost.data["message"].as_str().unwrap_or_default().contains("lost"));
}

#[tokio::test]
async fn parked_run_emits_plan_then_confirm_required_done() {
    let f = test_daemon();

    // Schedule-triggered LLM run with a zero automation budget parks.
    let graph = crate::graphs::template("summarize_doc", &Default::default());
    let trigger = amon_core::Trigger::new(amon_core::TriggerKind::Schedule, "nightly");
    let (run_id, handle) =
        crate::orchestrator::dispatch_automation(&f.daemon, f.project_id, graph, trigger, true)
            .unwrap();
    handle.await.unwrap();

    let rx = StreamBroker::open(
        &f.daemon,
        StreamRequest {
            project_id: f.project_id,
            chat_id: None,
            run_id: Some(run_id),
            since_event_id: None,
        },
    )
    .unwrap();
    let frames = collect_until_done(rx).await;

    let plan_pos = frames.iter().position(|f| f.kind == FrameKind::Plan);
    assert!(plan_pos.is_some(), "expected a plan frame: {frames:?}");
    let done = frames.last().unwrap();
    assert_eq!(done.data["status"], "confirm_required");
}

#[tokio::test]
async fn unknown_run_is_an_error() {
    let f = test_daemon();
    let result = StreamBroker::open(
        &f.daemon,
        StreamRequest {
            project_id: f.project_id,
            chat_id: None,
            run_id: None,
            since_event_id: None,
        },
    );
    assert!(result.is_err());
}
