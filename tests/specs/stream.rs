// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The chat stream over HTTP: framed events ending in `done`.

use crate::prelude::*;

#[tokio::test]
async fn chat_stream_frames_end_with_done_ok() {
    let platform = platform();
    platform.model.clone().respond("streamed hello");
    let addr = platform.serve_http().await;

    let (status, body) = http_request(
        addr,
        "GET",
        "/v1/chat/stream?project_id=p1&message=hello",
        None,
    )
    .await;
    assert_eq!(status, 200);

    // The first frame echoes the resolved session binding.
    assert!(body.contains("event: notice"), "body: {body}");
    assert!(body.contains("chat_id"));

    // Tokens streamed, then a terminal done with status ok and ids.
    assert!(body.contains("event: token"));
    assert!(body.contains("event: done"));
    assert!(body.contains("\"status\":\"ok\""));
    assert!(body.contains("\"project_id\":\"p1\""));
    assert!(body.contains("\"run_id\""));

    // done is the last event on the wire.
    let done_pos = body.rfind("event: done").unwrap();
    assert!(body.rfind("event: token").unwrap() < done_pos);
}

#[tokio::test]
async fn stream_init_exchanges_long_payload_for_token() {
    let platform = platform();
    platform.model.clone().respond("answer");
    let addr = platform.serve_http().await;

    let (status, body) = http_request(
        addr,
        "POST",
        "/v1/chat/stream/init",
        Some(r#"{"project_id": "p1", "message": "a long message"}"#),
    )
    .await;
    assert_eq!(status, 200);
    let token = json_body(&body)["stream_token"].as_str().unwrap().to_string();

    let (status, body) = http_request(
        addr,
        "GET",
        &format!("/v1/chat/stream?project_id=p1&stream_token={token}"),
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert!(body.contains("event: done"));

    // The token is single-use.
    let (status, _) = http_request(
        addr,
        "GET",
        &format!("/v1/chat/stream?project_id=p1&stream_token={token}"),
        None,
    )
    .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn failed_run_streams_error_then_done_error() {
    let platform = platform();
    platform.model.clone().fail_rate_limited();
    let addr = platform.serve_http().await;

    let (status, body) = http_request(
        addr,
        "GET",
        "/v1/chat/stream?project_id=p1&message=hello",
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert!(body.contains("event: error"), "body: {body}");
    assert!(body.contains("\"status\":\"error\""));
}
