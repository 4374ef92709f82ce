// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Context clear scoping.

use crate::prelude::*;
use amon_storage::SessionStore;

#[tokio::test]
async fn chat_scope_without_id_is_400_and_touches_nothing() {
    let platform = platform();
    let store =
        SessionStore::new(platform.daemon.project_paths(&platform.project_id).unwrap());
    let existing = store.ensure_session(None).unwrap().chat_id;
    let addr = platform.serve_http().await;

    let (status, body) = http_request(
        addr,
        "POST",
        "/v1/context/clear",
        Some(r#"{"scope": "chat", "project_id": "p1"}"#),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(json_body(&body)["error_code"], "MISSING_CHAT_ID");

    // The project's sessions are untouched.
    assert!(store.session_exists(&existing));
}

#[tokio::test]
async fn chat_scope_with_id_clears_one_session() {
    let platform = platform();
    let store =
        SessionStore::new(platform.daemon.project_paths(&platform.project_id).unwrap());
    let chat = store.ensure_session(None).unwrap().chat_id;
    let addr = platform.serve_http().await;

    let (status, _) = http_request(
        addr,
        "POST",
        "/v1/context/clear",
        Some(&format!(
            r#"{{"scope": "chat", "project_id": "p1", "chat_id": "{chat}"}}"#
        )),
    )
    .await;
    assert_eq!(status, 200);
    assert!(!store.session_exists(&chat));
}

#[tokio::test]
async fn project_scope_clears_all_sessions() {
    let platform = platform();
    let store =
        SessionStore::new(platform.daemon.project_paths(&platform.project_id).unwrap());
    let chat = store.ensure_session(None).unwrap().chat_id;
    let addr = platform.serve_http().await;

    let (status, body) = http_request(
        addr,
        "POST",
        "/v1/context/clear",
        Some(r#"{"scope": "project", "project_id": "p1"}"#),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(json_body(&body)["sessions_removed"], 1);
    assert!(!store.session_exists(&chat));
}

#[tokio::test]
async fn unknown_scope_is_400() {
    let platform = platform();
    let addr = platform.serve_http().await;
    let (status, _) = http_request(
        addr,
        "POST",
        "/v1/context/clear",
        Some(r#"{"scope": "galaxy", "project_id": "p1"}"#),
    )
    .await;
    assert_eq!(status, 400);
}
