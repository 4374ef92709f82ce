// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ensure-semantics on reconnect.

use crate::prelude::*;
use amon_core::{ChatId, ChatRecord, RunId, TurnId};
use amon_storage::SessionStore;

fn seed_finished_session(platform: &Platform, chat: &str) {
    let paths = platform.daemon.project_paths(&platform.project_id).unwrap();
    std::fs::write(paths.session_file(&ChatId::from_string(chat)), "").unwrap();
    std::fs::write(paths.latest_chat_file(), chat).unwrap();

    let store = SessionStore::new(paths);
    let turn = TurnId::new();
    let chat_id = ChatId::from_string(chat);
    store.append(&chat_id, &ChatRecord::user("hello", turn)).unwrap();
    store
        .append(&chat_id, &ChatRecord::assistant("hi", turn, RunId::from_string("run-1")))
        .unwrap();
}

#[tokio::test]
async fn incoming_id_honored_then_latest_reused() {
    let platform = platform();
    seed_finished_session(&platform, "chat-old");
    let addr = platform.serve_http().await;

    // An incoming valid id is returned as-is.
    let (status, body) = http_request(
        addr,
        "POST",
        "/v1/chat/sessions",
        Some(r#"{"project_id": "p1", "chat_id": "chat-old"}"#),
    )
    .await;
    assert_eq!(status, 200);
    let value = json_body(&body);
    assert_eq!(value["chat_id"], "chat-old");
    assert_eq!(value["source"], "incoming");

    // An empty id falls back to the latest session, not a new one.
    let (status, body) = http_request(
        addr,
        "POST",
        "/v1/chat/sessions",
        Some(r#"{"project_id": "p1", "chat_id": ""}"#),
    )
    .await;
    assert_eq!(status, 200);
    let value = json_body(&body);
    assert_eq!(value["chat_id"], "chat-old");
    assert_eq!(value["source"], "latest");
}

#[tokio::test]
async fn ensure_is_idempotent_for_existing_id() {
    let platform = platform();
    seed_finished_session(&platform, "chat-old");
    let store = SessionStore::new(platform.daemon.project_paths(&platform.project_id).unwrap());

    let hint = ChatId::from_string("chat-old");
    let first = store.ensure_session(Some(&hint)).unwrap();
    let second = store.ensure_session(Some(&hint)).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.chat_id, hint);
}

#[tokio::test]
async fn brand_new_project_mints_session() {
    let platform = platform();
    let addr = platform.serve_http().await;

    let (status, body) =
        http_request(addr, "POST", "/v1/chat/sessions", Some(r#"{"project_id": "p1"}"#)).await;
    assert_eq!(status, 200);
    let value = json_body(&body);
    assert_eq!(value["source"], "new");
    assert!(!value["chat_id"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_project_is_404() {
    let platform = platform();
    let addr = platform.serve_http().await;
    let (status, _) =
        http_request(addr, "POST", "/v1/chat/sessions", Some(r#"{"project_id": "ghost"}"#)).await;
    assert_eq!(status, 404);
}
