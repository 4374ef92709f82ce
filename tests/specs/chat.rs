// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! History continuity and the self-critique graph.

use crate::prelude::*;
use amon_core::{ChatKind, RunStatus};
use amon_daemon::orchestrator::{self, ChatMode};
use amon_storage::SessionStore;

#[tokio::test]
async fn history_continuity_across_two_turns() {
    let platform = platform();
    platform.model.clone().respond("hi").respond("of course");

    // Turn one establishes the session.
    let first = orchestrator::handle_message(
        &platform.daemon,
        platform.project_id,
        None,
        "hello",
        None,
    )
    .await
    .unwrap();
    assert_eq!(platform.wait_for_run(&first.run_id).await, RunStatus::Succeeded);

    // Turn two reuses the same chat and sees the prior exchange.
    let second = orchestrator::handle_message(
        &platform.daemon,
        platform.project_id,
        Some(first.chat_id),
        "continue",
        None,
    )
    .await
    .unwrap();
    assert_eq!(platform.wait_for_run(&second.run_id).await, RunStatus::Succeeded);
    assert_eq!(second.chat_id, first.chat_id);

    // Prompt assembly included at least the prior two records.
    let requests = platform.model.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].prompt.contains("hello"));
    assert!(requests[1].prompt.contains("hi"));

    // The terminal assistant landed in the same session file.
    let store =
        SessionStore::new(platform.daemon.project_paths(&platform.project_id).unwrap());
    let records = store.load_records(&first.chat_id).unwrap();
    let assistants: Vec<_> =
        records.iter().filter(|r| r.kind == ChatKind::Assistant).collect();
    assert_eq!(assistants.len(), 2);
    assert_eq!(assistants[1].run_id, Some(second.run_id));
}

#[tokio::test]
async fn every_user_turn_gets_exactly_one_terminal() {
    let platform = platform();
    platform.model.clone().respond("first").fail_rate_limited();

    let ok = orchestrator::handle_message(
        &platform.daemon,
        platform.project_id,
        None,
        "works",
        None,
    )
    .await
    .unwrap();
    platform.wait_for_run(&ok.run_id).await;

    let bad = orchestrator::handle_message(
        &platform.daemon,
        platform.project_id,
        Some(ok.chat_id),
        "breaks",
        None,
    )
    .await
    .unwrap();
    platform.wait_for_run(&bad.run_id).await;

    let store =
        SessionStore::new(platform.daemon.project_paths(&platform.project_id).unwrap());
    let records = store.load_records(&ok.chat_id).unwrap();

    // For every user record there is exactly one terminal with its
    // turn_id, and all chunks with that turn precede it (I1/I2).
    for user in records.iter().filter(|r| r.kind == ChatKind::User) {
        let turn = user.turn_id.unwrap();
        let terminals: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.turn_id == Some(turn) && r.terminates_turn())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(terminals.len(), 1, "turn {turn} should have exactly one terminal");
        let terminal_pos = terminals[0];
        for (i, record) in records.iter().enumerate() {
            if record.kind == ChatKind::AssistantChunk && record.turn_id == Some(turn) {
                assert!(i < terminal_pos, "chunk after terminal for turn {turn}");
            }
        }
    }
}

#[tokio::test]
async fn self_critique_produces_required_artifacts() {
    let platform = platform();

    let turn = orchestrator::handle_message(
        &platform.daemon,
        platform.project_id,
        None,
        "review my architecture proposal",
        Some(ChatMode::SelfCritique),
    )
    .await
    .unwrap();
    assert_eq!(platform.wait_for_run(&turn.run_id).await, RunStatus::Succeeded);

    let docs = platform.daemon.project_paths(&platform.project_id).unwrap().docs_dir();
    assert!(docs.join("draft.md").is_file());

    let reviews = std::fs::read_dir(docs.join("reviews")).unwrap().count();
    assert_eq!(reviews, 10, "expected ten review files");

    let final_text = std::fs::read_to_string(docs.join("final.md")).unwrap();
    let first_line = final_text.lines().find(|l| !l.trim().is_empty()).unwrap();
    assert!(first_line.contains("Final"), "first non-blank line: {first_line}");
}
