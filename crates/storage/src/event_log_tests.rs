// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use amon_core::{EventKind, ProjectId};
use tempfile::tempdir;

fn test_event(kind: EventKind) -> Event {
    Event::new(kind).project_id(ProjectId::from_string("p1"))
}

#[test]
fn append_assigns_monotonic_ids() {
    let dir = tempdir().unwrap();
    let log = EventLog::open(dir.path().join("events.jsonl")).unwrap();

    let a = log.append(test_event(EventKind::RunStarted)).unwrap();
    let b = log.append(test_event(EventKind::RunCompleted)).unwrap();
    assert_eq!(a, 1);
    assert_eq!(b, 2);
    assert_eq!(log.head_event_id(), 2);
}

#[test]
fn ids_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    {
        let log = EventLog::open(&path).unwrap();
        log.append(test_event(EventKind::RunStarted)).unwrap();
        log.append(test_event(EventKind::RunCompleted)).unwrap();
        log.flush().unwrap();
    }
    let log = EventLog::open(&path).unwrap();
    let c = log.append(test_event(EventKind::NodeStarted)).unwrap();
    assert_eq!(c, 3);
}

#[test]
fn read_since_is_exclusive_cursor() {
    let dir = tempdir().unwrap();
    let log = EventLog::open(dir.path().join("events.jsonl")).unwrap();
    for _ in 0..5 {
        log.append(test_event(EventKind::NodeStarted)).unwrap();
    }

    let events = log.read_since(2, 100).unwrap();
    let ids: Vec<u64> = events.iter().map(|e| e.event_id).collect();
    assert_eq!(ids, vec![3, 4, 5]);

    let capped = log.read_since(0, 2).unwrap();
    assert_eq!(capped.len(), 2);
    assert_eq!(capped[0].event_id, 1);
}

#[test]
fn read_page_windows_from_newest() {
    let dir = tempdir().unwrap();
    let log = EventLog::open(dir.path().join("events.jsonl")).unwrap();
    for _ in 0..7 {
        log.append(test_event(EventKind::NodeStarted)).unwrap();
    }

    let page0 = log.read_page(0, 3).unwrap();
    assert_eq!(page0.iter().map(|e| e.event_id).collect::<Vec<_>>(), vec![5, 6, 7]);

    let page1 = log.read_page(1, 3).unwrap();
    assert_eq!(page1.iter().map(|e| e.event_id).collect::<Vec<_>>(), vec![2, 3, 4]);

    let page2 = log.read_page(2, 3).unwrap();
    assert_eq!(page2.iter().map(|e| e.event_id).collect::<Vec<_>>(), vec![1]);

    assert!(log.read_page(3, 3).unwrap().is_empty());
}

#[test]
fn rotation_keeps_old_files_readable() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    // Tiny cap so every append rotates
    let config = EventLogConfig { rotate_max_bytes: 150, ..Default::default() };
    let log = EventLog::open_with(&path, config).unwrap();

    for _ in 0..5 {
        log.append(test_event(EventKind::NodeStarted)).unwrap();
    }
    log.flush().unwrap();

    assert!(rotated_path(&path, 1).exists(), "expected rotated file");

    // All events still iterate in order across the rotation boundary.
    let events = log.read_since(0, 100).unwrap();
    let ids: Vec<u64> = events.iter().map(|e| e.event_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[test]
fn ids_continue_after_rotation_and_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    let config = EventLogConfig { rotate_max_bytes: 150, ..Default::default() };
    {
        let log = EventLog::open_with(&path, config.clone()).unwrap();
        for _ in 0..4 {
            log.append(test_event(EventKind::NodeStarted)).unwrap();
        }
        log.flush().unwrap();
    }
    let log = EventLog::open_with(&path, config).unwrap();
    let next = log.append(test_event(EventKind::NodeSucceeded)).unwrap();
    assert_eq!(next, 5);
}

#[test]
fn recovers_partial_tail_on_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    {
        let log = EventLog::open(&path).unwrap();
        log.append(test_event(EventKind::RunStarted)).unwrap();
        log.flush().unwrap();
    }
    // Simulate a crash mid-append
    {
        use std::io::Write;
        let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"event_id\":99, \"truncat").unwrap();
    }

    let log = EventLog::open(&path).unwrap();
    let events = log.read_since(0, 10).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(log.append(test_event(EventKind::RunCompleted)).unwrap(), 2);
}

#[test]
fn read_filtered_applies_predicate() {
    let dir = tempdir().unwrap();
    let log = EventLog::open(dir.path().join("events.jsonl")).unwrap();
    log.append(test_event(EventKind::RunStarted)).unwrap();
    log.append(test_event(EventKind::BillingBudgetExceeded)).unwrap();
    log.append(test_event(EventKind::RunCompleted)).unwrap();

    let billing = log.read_filtered(|e| e.kind.family() == "billing").unwrap();
    assert_eq!(billing.len(), 1);
    assert_eq!(billing[0].kind, EventKind::BillingBudgetExceeded);
}
