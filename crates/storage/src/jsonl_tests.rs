// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::tempdir;

#[test]
fn clean_file_untouched() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("s.jsonl");
    std::fs::write(&path, "{\"a\":1}\n{\"a\":2}\n").unwrap();

    let stats = recover_jsonl(&path).unwrap();
    assert_eq!(stats.valid_lines, 2);
    assert_eq!(stats.truncated_bytes, 0);
    assert!(!stats.rotated_backup);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\":1}\n{\"a\":2}\n");
}

#[test]
fn missing_file_is_empty() {
    let dir = tempdir().unwrap();
    let stats = recover_jsonl(&dir.path().join("none.jsonl")).unwrap();
    assert_eq!(stats.valid_lines, 0);
}

#[test]
fn partial_tail_truncated_without_backup() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("s.jsonl");
    std::fs::write(&path, "{\"a\":1}\n{\"a\":2}\n{\"a\":").unwrap();

    let stats = recover_jsonl(&path).unwrap();
    assert_eq!(stats.valid_lines, 2);
    assert!(stats.truncated_bytes > 0);
    assert!(!stats.rotated_backup);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\":1}\n{\"a\":2}\n");
    assert!(!path.with_extension("bak").exists());
}

#[test]
fn garbage_line_rotates_backup_and_keeps_prefix() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("s.jsonl");
    std::fs::write(&path, "{\"a\":1}\nnot-json\n{\"a\":3}\n").unwrap();

    let stats = recover_jsonl(&path).unwrap();
    assert_eq!(stats.valid_lines, 1);
    assert!(stats.rotated_backup);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\":1}\n");

    let bak = path.with_extension("bak");
    assert!(bak.exists());
    assert!(std::fs::read_to_string(&bak).unwrap().contains("not-json"));
}

#[test]
fn binary_garbage_handled() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("s.jsonl");
    std::fs::write(&path, b"{\"a\":1}\n\x80\x81\xff\n").unwrap();

    let stats = recover_jsonl(&path).unwrap();
    assert_eq!(stats.valid_lines, 1);
    assert!(stats.rotated_backup);
}

#[test]
fn repeated_corruption_rotates_generations() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("s.jsonl");

    for round in 1..=4u8 {
        std::fs::write(&path, format!("{{\"round\":{round}}}\ngarbage\n")).unwrap();
        recover_jsonl(&path).unwrap();
    }

    // Most recent backup is round 4; two older generations kept.
    let bak = std::fs::read_to_string(path.with_extension("bak")).unwrap();
    assert!(bak.contains("\"round\":4"));
    assert!(path.with_extension("bak.2").exists());
    assert!(path.with_extension("bak.3").exists());
    assert!(!path.with_extension("bak.4").exists());
}
