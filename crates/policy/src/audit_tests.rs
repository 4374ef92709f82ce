// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;
use tempfile::tempdir;

#[test]
fn sha256_is_stable_across_key_order() {
    // serde_json parses objects into sorted maps, so logically-equal args
    // hash identically regardless of source key order.
    let a: Value = serde_json::from_str(r#"{"b": 1, "a": 2}"#).unwrap();
    let b: Value = serde_json::from_str(r#"{"a": 2, "b": 1}"#).unwrap();
    assert_eq!(sha256_value(&a), sha256_value(&b));
}

#[test]
fn preview_is_keys_and_types_only() {
    let args = json!({"path": "../../etc/passwd", "depth": 3, "opts": {"force": true}});
    let preview = structural_preview(&args);
    assert_eq!(preview, vec!["depth:num", "opts:obj", "path:str"]);
    // No raw values leak
    for item in &preview {
        assert!(!item.contains("passwd"));
    }
}

#[test]
fn preview_bounds_key_count() {
    let mut map = serde_json::Map::new();
    for i in 0..40 {
        map.insert(format!("k{i:02}"), json!(i));
    }
    let preview = structural_preview(&Value::Object(map));
    assert_eq!(preview.len(), 16);
}

#[test]
fn preview_of_non_object() {
    assert_eq!(structural_preview(&json!([1, 2])), vec!["_:arr"]);
    assert_eq!(structural_preview(&json!("x")), vec!["_:str"]);
}

#[test]
fn writer_appends_jsonl() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("logs/audit.jsonl");
    let writer = AuditWriter::new(&path);

    for i in 0..2 {
        let entry = AuditEntry {
            ts: Utc::now(),
            tool: format!("tool{i}"),
            decision: Decision::Deny,
            reason: Some("nope".into()),
            require_confirm: false,
            args_sha256: sha256_value(&json!({"i": i})),
            result_sha256: None,
            preview: vec!["i:num".into()],
            project_id: Some(ProjectId::from_string("p1")),
            run_id: None,
            chat_id: None,
            source: EventSource::Chat,
        };
        writer.append(&entry).unwrap();
    }

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    let back: AuditEntry = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(back.tool, "tool0");
    assert!(!back.args_sha256.is_empty());
}
