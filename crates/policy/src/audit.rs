// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hash-only audit trail for policy decisions.
//!
//! Audit entries carry digests and structural previews of tool arguments,
//! never the raw contents — the trail must be safe to ship in a bug report.

use crate::gate::Decision;
use amon_core::{ChatId, EventSource, ProjectId, RunId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::PathBuf;

/// Maximum number of argument keys kept in a structural preview.
const PREVIEW_MAX_KEYS: usize = 16;

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts: DateTime<Utc>,
    pub tool: String,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub require_confirm: bool,
    pub args_sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_sha256: Option<String>,
    /// Sorted argument keys with JSON type tags, e.g. `"path:str"`.
    #[serde(default)]
    pub preview: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,
    pub source: EventSource,
}

/// Append-only JSONL audit sink.
pub struct AuditWriter {
    path: PathBuf,
    file: Mutex<Option<std::fs::File>>,
}

impl AuditWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), file: Mutex::new(None) }
    }

    pub fn append(&self, entry: &AuditEntry) -> std::io::Result<()> {
        let line = serde_json::to_string(entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut guard = self.file.lock();
        if guard.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            *guard =
                Some(std::fs::OpenOptions::new().create(true).append(true).open(&self.path)?);
        }
        let file = match guard.as_mut() {
            Some(f) => f,
            None => return Err(std::io::Error::other("audit file not open")),
        };
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()
    }
}

/// Digest of the canonical (sorted-key) JSON encoding of a value.
pub fn sha256_value(value: &Value) -> String {
    // serde_json object maps are BTreeMap-backed, so this is sorted-key.
    let canonical = value.to_string();
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}

/// Sorted argument keys plus type tags, bounded to [`PREVIEW_MAX_KEYS`].
pub fn structural_preview(args: &Value) -> Vec<String> {
    match args {
        Value::Object(map) => map
            .iter()
            .take(PREVIEW_MAX_KEYS)
            .map(|(k, v)| format!("{k}:{}", type_tag(v)))
            .collect(),
        other => vec![format!("_:{}", type_tag(other))],
    }
}

fn type_tag(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "num",
        Value::String(_) => "str",
        Value::Array(_) => "arr",
        Value::Object(_) => "obj",
    }
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;
