// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run artifacts: files a run wrote under `docs/` or `workspace/`.

use crate::id::RunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Manifest entry for one file written by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Project-relative path.
    pub path: String,
    pub size: u64,
    pub mime: String,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
    pub source_run_id: RunId,
    pub source_node_id: String,
}

/// Sniff a mime type from magic bytes, falling back to the extension.
pub fn sniff_mime(bytes: &[u8], path: &str) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]) {
        return "image/png";
    }
    if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
        return "image/jpeg";
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return "image/gif";
    }
    if bytes.starts_with(b"%PDF-") {
        return "application/pdf";
    }
    if bytes.starts_with(&[0x50, 0x4b, 0x03, 0x04]) {
        return "application/zip";
    }
    if bytes.starts_with(&[0x1f, 0x8b]) {
        return "application/gzip";
    }

    let ext = path.rsplit('.').next().unwrap_or_default();
    match ext {
        "md" => "text/markdown",
        "json" | "jsonl" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "txt" | "log" => "text/plain",
        _ if looks_textual(bytes) => "text/plain",
        _ => "application/octet-stream",
    }
}

fn looks_textual(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(512)];
    !sample.contains(&0) && std::str::from_utf8(sample).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        png = { &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 1, 2], "x.bin", "image/png" },
        jpeg = { &[0xff, 0xd8, 0xff, 0xe0], "photo", "image/jpeg" },
        pdf = { b"%PDF-1.7 rest", "doc", "application/pdf" },
        markdown = { b"# Title", "docs/final.md", "text/markdown" },
        json = { b"{}", "state.json", "application/json" },
        plain_unknown_ext = { b"hello world", "NOTES", "text/plain" },
    )]
    fn sniffs(bytes: &[u8], path: &str, expect: &str) {
        assert_eq!(sniff_mime(bytes, path), expect);
    }

    #[test]
    fn binary_fallback() {
        let bytes = [0u8, 1, 2, 3];
        assert_eq!(sniff_mime(&bytes, "blob.weird"), "application/octet-stream");
    }
}
