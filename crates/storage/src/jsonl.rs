// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Line-oriented JSON helpers with corrupt-tail recovery.

use std::fs;
use std::path::Path;

/// How many `.bak` generations to keep when rotating a damaged file.
const MAX_BACKUPS: u32 = 3;

/// Outcome of [`recover_jsonl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoverStats {
    pub valid_lines: usize,
    /// Bytes dropped from the tail (partial last line after a crash).
    pub truncated_bytes: usize,
    /// Whether a damaged original was rotated to `.bak`.
    pub rotated_backup: bool,
}

/// Recover a JSONL file in place: keep the longest prefix of fully-written
/// valid JSON lines, truncate anything after it. If mid-file corruption is
/// found (not just a partial tail), the original is preserved as `.bak`
/// (rotating earlier backups to `.bak.2`, `.bak.3`).
pub fn recover_jsonl(path: &Path) -> std::io::Result<RecoverStats> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RecoverStats::default()),
        Err(e) => return Err(e),
    };

    let mut valid_end = 0usize;
    let mut valid_lines = 0usize;
    let mut saw_garbage_line = false;

    let mut start = 0usize;
    while start < bytes.len() {
        let Some(rel) = bytes[start..].iter().position(|&b| b == b'\n') else {
            // Partial tail without newline: crash mid-write, drop it.
            break;
        };
        let end = start + rel;
        let line = &bytes[start..end];
        let ok = std::str::from_utf8(line)
            .ok()
            .map(|s| serde_json::from_str::<serde_json::Value>(s).is_ok())
            .unwrap_or(false);
        if !ok {
            // A complete but unparseable line: everything after is suspect.
            saw_garbage_line = true;
            break;
        }
        valid_lines += 1;
        valid_end = end + 1;
        start = end + 1;
    }

    let truncated_bytes = bytes.len() - valid_end;
    if truncated_bytes == 0 {
        return Ok(RecoverStats { valid_lines, ..Default::default() });
    }

    if saw_garbage_line {
        rotate_backup(path)?;
        fs::write(path, &bytes[..valid_end])?;
        tracing::warn!(
            path = %path.display(),
            valid_lines,
            dropped_bytes = truncated_bytes,
            "recovered corrupt stream; damaged original kept as .bak"
        );
        return Ok(RecoverStats { valid_lines, truncated_bytes, rotated_backup: true });
    }

    // Plain partial tail: truncate in place.
    let file = fs::OpenOptions::new().write(true).open(path)?;
    file.set_len(valid_end as u64)?;
    tracing::debug!(
        path = %path.display(),
        dropped_bytes = truncated_bytes,
        "truncated partial tail line"
    );
    Ok(RecoverStats { valid_lines, truncated_bytes, rotated_backup: false })
}

fn rotate_backup(path: &Path) -> std::io::Result<()> {
    // .bak is the most recent; shift older generations up.
    for n in (2..MAX_BACKUPS).rev() {
        let from = backup_path(path, n);
        if from.exists() {
            fs::rename(&from, backup_path(path, n + 1))?;
        }
    }
    let bak = backup_path(path, 1);
    if bak.exists() {
        fs::rename(&bak, backup_path(path, 2))?;
    }
    fs::copy(path, &bak)?;
    Ok(())
}

fn backup_path(path: &Path, n: u32) -> std::path::PathBuf {
    if n == 1 {
        path.with_extension("bak")
    } else {
        path.with_extension(format!("bak.{n}"))
    }
}

#[cfg(test)]
#[path = "jsonl_tests.rs"]
mod tests;
