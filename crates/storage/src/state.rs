// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic JSON state snapshots (run state, daemon job state).

use crate::StorageError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Serialize `value` and write it so readers never observe a partial file:
/// temp sibling + fsync + rename.
pub fn save_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("state");
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    let mut f = fs::File::create(&tmp)?;
    f.write_all(&bytes)?;
    f.sync_all()?;
    drop(f);

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Load a JSON snapshot. Returns `Ok(None)` when the file doesn't exist.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Snapshot {
        count: u32,
        name: String,
    }

    #[test]
    fn round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state/job-1.json");
        let snap = Snapshot { count: 7, name: "watcher".into() };

        save_json_atomic(&path, &snap).unwrap();
        let loaded: Snapshot = load_json(&path).unwrap().unwrap();
        assert_eq!(loaded, snap);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempdir().unwrap();
        let loaded: Option<Snapshot> = load_json(&dir.path().join("none.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn overwrite_leaves_no_temp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        save_json_atomic(&path, &Snapshot { count: 1, name: "a".into() }).unwrap();
        save_json_atomic(&path, &Snapshot { count: 2, name: "b".into() }).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["state.json"]);
        let loaded: Snapshot = load_json(&path).unwrap().unwrap();
        assert_eq!(loaded.count, 2);
    }
}
