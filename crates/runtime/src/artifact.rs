// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Artifact manifest accumulation for a run.

use amon_core::{sniff_mime, Artifact, ProjectPaths, RunId};
use amon_storage::save_json_atomic;
use chrono::Utc;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

/// Records every successful write of a run and persists the manifest to
/// `.amon/runs/<run_id>/artifacts.json`.
pub struct ArtifactRecorder {
    paths: ProjectPaths,
    run_id: RunId,
    entries: Mutex<Vec<Artifact>>,
}

impl ArtifactRecorder {
    pub fn new(paths: ProjectPaths, run_id: RunId) -> Self {
        Self { paths, run_id, entries: Mutex::new(Vec::new()) }
    }

    /// Record one written file. `rel_path` is project-relative; the file
    /// must exist (it was just written).
    pub fn record(&self, rel_path: &str, node_id: &str) -> std::io::Result<Artifact> {
        let abs = self.paths.root().join(rel_path);
        let bytes = std::fs::read(&abs)?;
        let artifact = Artifact {
            path: rel_path.to_string(),
            size: bytes.len() as u64,
            mime: sniff_mime(&bytes, rel_path).to_string(),
            sha256: format!("{:x}", Sha256::digest(&bytes)),
            created_at: Utc::now(),
            source_run_id: self.run_id,
            source_node_id: node_id.to_string(),
        };
        self.entries.lock().push(artifact.clone());
        Ok(artifact)
    }

    pub fn entries(&self) -> Vec<Artifact> {
        self.entries.lock().clone()
    }

    /// Persist the manifest (atomic rewrite).
    pub fn save(&self) -> Result<(), amon_storage::StorageError> {
        let entries = self.entries.lock().clone();
        save_json_atomic(&self.paths.run_artifacts_file(&self.run_id), &entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amon_core::{DataDir, ProjectId};

    #[test]
    fn record_computes_hash_size_and_mime() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = DataDir::new(tmp.path()).project(&ProjectId::from_string("p1"));
        paths.create_dirs().unwrap();
        std::fs::write(paths.root().join("docs/out.md"), b"# Done\n").unwrap();

        let run_id = RunId::from_string("run-1");
        let recorder = ArtifactRecorder::new(paths.clone(), run_id);
        let artifact = recorder.record("docs/out.md", "draft").unwrap();

        assert_eq!(artifact.size, 7);
        assert_eq!(artifact.mime, "text/markdown");
        assert_eq!(artifact.sha256, format!("{:x}", Sha256::digest(b"# Done\n")));
        assert_eq!(artifact.source_node_id, "draft");

        recorder.save().unwrap();
        let manifest: Vec<Artifact> =
            serde_json::from_slice(&std::fs::read(paths.run_artifacts_file(&run_id)).unwrap())
                .unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0].path, "docs/out.md");
    }
}
