// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem watcher: debounced `doc.*` / `workspace.file_*` events.
//!
//! External edits under a project's `docs/` and `workspace/` become
//! project events with actor `user`. Paths the runtime itself just wrote
//! are suppressed for a short window so system writes don't trigger the
//! hooks that watch for user changes.

use crate::daemon::Daemon;
use crate::error::DaemonError;
use amon_core::{Event, EventKind, ProjectId, ProjectPaths};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Debounce window per path.
pub const DEBOUNCE: Duration = Duration::from_millis(800);

/// How long a system-written path stays suppressed.
const SYSTEM_WRITE_WINDOW: Duration = Duration::from_secs(2);

/// Registry of paths recently written by the runtime.
#[derive(Default, Clone)]
pub struct SystemWrites {
    recent: Arc<Mutex<HashMap<PathBuf, Instant>>>,
}

impl SystemWrites {
    pub fn record(&self, path: PathBuf) {
        let mut recent = self.recent.lock();
        let now = Instant::now();
        recent.retain(|_, t| now - *t < SYSTEM_WRITE_WINDOW);
        recent.insert(path, now);
    }

    pub fn is_recent(&self, path: &Path) -> bool {
        let recent = self.recent.lock();
        recent.get(path).map(|t| t.elapsed() < SYSTEM_WRITE_WINDOW).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FsChange {
    Created,
    Updated,
    Deleted,
}

/// Watches one project's `docs/` and `workspace/` directories.
pub struct ProjectWatcher {
    daemon: Arc<Daemon>,
    project_id: ProjectId,
    paths: ProjectPaths,
    system_writes: SystemWrites,
}

impl ProjectWatcher {
    pub fn new(
        daemon: Arc<Daemon>,
        project_id: ProjectId,
        system_writes: SystemWrites,
    ) -> Result<Self, DaemonError> {
        let paths = daemon.project_paths(&project_id)?;
        Ok(Self { daemon, project_id, paths, system_writes })
    }

    /// Watch until cancelled. Debounces per path: rapid successive changes
    /// to one file collapse into the latest change after the window.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), DaemonError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Event>();
        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |result: Result<notify::Event, notify::Error>| {
                match result {
                    Ok(event) => {
                        let _ = tx.send(event);
                    }
                    Err(e) => tracing::warn!(error = %e, "watch error"),
                }
            })
            .map_err(|e| DaemonError::Protocol(format!("watcher init: {e}")))?;

        for dir in [self.paths.docs_dir(), self.paths.workspace_dir()] {
            std::fs::create_dir_all(&dir)?;
            watcher
                .watch(&dir, RecursiveMode::Recursive)
                .map_err(|e| DaemonError::Protocol(format!("watch {}: {e}", dir.display())))?;
        }
        tracing::info!(project = %self.project_id, "filesystem watcher started");

        // path → (change, deadline); flushed once the window passes.
        let mut pending: HashMap<PathBuf, (FsChange, Instant)> = HashMap::new();
        let mut flush_tick = tokio::time::interval(Duration::from_millis(100));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                Some(event) = rx.recv() => {
                    let Some(change) = classify(&event.kind) else { continue };
                    let deadline = Instant::now() + DEBOUNCE;
                    for path in event.paths {
                        pending.insert(path, (change, deadline));
                    }
                }
                _ = flush_tick.tick() => {
                    let now = Instant::now();
                    let ready: Vec<PathBuf> = pending
                        .iter()
                        .filter(|(_, (_, deadline))| now >= *deadline)
                        .map(|(path, _)| path.clone())
                        .collect();
                    for path in ready {
                        if let Some((change, _)) = pending.remove(&path) {
                            self.emit_change(&path, change);
                        }
                    }
                }
            }
        }
    }

    fn emit_change(&self, abs: &Path, change: FsChange) {
        if self.system_writes.is_recent(abs) {
            tracing::debug!(path = %abs.display(), "suppressed system write");
            return;
        }
        let Ok(rel) = abs.strip_prefix(self.paths.root()) else { return };
        let rel_str = rel.to_string_lossy().replace('\\', "/");

        let kind = if rel_str.starts_with("docs/") {
            match change {
                FsChange::Created => EventKind::DocCreated,
                FsChange::Updated => EventKind::DocUpdated,
                FsChange::Deleted => EventKind::DocDeleted,
            }
        } else if rel_str.starts_with("workspace/") {
            match change {
                FsChange::Created => EventKind::WorkspaceFileCreated,
                FsChange::Updated => EventKind::WorkspaceFileUpdated,
                FsChange::Deleted => EventKind::WorkspaceFileDeleted,
            }
        } else {
            return;
        };

        let size = std::fs::metadata(abs).map(|m| m.len()).unwrap_or(0);
        self.daemon.emit_project(
            &self.project_id,
            Event::new(kind)
                .actor("user")
                .payload(serde_json::json!({"path": rel_str, "size": size}))
                .dedupe_key(format!("fs:{rel_str}")),
        );
    }
}

fn classify(kind: &notify::EventKind) -> Option<FsChange> {
    match kind {
        notify::EventKind::Create(_) => Some(FsChange::Created),
        notify::EventKind::Modify(_) => Some(FsChange::Updated),
        notify::EventKind::Remove(_) => Some(FsChange::Deleted),
        _ => None,
    }
}

#[cfg(test)]
#[path = "watcher_tests.rs"]
mod tests;
