// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! YAML config loading with read-copy-on-update snapshots.
//!
//! Precedence is CLI > project > global > default; the loaders here fill
//! the global and project layers. Readers hold an `Arc` snapshot; a reload
//! swaps the pointer, so a reader never observes a partial update.

use crate::error::DaemonError;
use amon_core::{AmonConfig, ProjectConfig, ProjectPaths};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;

/// Atomically swappable config snapshot.
pub struct ConfigHandle {
    current: RwLock<Arc<AmonConfig>>,
}

impl ConfigHandle {
    pub fn new(config: AmonConfig) -> Self {
        Self { current: RwLock::new(Arc::new(config)) }
    }

    /// The current snapshot. Cheap; callers keep the `Arc` for the whole
    /// operation so mid-operation reloads don't tear.
    pub fn snapshot(&self) -> Arc<AmonConfig> {
        Arc::clone(&self.current.read())
    }

    /// Publish a new snapshot.
    pub fn replace(&self, config: AmonConfig) {
        *self.current.write() = Arc::new(config);
    }
}

/// Load `<data>/config.yaml`, falling back to defaults when absent.
pub fn load_global(path: &Path) -> Result<AmonConfig, DaemonError> {
    match std::fs::read_to_string(path) {
        Ok(text) => serde_yaml::from_str(&text)
            .map_err(|e| DaemonError::ConfigInvalid(format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AmonConfig::with_defaults()),
        Err(e) => Err(e.into()),
    }
}

/// Load a project's `amon.project.yaml`, falling back to defaults.
pub fn load_project(paths: &ProjectPaths) -> Result<ProjectConfig, DaemonError> {
    let path = paths.config_file();
    match std::fs::read_to_string(&path) {
        Ok(text) => serde_yaml::from_str(&text)
            .map_err(|e| DaemonError::ConfigInvalid(format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ProjectConfig::default()),
        Err(e) => Err(e.into()),
    }
}

/// Write a project config (used at project creation).
pub fn save_project(paths: &ProjectPaths, config: &ProjectConfig) -> Result<(), DaemonError> {
    let text = serde_yaml::to_string(config)
        .map_err(|e| DaemonError::ConfigInvalid(e.to_string()))?;
    std::fs::write(paths.config_file(), text)?;
    Ok(())
}
