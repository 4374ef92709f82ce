// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic writes, soft-delete to trash, and workspace containment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

/// Errors from vault operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path not allowed: {0}")]
    PathNotAllowed(String),

    #[error("trash entry not found: {0}")]
    TrashMissing(String),

    #[error("restore target already exists: {0}")]
    OriginOccupied(PathBuf),

    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Manifest written next to every trashed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrashManifest {
    pub original_path: PathBuf,
    pub deleted_at: DateTime<Utc>,
}

/// Receipt for a soft-deleted path.
#[derive(Debug, Clone, PartialEq)]
pub struct TrashTicket {
    pub id: String,
    pub trash_dir: PathBuf,
    pub original_path: PathBuf,
}

/// Filesystem operations scoped to a project, with soft-delete into a
/// shared trash area.
#[derive(Debug, Clone)]
pub struct PathVault {
    project_root: PathBuf,
    trash_root: PathBuf,
}

impl PathVault {
    pub fn new(project_root: impl Into<PathBuf>, trash_root: impl Into<PathBuf>) -> Self {
        Self { project_root: project_root.into(), trash_root: trash_root.into() }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Canonicalize a project-relative path and enforce containment.
    ///
    /// Rejects absolute paths, `..`, and drive prefixes up front, then
    /// resolves symlinks through the deepest existing ancestor and checks
    /// the result still lies under the project root.
    pub fn resolve_in_project(&self, rel: &str) -> Result<PathBuf, VaultError> {
        let rel_path = Path::new(rel);
        if rel_path.is_absolute() {
            return Err(VaultError::PathNotAllowed(rel.to_string()));
        }
        for component in rel_path.components() {
            match component {
                Component::ParentDir | Component::Prefix(_) | Component::RootDir => {
                    return Err(VaultError::PathNotAllowed(rel.to_string()));
                }
                _ => {}
            }
        }

        let joined = self.project_root.join(rel_path);
        let resolved = resolve_symlinks(&joined)?;
        let root = resolve_symlinks(&self.project_root)?;
        if !resolved.starts_with(&root) {
            return Err(VaultError::PathNotAllowed(rel.to_string()));
        }
        Ok(joined)
    }

    /// Write bytes so no partial file is ever visible under the target
    /// name: write to a temp sibling, fsync, then rename over the target.
    pub fn atomic_write(&self, path: &Path, bytes: &[u8]) -> Result<(), VaultError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| VaultError::PathNotAllowed(path.display().to_string()))?;
        let tmp = path.with_file_name(format!(".{file_name}.tmp-{}", nanoid::nanoid!(8)));

        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        drop(f);

        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    /// Soft-delete: move the target into `trash/<uuid>/` with a manifest
    /// recording where it came from. Never unlinks outside the project.
    pub fn delete(&self, rel: &str) -> Result<TrashTicket, VaultError> {
        let target = self.resolve_in_project(rel)?;
        if !target.exists() {
            return Err(VaultError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{}", target.display()),
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let entry_dir = self.trash_root.join(&id);
        fs::create_dir_all(&entry_dir)?;

        let manifest = TrashManifest { original_path: target.clone(), deleted_at: Utc::now() };
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
        self.atomic_write(&entry_dir.join("manifest.json"), &manifest_bytes)?;

        let payload = entry_dir.join(file_name_of(&target));
        fs::rename(&target, &payload)?;

        tracing::info!(path = %target.display(), trash_id = %id, "soft-deleted to trash");
        Ok(TrashTicket { id, trash_dir: entry_dir, original_path: target })
    }

    /// Move a trashed entry back to its original path. Fails if the origin
    /// is occupied again.
    pub fn restore(&self, trash_id: &str) -> Result<PathBuf, VaultError> {
        let entry_dir = self.trash_root.join(trash_id);
        let manifest_path = entry_dir.join("manifest.json");
        if !manifest_path.is_file() {
            return Err(VaultError::TrashMissing(trash_id.to_string()));
        }
        let manifest: TrashManifest = serde_json::from_slice(&fs::read(&manifest_path)?)?;

        if manifest.original_path.exists() {
            return Err(VaultError::OriginOccupied(manifest.original_path));
        }
        if let Some(parent) = manifest.original_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = entry_dir.join(file_name_of(&manifest.original_path));
        fs::rename(&payload, &manifest.original_path)?;
        fs::remove_dir_all(&entry_dir)?;
        Ok(manifest.original_path)
    }

    /// Drop trash entries older than `retain_days`. Returns how many were
    /// purged.
    pub fn purge_expired(&self, retain_days: u32, now: DateTime<Utc>) -> Result<usize, VaultError> {
        let cutoff = now - chrono::Duration::days(retain_days as i64);
        let mut purged = 0;
        let entries = match fs::read_dir(&self.trash_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let manifest_path = entry.path().join("manifest.json");
            let Ok(bytes) = fs::read(&manifest_path) else { continue };
            let Ok(manifest) = serde_json::from_slice::<TrashManifest>(&bytes) else { continue };
            if manifest.deleted_at < cutoff {
                fs::remove_dir_all(entry.path())?;
                purged += 1;
            }
        }
        Ok(purged)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "entry".into())
}

/// Canonicalize through the deepest existing ancestor so containment holds
/// even for paths that don't exist yet.
fn resolve_symlinks(path: &Path) -> Result<PathBuf, VaultError> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return Ok(path.to_path_buf()),
        }
    }
    let mut resolved = existing.canonicalize()?;
    for part in tail.into_iter().rev() {
        resolved.push(part);
    }
    Ok(resolved)
}

#[cfg(test)]
#[path = "vault_tests.rs"]
mod tests;
