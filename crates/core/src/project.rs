// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bit-stable filesystem layout for the data dir and project sidecars.
//!
//! Every path the platform touches is derived here so the layout stays in
//! one place. Nothing in this module performs I/O beyond `create_dirs`.

use crate::id::{ChatId, HookId, JobId, ProjectId, RunId};
use std::path::{Path, PathBuf};

/// Root data directory (`$AMON_HOME`, else `$AMON_DATA_DIR`, else a
/// platform default supplied by the caller).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve from environment, falling back to the supplied default.
    pub fn from_env_or(default: impl Into<PathBuf>) -> Self {
        for var in ["AMON_HOME", "AMON_DATA_DIR"] {
            if let Ok(v) = std::env::var(var) {
                if !v.is_empty() {
                    return Self::new(v);
                }
            }
        }
        Self::new(default)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    pub fn project(&self, id: &ProjectId) -> ProjectPaths {
        ProjectPaths { root: self.projects_dir().join(id.as_str()) }
    }

    pub fn trash_dir(&self) -> PathBuf {
        self.root.join("trash")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn amon_log(&self) -> PathBuf {
        self.logs_dir().join("amon.log")
    }

    pub fn billing_log(&self) -> PathBuf {
        self.logs_dir().join("billing.log")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.logs_dir().join("audit.jsonl")
    }

    pub fn events_file(&self) -> PathBuf {
        self.root.join("events").join("events.jsonl")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn skills_index(&self) -> PathBuf {
        self.cache_dir().join("skills_index.json")
    }

    pub fn mcp_registry(&self) -> PathBuf {
        self.cache_dir().join("mcp_registry.json")
    }

    pub fn hooks_dir(&self) -> PathBuf {
        self.root.join("hooks")
    }

    pub fn hook_file(&self, id: &HookId) -> PathBuf {
        self.hooks_dir().join(format!("{id}.yaml"))
    }

    pub fn schedules_file(&self) -> PathBuf {
        self.root.join("schedules").join("schedules.json")
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.root.join("jobs")
    }

    pub fn job_file(&self, id: &JobId) -> PathBuf {
        self.jobs_dir().join(format!("{id}.yaml"))
    }

    pub fn job_state_file(&self, id: &JobId) -> PathBuf {
        self.jobs_dir().join("state").join(format!("{id}.json"))
    }
}

/// Paths inside one project directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("amon.project.yaml")
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.root.join("workspace")
    }

    pub fn docs_dir(&self) -> PathBuf {
        self.root.join("docs")
    }

    pub fn audits_dir(&self) -> PathBuf {
        self.root.join("audits")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions").join("chat")
    }

    pub fn session_file(&self, chat_id: &ChatId) -> PathBuf {
        self.sessions_dir().join(format!("{chat_id}.jsonl"))
    }

    /// Pointer file recording the most recently created session.
    pub fn latest_chat_file(&self) -> PathBuf {
        self.sessions_dir().join("latest")
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.root.join(".claude").join("skills")
    }

    pub fn sidecar_dir(&self) -> PathBuf {
        self.root.join(".amon")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.sidecar_dir().join("runs")
    }

    pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.runs_dir().join(run_id.as_str())
    }

    pub fn run_graph_file(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("graph.resolved.json")
    }

    pub fn run_state_file(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("state.json")
    }

    pub fn run_events_file(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("events.jsonl")
    }

    pub fn run_artifacts_file(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("artifacts.json")
    }

    pub fn run_plan_file(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("plan.json")
    }

    pub fn run_sandbox_result_file(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("sandbox").join("result.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.sidecar_dir().join("logs")
    }

    pub fn project_log(&self) -> PathBuf {
        self.logs_dir().join("project.log")
    }

    pub fn events_log(&self) -> PathBuf {
        self.logs_dir().join("events.log")
    }

    pub fn billing_log(&self) -> PathBuf {
        self.logs_dir().join("billing.log")
    }

    pub fn state_file(&self) -> PathBuf {
        self.sidecar_dir().join("state.json")
    }

    /// Create the directory skeleton for a new project.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.workspace_dir(),
            self.docs_dir(),
            self.audits_dir(),
            self.sessions_dir(),
            self.runs_dir(),
            self.logs_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "project_tests.rs"]
mod tests;
