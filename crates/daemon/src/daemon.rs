// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared daemon state: config snapshot, event bus, run index, metrics.

use crate::config::{self, ConfigHandle};
use crate::error::DaemonError;
use amon_core::{
    ChatId, Clock, DataDir, Event, EventKind, ProjectConfig, ProjectId, ProjectPaths, Run, RunId,
    RunStatus, SystemClock, TriggerKind, TurnId,
};
use amon_policy::{AuditWriter, PathVault, PolicyGate};
use amon_runtime::{BudgetGate, EventBus, GraphRuntime, RunEnv, RuntimeDeps};
use amon_storage::EventLog;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// In-memory index entry for a run.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: RunId,
    pub project_id: ProjectId,
    pub chat_id: Option<ChatId>,
    pub turn_id: Option<TurnId>,
    pub trigger: TriggerKind,
    pub status: RunStatus,
}

struct ProjectStreams {
    events: Arc<EventLog>,
    billing: Arc<EventLog>,
}

/// Request/error counters behind `/health` and `/metrics`.
pub struct Metrics {
    pub request_total: AtomicU64,
    pub error_total: AtomicU64,
    window: Mutex<VecDeque<(Instant, bool)>>,
    pub started: Instant,
}

/// Sliding window for the recent error rate.
pub const ERROR_WINDOW: Duration = Duration::from_secs(60);

impl Metrics {
    fn new() -> Self {
        Self {
            request_total: AtomicU64::new(0),
            error_total: AtomicU64::new(0),
            window: Mutex::new(VecDeque::new()),
            started: Instant::now(),
        }
    }

    pub fn record(&self, is_error: bool) {
        self.request_total.fetch_add(1, Ordering::Relaxed);
        if is_error {
            self.error_total.fetch_add(1, Ordering::Relaxed);
        }
        let mut window = self.window.lock();
        let now = Instant::now();
        window.push_back((now, is_error));
        while window.front().map(|(t, _)| now - *t > ERROR_WINDOW).unwrap_or(false) {
            window.pop_front();
        }
    }

    /// `(request_count, error_count, error_rate)` over the window.
    pub fn recent(&self) -> (u64, u64, f64) {
        let window = self.window.lock();
        let now = Instant::now();
        let mut requests = 0u64;
        let mut errors = 0u64;
        for (t, is_error) in window.iter() {
            if now - *t <= ERROR_WINDOW {
                requests += 1;
                if *is_error {
                    errors += 1;
                }
            }
        }
        let rate = if requests == 0 { 0.0 } else { errors as f64 / requests as f64 };
        (requests, errors, rate)
    }
}

/// The daemon's shared state. One per process; handed around as `Arc`.
pub struct Daemon {
    pub data: DataDir,
    pub config: ConfigHandle,
    pub bus: EventBus,
    pub runtime: GraphRuntime<SystemClock>,
    pub deps: RuntimeDeps,
    pub budget: Arc<BudgetGate>,
    pub global_events: Arc<EventLog>,
    pub audit: Arc<AuditWriter>,
    pub metrics: Metrics,
    project_streams: Mutex<HashMap<ProjectId, Arc<ProjectStreams>>>,
    run_logs: Mutex<HashMap<RunId, Arc<EventLog>>>,
    runs: Mutex<HashMap<RunId, RunRecord>>,
    cancel_tokens: Mutex<HashMap<RunId, CancellationToken>>,
    clock: SystemClock,
}

impl Daemon {
    pub fn new(data: DataDir, deps: RuntimeDeps) -> Result<Arc<Self>, DaemonError> {
        let global = config::load_global(&data.config_file())?;
        let bus = EventBus::new(global.bus.clone());
        let budget = Arc::new(BudgetGate::new(
            global.budget.daily_budget,
            global.budget.per_project_budget,
        ));
        let runtime =
            GraphRuntime::new(deps.clone(), bus.clone(), SystemClock, global.runtime.clone());
        let global_events = Arc::new(EventLog::open(data.events_file())?);
        let audit = Arc::new(AuditWriter::new(data.audit_log()));

        Ok(Arc::new(Self {
            config: ConfigHandle::new(global),
            bus,
            runtime,
            deps,
            budget,
            global_events,
            audit,
            metrics: Metrics::new(),
            project_streams: Mutex::new(HashMap::new()),
            run_logs: Mutex::new(HashMap::new()),
            runs: Mutex::new(HashMap::new()),
            cancel_tokens: Mutex::new(HashMap::new()),
            clock: SystemClock,
            data,
        }))
    }

    pub fn clock(&self) -> &SystemClock {
        &self.clock
    }

    // --- projects ---

    pub fn project_paths(&self, project_id: &ProjectId) -> Result<ProjectPaths, DaemonError> {
        let paths = self.data.project(project_id);
        if !paths.exists() {
            return Err(DaemonError::ProjectNotFound(project_id.to_string()));
        }
        Ok(paths)
    }

    pub fn create_project(
        &self,
        project_id: Option<ProjectId>,
        name: &str,
    ) -> Result<ProjectId, DaemonError> {
        let id = project_id.unwrap_or_default();
        let paths = self.data.project(&id);
        paths.create_dirs()?;
        let project_config = ProjectConfig { name: name.to_string(), ..Default::default() };
        config::save_project(&paths, &project_config)?;
        tracing::info!(project = %id, name, "created project");
        Ok(id)
    }

    pub fn list_projects(&self) -> Result<Vec<(ProjectId, String)>, DaemonError> {
        let dir = self.data.projects_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut projects = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let id = ProjectId::from_string(entry.file_name().to_string_lossy());
            let paths = self.data.project(&id);
            let name = config::load_project(&paths).map(|c| c.name).unwrap_or_default();
            projects.push((id, name));
        }
        projects.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        Ok(projects)
    }

    pub fn project_config(&self, project_id: &ProjectId) -> Result<ProjectConfig, DaemonError> {
        config::load_project(&self.project_paths(project_id)?)
    }

    fn streams(&self, project_id: &ProjectId) -> Result<Arc<ProjectStreams>, DaemonError> {
        if let Some(streams) = self.project_streams.lock().get(project_id) {
            return Ok(Arc::clone(streams));
        }
        let paths = self.project_paths(project_id)?;
        let streams = Arc::new(ProjectStreams {
            events: Arc::new(EventLog::open(paths.events_log())?),
            billing: Arc::new(EventLog::open(paths.billing_log())?),
        });
        self.project_streams.lock().insert(*project_id, Arc::clone(&streams));
        Ok(streams)
    }

    pub fn project_events(&self, project_id: &ProjectId) -> Result<Arc<EventLog>, DaemonError> {
        Ok(Arc::clone(&self.streams(project_id)?.events))
    }

    pub fn project_billing(&self, project_id: &ProjectId) -> Result<Arc<EventLog>, DaemonError> {
        Ok(Arc::clone(&self.streams(project_id)?.billing))
    }

    /// Build the per-run environment: policy gate from the project config,
    /// the run's own event stream, and the shared project streams.
    pub fn run_env(
        &self,
        project_id: &ProjectId,
        run_id: &RunId,
    ) -> Result<RunEnv, DaemonError> {
        let paths = self.project_paths(project_id)?;
        let project_config = config::load_project(&paths)?;
        let vault = PathVault::new(paths.root(), self.data.trash_dir());
        let gate = Arc::new(PolicyGate::new(
            project_config.policy.clone(),
            vault.clone(),
            project_config.allowed_prefixes.clone(),
            Arc::clone(&self.audit),
        ));
        let streams = self.streams(project_id)?;
        Ok(RunEnv {
            run_log: self.run_log(&paths, run_id)?,
            project_log: Arc::clone(&streams.events),
            billing_log: Arc::clone(&streams.billing),
            budget: Arc::clone(&self.budget),
            automation_budget_daily: project_config.automation_budget_daily,
            gate,
            vault,
            paths,
        })
    }

    /// One shared handle per run stream: the runtime's writer and any
    /// stream readers must not hold independent handles on the same file.
    fn run_log(
        &self,
        paths: &ProjectPaths,
        run_id: &RunId,
    ) -> Result<Arc<EventLog>, DaemonError> {
        if let Some(log) = self.run_logs.lock().get(run_id) {
            return Ok(Arc::clone(log));
        }
        let log = Arc::new(EventLog::open(paths.run_events_file(run_id))?);
        self.run_logs.lock().insert(*run_id, Arc::clone(&log));
        Ok(log)
    }

    // --- run index ---

    pub fn register_run(&self, run: &Run, turn_id: Option<TurnId>) -> CancellationToken {
        let token = CancellationToken::new();
        self.runs.lock().insert(
            run.run_id,
            RunRecord {
                run_id: run.run_id,
                project_id: run.project_id,
                chat_id: run.chat_id,
                turn_id,
                trigger: run.trigger.kind,
                status: run.status,
            },
        );
        self.cancel_tokens.lock().insert(run.run_id, token.clone());
        token
    }

    pub fn update_run_status(&self, run_id: &RunId, status: RunStatus) {
        if let Some(record) = self.runs.lock().get_mut(run_id) {
            record.status = status;
        }
        if status.is_terminal() {
            self.cancel_tokens.lock().remove(run_id);
            // Readers re-open terminal run streams on demand; only live
            // runs need the shared writer handle.
            self.run_logs.lock().remove(run_id);
        }
    }

    pub fn run_record(&self, run_id: &RunId) -> Option<RunRecord> {
        self.runs.lock().get(run_id).cloned()
    }

    pub fn runs_for_project(&self, project_id: &ProjectId) -> Vec<RunRecord> {
        let mut records: Vec<RunRecord> = self
            .runs
            .lock()
            .values()
            .filter(|r| r.project_id == *project_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.run_id.as_str().cmp(b.run_id.as_str()));
        records
    }

    /// Most recent run bound to a chat (run ids are time-ordered).
    pub fn latest_run_for_chat(&self, chat_id: &ChatId) -> Option<RunRecord> {
        self.runs
            .lock()
            .values()
            .filter(|r| r.chat_id.as_ref() == Some(chat_id))
            .max_by(|a, b| a.run_id.as_str().cmp(b.run_id.as_str()))
            .cloned()
    }

    /// Parked run awaiting confirmation for a chat, if any.
    pub fn parked_run_for_chat(&self, chat_id: &ChatId) -> Option<RunRecord> {
        self.runs
            .lock()
            .values()
            .filter(|r| {
                r.chat_id.as_ref() == Some(chat_id)
                    && r.status == RunStatus::PendingConfirmation
            })
            .max_by(|a, b| a.run_id.as_str().cmp(b.run_id.as_str()))
            .cloned()
    }

    pub fn cancel_run(&self, run_id: &RunId) -> bool {
        match self.cancel_tokens.lock().get(run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Locate a run on disk when it isn't in the in-memory index (daemon
    /// restarted since it ran).
    pub fn find_run_on_disk(&self, run_id: &RunId) -> Result<ProjectId, DaemonError> {
        if let Some(record) = self.run_record(run_id) {
            return Ok(record.project_id);
        }
        for (project_id, _) in self.list_projects()? {
            let paths = self.data.project(&project_id);
            if paths.run_dir(run_id).is_dir() {
                return Ok(project_id);
            }
        }
        Err(DaemonError::RunNotFound(run_id.to_string()))
    }

    // --- periodic maintenance ---

    /// One maintenance pass: flush dedupe windows, expire parked runs,
    /// purge old trash. Driven by the lifecycle tick task.
    pub fn maintenance_tick(&self) {
        self.bus.flush_dedupe(Instant::now());

        let parked: Vec<RunRecord> = self
            .runs
            .lock()
            .values()
            .filter(|r| r.status == RunStatus::PendingConfirmation)
            .cloned()
            .collect();
        for record in parked {
            match self
                .run_env(&record.project_id, &record.run_id)
                .map_err(DaemonError::from)
                .and_then(|env| {
                    self.runtime.expire_parked(&record.run_id, &env).map_err(DaemonError::from)
                }) {
                Ok(Some(run)) => {
                    tracing::info!(run = %run.run_id, "expired parked run");
                    self.update_run_status(&record.run_id, run.status);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(run = %record.run_id, error = %e, "expiry sweep failed"),
            }
        }
    }

    /// Purge trash entries past retention. Called at startup and daily.
    pub fn purge_trash(&self) {
        let retain_days = self.config.snapshot().trash_retain_days;
        let vault = PathVault::new(self.data.root(), self.data.trash_dir());
        match vault.purge_expired(retain_days, self.clock.now_utc()) {
            Ok(0) => {}
            Ok(purged) => tracing::info!(purged, "purged expired trash entries"),
            Err(e) => tracing::warn!(error = %e, "trash purge failed"),
        }
    }

    /// Append an event to the global stream and the bus.
    pub fn emit_global(&self, event: Event) {
        let mut event = event;
        match self.global_events.append(event.clone()) {
            Ok(id) => event.event_id = id,
            Err(e) => tracing::error!(error = %e, "global event append failed"),
        }
        self.bus.publish(event);
    }

    /// Append an event to a project stream and the bus.
    pub fn emit_project(&self, project_id: &ProjectId, event: Event) {
        let mut event = event.project_id(*project_id);
        match self.project_events(project_id) {
            Ok(log) => match log.append(event.clone()) {
                Ok(id) => event.event_id = id,
                Err(e) => tracing::error!(error = %e, "project event append failed"),
            },
            Err(e) => tracing::warn!(error = %e, "project stream unavailable"),
        }
        self.bus.publish(event);
    }

    /// Whether an event kind marks a run reaching its end-of-stream.
    pub fn is_stream_terminal(kind: EventKind) -> bool {
        matches!(kind, EventKind::RunCompleted | EventKind::RunPendingConfirmation)
    }
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
