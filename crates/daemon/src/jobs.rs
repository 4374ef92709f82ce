// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon job supervision and background task startup.
//!
//! Jobs are the daemon's long-running workers (watchers, the scheduler,
//! the hook pump). Each persists its health to
//! `<data>/jobs/state/<job_id>.json` and restarts with bounded retry when
//! its policy is `always`.

use crate::daemon::Daemon;
use crate::error::DaemonError;
use crate::hooks::{self, HookEngine};
use crate::scheduler::{self, Scheduler};
use crate::watcher::{ProjectWatcher, SystemWrites};
use amon_core::{Event, EventKind, JobId};
use amon_storage::save_json_atomic;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Maximum consecutive restarts before a job is abandoned.
const MAX_RESTARTS: u32 = 5;

/// Restart policy for a supervised job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    #[default]
    Always,
    Never,
}

/// Health snapshot persisted per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: JobId,
    pub status: String,
    pub restarts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

fn persist_state(daemon: &Daemon, state: &JobState) {
    let path = daemon.data.job_state_file(&state.job_id);
    if let Err(e) = save_json_atomic(&path, state) {
        tracing::warn!(job = %state.job_id, error = %e, "job state persist failed");
    }
}

/// Supervise one job: run it, restart on failure per policy, persist
/// health transitions, and emit `job.*` events.
pub fn supervise<F>(
    daemon: Arc<Daemon>,
    job_id: JobId,
    restart: RestartPolicy,
    cancel: CancellationToken,
    mut factory: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut() -> BoxFuture<'static, Result<(), String>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut restarts = 0u32;
        loop {
            persist_state(
                &daemon,
                &JobState {
                    job_id,
                    status: "running".into(),
                    restarts,
                    last_error: None,
                    updated_at: Utc::now(),
                },
            );
            daemon.emit_global(
                Event::new(EventKind::JobStarted)
                    .scope(amon_core::Scope::Global)
                    .payload(serde_json::json!({"job": job_id, "restarts": restarts})),
            );

            let result = tokio::select! {
                result = factory() => result,
                _ = cancel.cancelled() => {
                    persist_state(
                        &daemon,
                        &JobState {
                            job_id,
                            status: "stopped".into(),
                            restarts,
                            last_error: None,
                            updated_at: Utc::now(),
                        },
                    );
                    daemon.emit_global(
                        Event::new(EventKind::JobStopped)
                            .scope(amon_core::Scope::Global)
                            .payload(serde_json::json!({"job": job_id})),
                    );
                    return;
                }
            };

            match result {
                Ok(()) => {
                    persist_state(
                        &daemon,
                        &JobState {
                            job_id,
                            status: "stopped".into(),
                            restarts,
                            last_error: None,
                            updated_at: Utc::now(),
                        },
                    );
                    daemon.emit_global(
                        Event::new(EventKind::JobStopped)
                            .scope(amon_core::Scope::Global)
                            .payload(serde_json::json!({"job": job_id})),
                    );
                    return;
                }
                Err(message) => {
                    restarts += 1;
                    tracing::error!(job = %job_id, restarts, error = %message, "job failed");
                    persist_state(
                        &daemon,
                        &JobState {
                            job_id,
                            status: "failed".into(),
                            restarts,
                            last_error: Some(message.clone()),
                            updated_at: Utc::now(),
                        },
                    );
                    daemon.emit_global(
                        Event::new(EventKind::JobFailed)
                            .scope(amon_core::Scope::Global)
                            .payload(serde_json::json!({"job": job_id, "error": message})),
                    );
                    if restart == RestartPolicy::Never || restarts >= MAX_RESTARTS {
                        return;
                    }
                    let backoff = Duration::from_secs(1 << restarts.min(5));
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => return,
                    }
                }
            }
        }
    })
}

/// Handles to the daemon's background workers.
pub struct Background {
    pub cancel: CancellationToken,
    pub handles: Vec<tokio::task::JoinHandle<()>>,
}

impl Background {
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Start the daemon's background machinery: maintenance ticks, the hook
/// pump, the cron scheduler, and one watcher per project.
pub fn start_background(daemon: &Arc<Daemon>) -> Result<Background, DaemonError> {
    let cancel = CancellationToken::new();
    let mut handles = Vec::new();

    daemon.purge_trash();

    // Maintenance tick: dedupe flush + parked-run expiry.
    {
        let daemon = Arc::clone(daemon);
        let token = cancel.clone();
        handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = tick.tick() => daemon.maintenance_tick(),
                    _ = token.cancelled() => return,
                }
            }
        }));
    }

    // Hook pump.
    let rules = hooks::load_rules(&daemon.data)?;
    let engine = Arc::new(HookEngine::new(Arc::clone(daemon), rules));
    {
        let token = cancel.clone();
        let engine = Arc::clone(&engine);
        handles.push(supervise(
            Arc::clone(daemon),
            JobId::from_string("job-hook-pump"),
            RestartPolicy::Always,
            token.clone(),
            move || {
                let engine = Arc::clone(&engine);
                let token = token.clone();
                Box::pin(async move {
                    hooks::pump(engine, token).await;
                    Ok(())
                })
            },
        ));
    }

    // Cron scheduler.
    let schedules = scheduler::load_schedules(&daemon.data)?;
    if !schedules.is_empty() {
        let sched = Arc::new(Scheduler::new(Arc::clone(daemon), schedules, Utc::now()));
        let token = cancel.clone();
        handles.push(supervise(
            Arc::clone(daemon),
            JobId::from_string("job-scheduler"),
            RestartPolicy::Always,
            token.clone(),
            move || {
                let sched = Arc::clone(&sched);
                let token = token.clone();
                Box::pin(async move {
                    sched.run_loop(token).await;
                    Ok(())
                })
            },
        ));
    }

    // Mirror runtime writes into the watcher's suppression registry so a
    // node's own output doesn't come back as a user change.
    let system_writes = SystemWrites::default();
    {
        let daemon = Arc::clone(daemon);
        let writes = system_writes.clone();
        let token = cancel.clone();
        let sub = daemon.bus.subscribe(|e| {
            matches!(e.kind.family(), "doc" | "workspace") && e.actor == "system"
        });
        handles.push(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = sub.recv() => event,
                    _ = token.cancelled() => return,
                };
                let Some(project_id) = event.project_id else { continue };
                let Some(path) = event.payload.get("path").and_then(|p| p.as_str()) else {
                    continue;
                };
                if let Ok(paths) = daemon.project_paths(&project_id) {
                    writes.record(paths.root().join(path));
                }
            }
        }));
    }
    for (project_id, _) in daemon.list_projects()? {
        let token = cancel.clone();
        let daemon_for_job = Arc::clone(daemon);
        let writes = system_writes.clone();
        let job_id = JobId::from_string(format!("job-watch-{}", project_id.suffix()));
        handles.push(supervise(
            Arc::clone(daemon),
            job_id,
            RestartPolicy::Always,
            token.clone(),
            move || {
                let daemon = Arc::clone(&daemon_for_job);
                let token = token.clone();
                let writes = writes.clone();
                Box::pin(async move {
                    let watcher = ProjectWatcher::new(daemon, project_id, writes)
                        .map_err(|e| e.to_string())?;
                    watcher.run(token).await.map_err(|e| e.to_string())
                })
            },
        ));
    }

    Ok(Background { cancel, handles })
}

#[cfg(test)]
#[path = "jobs_tests.rs"]
mod tests;
