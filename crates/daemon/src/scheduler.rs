// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cron schedules: evaluate expressions, fire runs, tolerate misfires.

use crate::daemon::Daemon;
use crate::error::DaemonError;
use crate::graphs;
use crate::orchestrator::dispatch_automation;
use amon_core::{DataDir, Event, EventKind, ProjectId, Trigger, TriggerKind};
use chrono::{DateTime, Utc};
use croner::Cron;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// One schedule entry (`<data>/schedules/schedules.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDef {
    pub id: String,
    pub project_id: ProjectId,
    /// Five-field cron expression.
    pub cron: String,
    pub template_id: String,
    #[serde(default)]
    pub vars: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Random delay added per tick to spread load.
    #[serde(default = "default_jitter")]
    pub jitter_seconds: u64,
    /// A due time missed by more than this is skipped with
    /// `schedule.misfired` instead of fired late.
    #[serde(default = "default_misfire_grace")]
    pub misfire_grace_seconds: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_jitter() -> u64 {
    30
}

fn default_misfire_grace() -> u64 {
    300
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SchedulesFile {
    #[serde(default)]
    schedules: Vec<ScheduleDef>,
}

/// Load schedule definitions.
pub fn load_schedules(data: &DataDir) -> Result<Vec<ScheduleDef>, DaemonError> {
    let path = data.schedules_file();
    match std::fs::read_to_string(&path) {
        Ok(text) => {
            let file: SchedulesFile = serde_json::from_str(&text)
                .map_err(|e| DaemonError::ConfigInvalid(format!("{}: {e}", path.display())))?;
            Ok(file.schedules)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

struct Entry {
    def: ScheduleDef,
    cron: Cron,
    last_checked: DateTime<Utc>,
}

/// Evaluates schedules against the clock and dispatches runs.
pub struct Scheduler {
    daemon: Arc<Daemon>,
    entries: Mutex<Vec<Entry>>,
}

impl Scheduler {
    pub fn new(daemon: Arc<Daemon>, defs: Vec<ScheduleDef>, now: DateTime<Utc>) -> Self {
        let entries = defs
            .into_iter()
            .filter_map(|def| match Cron::new(&def.cron).parse() {
                Ok(cron) => Some(Entry { def, cron, last_checked: now }),
                Err(e) => {
                    tracing::error!(schedule = %def.id, error = %e, "invalid cron expression");
                    None
                }
            })
            .collect();
        Self { daemon, entries: Mutex::new(entries) }
    }

    /// One evaluation pass. Returns ids of runs dispatched this tick.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<amon_core::RunId> {
        let mut fired = Vec::new();
        let due: Vec<(ScheduleDef, DateTime<Utc>)> = {
            let mut entries = self.entries.lock();
            let mut due = Vec::new();
            for entry in entries.iter_mut() {
                if !entry.def.enabled {
                    entry.last_checked = now;
                    continue;
                }
                let next = match entry.cron.find_next_occurrence(&entry.last_checked, false) {
                    Ok(next) => next,
                    Err(e) => {
                        tracing::warn!(schedule = %entry.def.id, error = %e, "cron evaluation failed");
                        entry.last_checked = now;
                        continue;
                    }
                };
                if next <= now {
                    due.push((entry.def.clone(), next));
                    entry.last_checked = now;
                }
            }
            due
        };

        for (def, due_at) in due {
            let late = (now - due_at).num_seconds().max(0) as u64;
            if late > def.misfire_grace_seconds {
                tracing::warn!(schedule = %def.id, late_s = late, "schedule misfired");
                self.daemon.emit_project(
                    &def.project_id,
                    Event::new(EventKind::ScheduleMisfired)
                        .source(amon_core::EventSource::Schedule)
                        .payload(serde_json::json!({"schedule": def.id, "late_s": late})),
                );
                continue;
            }
            if let Some(run_id) = self.fire(&def) {
                fired.push(run_id);
            }
        }
        fired
    }

    fn fire(&self, def: &ScheduleDef) -> Option<amon_core::RunId> {
        self.daemon.emit_project(
            &def.project_id,
            Event::new(EventKind::ScheduleFired)
                .source(amon_core::EventSource::Schedule)
                .payload(serde_json::json!({"schedule": def.id, "template": def.template_id})),
        );

        let graph = graphs::template(&def.template_id, &def.vars);
        let trigger = Trigger::new(TriggerKind::Schedule, &def.id);
        match dispatch_automation(&self.daemon, def.project_id, graph, trigger, true) {
            Ok((run_id, _handle)) => {
                tracing::info!(schedule = %def.id, run = %run_id, "schedule dispatched run");
                Some(run_id)
            }
            Err(e) => {
                tracing::error!(schedule = %def.id, error = %e, "schedule dispatch failed");
                None
            }
        }
    }

    /// Tick loop with per-tick jitter, until cancelled.
    pub async fn run_loop(self: Arc<Self>, cancel: tokio_util::sync::CancellationToken) {
        let max_jitter =
            self.entries.lock().iter().map(|e| e.def.jitter_seconds).max().unwrap_or(0);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {
                    if max_jitter > 0 {
                        let jitter_ms = jitter_millis(max_jitter);
                        tokio::time::sleep(std::time::Duration::from_millis(jitter_ms)).await;
                    }
                    self.tick(Utc::now());
                }
                _ = cancel.cancelled() => return,
            }
        }
    }
}

/// Small random delay in milliseconds, seeded from UUID entropy.
fn jitter_millis(max_s: u64) -> u64 {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    let n = u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]);
    n % (max_s * 1000 / 10 + 1)
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
