// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Budget gating for automation.

use crate::prelude::*;
use amon_core::{EventKind, RunStatus};
use amon_daemon::scheduler::{ScheduleDef, Scheduler};
use chrono::{Duration, Utc};
use std::sync::Arc;

#[tokio::test]
async fn scheduler_run_parks_on_zero_automation_budget() {
    let platform = platform();
    let now = Utc::now();

    // automation_budget_daily defaults to 0 for new projects.
    let scheduler = Scheduler::new(
        Arc::clone(&platform.daemon),
        vec![ScheduleDef {
            id: "nightly".into(),
            project_id: platform.project_id,
            cron: "* * * * *".into(),
            template_id: "summarize_doc".into(),
            vars: Default::default(),
            enabled: true,
            jitter_seconds: 0,
            misfire_grace_seconds: 300,
        }],
        now - Duration::seconds(90),
    );

    let fired = scheduler.tick(now);
    assert_eq!(fired.len(), 1, "one schedule occurrence was due");

    // The run parks instead of calling the model.
    let status = platform.wait_for_run(&fired[0]).await;
    assert_eq!(status, RunStatus::PendingConfirmation);
    assert_eq!(platform.model.call_count(), 0, "no model call may happen");

    // billing.budget_exceeded is durably recorded in the project events.
    let log = platform.daemon.project_events(&platform.project_id).unwrap();
    let exceeded = log
        .read_filtered(|e| e.kind == EventKind::BillingBudgetExceeded)
        .unwrap();
    assert_eq!(exceeded.len(), 1);
    assert_eq!(exceeded[0].run_id, Some(fired[0]));

    // schedule.fired preceded it.
    let fired_events =
        log.read_filtered(|e| e.kind == EventKind::ScheduleFired).unwrap();
    assert_eq!(fired_events.len(), 1);
}

#[tokio::test]
async fn approving_budget_park_unlocks_the_model() {
    let platform = platform();
    let now = Utc::now();
    let scheduler = Scheduler::new(
        Arc::clone(&platform.daemon),
        vec![ScheduleDef {
            id: "nightly".into(),
            project_id: platform.project_id,
            cron: "* * * * *".into(),
            template_id: "summarize_doc".into(),
            vars: Default::default(),
            enabled: true,
            jitter_seconds: 0,
            misfire_grace_seconds: 300,
        }],
        now - Duration::seconds(90),
    );
    let fired = scheduler.tick(now);
    let run_id = fired[0];
    platform.wait_for_run(&run_id).await;

    // User review approves the parked run; the model then runs.
    let env = platform.daemon.run_env(&platform.project_id, &run_id).unwrap();
    let resumed = platform
        .daemon
        .runtime
        .confirm_run(&run_id, &env, true, Default::default())
        .await
        .unwrap();
    assert_eq!(resumed.status, RunStatus::Succeeded);
    assert_eq!(platform.model.call_count(), 1);
}
