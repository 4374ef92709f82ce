// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daily LLM budget accounting.
//!
//! Every LLM-invoking node consults the gate before dispatch; an exceeded
//! budget parks the run for review instead of calling the model.

use amon_core::{ProjectId, TriggerKind};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default, Clone, Copy)]
struct DaySpend {
    date: Option<NaiveDate>,
    usd: f64,
}

impl DaySpend {
    fn on(&mut self, date: NaiveDate) -> &mut f64 {
        if self.date != Some(date) {
            self.date = Some(date);
            self.usd = 0.0;
        }
        &mut self.usd
    }

    fn current(&self, date: NaiveDate) -> f64 {
        if self.date == Some(date) {
            self.usd
        } else {
            0.0
        }
    }
}

/// Why an LLM dispatch was refused.
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetDenial {
    /// Global or per-project daily budget exhausted.
    DailyExceeded { spent: f64, budget: f64 },
    /// Automation budget for daemon-triggered runs exhausted.
    AutomationBlocked { spent: f64, budget: f64 },
}

/// Tracks per-day spend globally and per project.
pub struct BudgetGate {
    daily_budget: Option<f64>,
    per_project_budget: Option<f64>,
    global: Mutex<DaySpend>,
    per_project: Mutex<HashMap<ProjectId, DaySpend>>,
}

impl BudgetGate {
    pub fn new(daily_budget: Option<f64>, per_project_budget: Option<f64>) -> Self {
        Self {
            daily_budget,
            per_project_budget,
            global: Mutex::new(DaySpend::default()),
            per_project: Mutex::new(HashMap::new()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None, None)
    }

    /// Record provider-reported cost.
    pub fn record(&self, project: ProjectId, cost_usd: f64, now: DateTime<Utc>) {
        let date = now.date_naive();
        *self.global.lock().on(date) += cost_usd;
        *self.per_project.lock().entry(project).or_default().on(date) += cost_usd;
    }

    pub fn spent_today(&self, project: &ProjectId, now: DateTime<Utc>) -> f64 {
        let date = now.date_naive();
        self.per_project.lock().get(project).map(|s| s.current(date)).unwrap_or(0.0)
    }

    /// Check whether an LLM dispatch may proceed.
    ///
    /// `automation_budget_daily` applies only to daemon-triggered runs
    /// (hook/schedule/job); chat and CLI runs are gated by the global and
    /// per-project budgets alone.
    pub fn check(
        &self,
        project: &ProjectId,
        trigger: TriggerKind,
        automation_budget_daily: f64,
        now: DateTime<Utc>,
    ) -> Result<(), BudgetDenial> {
        let date = now.date_naive();
        let project_spent =
            self.per_project.lock().get(project).map(|s| s.current(date)).unwrap_or(0.0);

        if matches!(trigger, TriggerKind::Hook | TriggerKind::Schedule | TriggerKind::Job)
            && project_spent >= automation_budget_daily
        {
            return Err(BudgetDenial::AutomationBlocked {
                spent: project_spent,
                budget: automation_budget_daily,
            });
        }

        if let Some(budget) = self.daily_budget {
            let spent = self.global.lock().current(date);
            if spent >= budget {
                return Err(BudgetDenial::DailyExceeded { spent, budget });
            }
        }
        if let Some(budget) = self.per_project_budget {
            if project_spent >= budget {
                return Err(BudgetDenial::DailyExceeded { spent: project_spent, budget });
            }
        }
        Ok(())
    }
}
