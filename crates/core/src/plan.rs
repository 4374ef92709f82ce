// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plan cards: confirm-required payloads that park a run for user approval.

use crate::event::Risk;
use crate::id::{NodeId, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload emitted by a `confirm` node. The owning run stays in
/// `pending_confirmation` until the user confirms or `expiry` elapses,
/// at which point it auto-rejects with `cancelled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanCard {
    pub run_id: RunId,
    pub node_id: NodeId,
    pub command: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub risk: Risk,
    pub expiry: DateTime<Utc>,
}

impl PlanCard {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }
}
