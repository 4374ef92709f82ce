// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event emission shared by the run loop and node executors.
//!
//! Every event lands in the run's own stream (authoritative for resume),
//! the project stream, and the live bus. The id carried on the bus is the
//! run-stream id, which is what clients resume from.

use crate::bus::EventBus;
use amon_core::{ChatId, Event, EventKind, EventSource, NodeId, ProjectId, RunId, Scope};
use amon_storage::EventLog;
use serde_json::Value;
use std::sync::Arc;

pub(crate) struct Emitter {
    run_log: Arc<EventLog>,
    project_log: Arc<EventLog>,
    bus: EventBus,
    project_id: ProjectId,
    run_id: RunId,
    chat_id: Option<ChatId>,
    source: EventSource,
}

impl Emitter {
    pub fn new(
        run_log: Arc<EventLog>,
        project_log: Arc<EventLog>,
        bus: EventBus,
        project_id: ProjectId,
        run_id: RunId,
        chat_id: Option<ChatId>,
        source: EventSource,
    ) -> Self {
        Self { run_log, project_log, bus, project_id, run_id, chat_id, source }
    }

    /// Emit one event to the run stream, the project stream, and the bus.
    /// Returns the run-stream event id.
    pub fn emit(&self, kind: EventKind, node: Option<&str>, payload: Value) -> u64 {
        let mut event = Event::new(kind)
            .scope(Scope::Run)
            .project_id(self.project_id)
            .run_id(self.run_id)
            .source(self.source)
            .payload(payload);
        if let Some(node) = node {
            event.node_id = Some(NodeId::from_string(node));
        }
        if let Some(chat_id) = self.chat_id {
            event.chat_id = Some(chat_id);
        }

        let id = match self.run_log.append(event.clone()) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(error = %e, kind = %kind, "run event append failed");
                0
            }
        };
        event.event_id = id;

        let mut project_event = event.clone();
        project_event.scope = Scope::Project;
        if let Err(e) = self.project_log.append(project_event) {
            tracing::error!(error = %e, kind = %kind, "project event append failed");
        }

        self.bus.publish(event);
        id
    }
}
