// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `amon run <prompt>`: one-shot chat run in an embedded daemon.

use super::{block_on, embedded_daemon};
use crate::exit_error::ExitError;
use amon_core::{ChatKind, DataDir, ProjectId, RunStatus};
use amon_daemon::orchestrator::{self, ChatMode};
use amon_storage::SessionStore;

pub fn run(
    data: DataDir,
    project: String,
    prompt: String,
    mode: Option<String>,
) -> Result<(), ExitError> {
    if prompt.trim().is_empty() {
        return Err(ExitError::validation("prompt must not be empty"));
    }
    let mode = match mode.as_deref() {
        None => None,
        Some(raw) => Some(
            ChatMode::parse(raw)
                .ok_or_else(|| ExitError::validation(format!("unknown mode: {raw}")))?,
        ),
    };

    block_on(async move {
        let daemon = embedded_daemon(data)?;
        let project_id = ProjectId::from_string(&project);
        if daemon.project_paths(&project_id).is_err() {
            daemon.create_project(Some(project_id), &project)?;
        }

        let turn =
            orchestrator::handle_message(&daemon, project_id, None, &prompt, mode).await?;
        eprintln!("run {} started (chat {})", turn.run_id, turn.chat_id);

        // Wait for the run to settle.
        let status = loop {
            match daemon.run_record(&turn.run_id) {
                Some(record)
                    if record.status.is_terminal()
                        || record.status == RunStatus::PendingConfirmation =>
                {
                    break record.status
                }
                _ => tokio::time::sleep(std::time::Duration::from_millis(50)).await,
            }
        };

        let store = SessionStore::new(daemon.project_paths(&project_id)?);
        let records = store
            .load_records(&turn.chat_id)
            .map_err(|e| ExitError::operational(e.to_string()))?;

        match status {
            RunStatus::Succeeded => {
                let answer = records
                    .iter()
                    .rev()
                    .find(|r| r.kind == ChatKind::Assistant)
                    .and_then(|r| r.text.clone())
                    .unwrap_or_default();
                println!("{answer}");
                Ok(())
            }
            RunStatus::PendingConfirmation => {
                println!("run {} is awaiting confirmation", turn.run_id);
                Ok(())
            }
            other => {
                let detail = records
                    .iter()
                    .rev()
                    .find(|r| r.kind == ChatKind::Error)
                    .and_then(|r| r.text.clone())
                    .unwrap_or_else(|| other.to_string());
                Err(ExitError::operational(format!("run {}: {detail}", turn.run_id)))
            }
        }
    })?
}
