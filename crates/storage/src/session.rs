// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-chat JSONL session files and history reconstruction.
//!
//! `ensure_session` is the load-bearing contract: an incoming valid id is
//! always honored, the `latest` pointer is reused when the hint is empty,
//! and a new id is minted only when neither exists. No code path here
//! overwrites a valid existing chat id.

use crate::jsonl::recover_jsonl;
use crate::StorageError;
use amon_core::{ChatId, ChatKind, ChatRecord, DialogueTurn, ProjectPaths, Role, RunId};
use fs2::FileExt;
use std::fs;
use std::io::Write;

/// How an ensured session id was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsureSource {
    Incoming,
    Latest,
    New,
}

amon_core::simple_display! {
    EnsureSource {
        Incoming => "incoming",
        Latest => "latest",
        New => "new",
    }
}

/// Result of `ensure_session`.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsureResult {
    pub chat_id: ChatId,
    pub source: EnsureSource,
    /// Set when an invalid incoming id was replaced by latest/new.
    pub fell_back: bool,
}

/// Session storage for one project.
pub struct SessionStore {
    paths: ProjectPaths,
}

impl SessionStore {
    pub fn new(paths: ProjectPaths) -> Self {
        Self { paths }
    }

    /// Ensure-semantics session resolution.
    ///
    /// - a hint naming an existing session returns it (`incoming`);
    /// - an empty hint returns the `latest` pointer when it is still valid
    ///   (`latest`);
    /// - otherwise a new session is created, recorded as latest, and
    ///   returned (`new`).
    ///
    /// An invalid hint falls back to latest-or-new and flags `fell_back`
    /// so the caller can log the `chat_session_fallback` warning.
    pub fn ensure_session(&self, hint: Option<&ChatId>) -> Result<EnsureResult, StorageError> {
        let hint = hint.filter(|h| !h.is_empty());

        if let Some(id) = hint {
            if self.session_exists(id) {
                return Ok(EnsureResult { chat_id: *id, source: EnsureSource::Incoming, fell_back: false });
            }
            tracing::warn!(chat_id = %id, "chat_session_fallback: unknown incoming chat id");
            let mut result = self.latest_or_new()?;
            result.fell_back = true;
            return Ok(result);
        }

        self.latest_or_new()
    }

    fn latest_or_new(&self) -> Result<EnsureResult, StorageError> {
        if let Some(latest) = self.latest_chat_id()? {
            if self.session_exists(&latest) {
                return Ok(EnsureResult {
                    chat_id: latest,
                    source: EnsureSource::Latest,
                    fell_back: false,
                });
            }
        }

        let id = ChatId::new();
        fs::create_dir_all(self.paths.sessions_dir())?;
        fs::File::create(self.paths.session_file(&id))?;
        self.set_latest_chat_id(&id)?;
        Ok(EnsureResult { chat_id: id, source: EnsureSource::New, fell_back: false })
    }

    pub fn session_exists(&self, id: &ChatId) -> bool {
        self.paths.session_file(id).is_file()
    }

    /// Most recently created session, from the `latest` pointer file.
    pub fn latest_chat_id(&self) -> Result<Option<ChatId>, StorageError> {
        match fs::read_to_string(self.paths.latest_chat_file()) {
            Ok(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(ChatId::from_string(trimmed)))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_latest_chat_id(&self, id: &ChatId) -> Result<(), StorageError> {
        fs::write(self.paths.latest_chat_file(), id.as_str())?;
        Ok(())
    }

    /// Append one record. The session file is exclusive-write: an advisory
    /// lock guards against interleaved appends from concurrent turns.
    pub fn append(&self, chat_id: &ChatId, record: &ChatRecord) -> Result<(), StorageError> {
        let path = self.paths.session_file(chat_id);
        if !path.is_file() {
            return Err(StorageError::SessionNotFound(chat_id.to_string()));
        }
        let line = serde_json::to_string(record)?;
        let mut file = fs::OpenOptions::new().append(true).open(&path)?;
        file.lock_exclusive()?;
        let result = file
            .write_all(line.as_bytes())
            .and_then(|()| file.write_all(b"\n"))
            .and_then(|()| file.flush());
        let _ = fs2::FileExt::unlock(&file);
        result?;
        Ok(())
    }

    /// All records of a session, recovered to the last fully-written line.
    pub fn load_records(&self, chat_id: &ChatId) -> Result<Vec<ChatRecord>, StorageError> {
        let path = self.paths.session_file(chat_id);
        if !path.is_file() {
            return Err(StorageError::SessionNotFound(chat_id.to_string()));
        }
        recover_jsonl(&path)?;
        let content = fs::read_to_string(&path)?;
        let mut out = Vec::new();
        for line in content.lines() {
            match serde_json::from_str::<ChatRecord>(line) {
                Ok(rec) => out.push(rec),
                Err(e) => {
                    tracing::warn!(chat_id = %chat_id, error = %e, "skipping unreadable session line");
                }
            }
        }
        Ok(out)
    }

    /// Prompt history: `user` and terminal `assistant` records only, as
    /// `{role, text, ts}`, bounded to the last `max_turns` exchanges
    /// (2 records per turn).
    pub fn load_recent_dialogue(
        &self,
        chat_id: &ChatId,
        max_turns: usize,
    ) -> Result<Vec<DialogueTurn>, StorageError> {
        let records = self.load_records(chat_id)?;
        let mut dialogue: Vec<DialogueTurn> = records
            .into_iter()
            .filter_map(|rec| match rec.kind {
                ChatKind::User => Some(DialogueTurn {
                    role: Role::User,
                    text: rec.text.unwrap_or_default(),
                    ts: rec.ts,
                }),
                ChatKind::Assistant => Some(DialogueTurn {
                    role: Role::Assistant,
                    text: rec.text.unwrap_or_default(),
                    ts: rec.ts,
                }),
                _ => None,
            })
            .collect();

        let cap = max_turns.saturating_mul(2);
        if dialogue.len() > cap {
            dialogue.drain(..dialogue.len() - cap);
        }
        Ok(dialogue)
    }

    /// Most recent terminal assistant record's run id and text, for UI
    /// hydration.
    pub fn load_latest_run_context(
        &self,
        chat_id: &ChatId,
    ) -> Result<Option<(RunId, String)>, StorageError> {
        let records = self.load_records(chat_id)?;
        Ok(records.into_iter().rev().find(|r| r.kind == ChatKind::Assistant).and_then(|r| {
            let run_id = r.run_id?;
            Some((run_id, r.text.unwrap_or_default()))
        }))
    }

    /// Remove one session and, if it was the latest, clear the pointer.
    pub fn clear_session(&self, chat_id: &ChatId) -> Result<(), StorageError> {
        let path = self.paths.session_file(chat_id);
        if !path.is_file() {
            return Err(StorageError::SessionNotFound(chat_id.to_string()));
        }
        fs::remove_file(path)?;
        if self.latest_chat_id()? == Some(*chat_id) {
            let _ = fs::remove_file(self.paths.latest_chat_file());
        }
        Ok(())
    }

    /// Remove all sessions for the project.
    pub fn clear_all(&self) -> Result<usize, StorageError> {
        let dir = self.paths.sessions_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) == Some("jsonl") {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        let _ = fs::remove_file(self.paths.latest_chat_file());
        Ok(removed)
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
