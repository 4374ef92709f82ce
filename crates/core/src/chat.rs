// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat session records.
//!
//! A chat session is a JSONL file of these records, strictly append-only
//! and monotonic in `ts`. Every `user` record is eventually answered by a
//! terminal `assistant` record or an `error` record with `final = true`,
//! sharing the same `turn_id`.

use crate::id::{RunId, TurnId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session record kinds (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    User,
    AssistantChunk,
    Assistant,
    Router,
    ToolCall,
    ToolResult,
    Error,
    Plan,
    Confirm,
}

crate::simple_display! {
    ChatKind {
        User => "user",
        AssistantChunk => "assistant_chunk",
        Assistant => "assistant",
        Router => "router",
        ToolCall => "tool_call",
        ToolResult => "tool_result",
        Error => "error",
        Plan => "plan",
        Confirm => "confirm",
    }
}

/// One line of a chat session file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    #[serde(rename = "type")]
    pub kind: ChatKind,
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<TurnId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Only meaningful on `error` records: a final error terminates the turn.
    #[serde(rename = "final", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl ChatRecord {
    pub fn new(kind: ChatKind) -> Self {
        Self {
            kind,
            ts: Utc::now(),
            turn_id: None,
            run_id: None,
            text: None,
            is_final: false,
            payload: Value::Null,
        }
    }

    crate::setters! {
        set {
            ts: DateTime<Utc>,
            is_final: bool,
            payload: Value,
        }
        option {
            turn_id: TurnId,
            run_id: RunId,
            text: String,
        }
    }

    pub fn user(text: impl Into<String>, turn_id: TurnId) -> Self {
        Self::new(ChatKind::User).text(text).turn_id(turn_id)
    }

    pub fn assistant_chunk(text: impl Into<String>, turn_id: TurnId) -> Self {
        Self::new(ChatKind::AssistantChunk).text(text).turn_id(turn_id)
    }

    pub fn assistant(text: impl Into<String>, turn_id: TurnId, run_id: RunId) -> Self {
        Self::new(ChatKind::Assistant).text(text).turn_id(turn_id).run_id(run_id)
    }

    pub fn error_final(message: impl Into<String>, turn_id: TurnId) -> Self {
        Self::new(ChatKind::Error).text(message).turn_id(turn_id).is_final(true)
    }

    /// Whether this record terminates its turn (invariant I1).
    pub fn terminates_turn(&self) -> bool {
        match self.kind {
            ChatKind::Assistant => true,
            ChatKind::Error => self.is_final,
            _ => false,
        }
    }
}

/// Speaker role in reconstructed dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

crate::simple_display! {
    Role {
        User => "user",
        Assistant => "assistant",
    }
}

/// One turn of prompt history, reconstructed from `user` and terminal
/// `assistant` records only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub role: Role,
    pub text: String,
    pub ts: DateTime<Utc>,
}

#[cfg(test)]
#[path = "chat_tests.rs"]
mod tests;
