// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! amon-storage: durable JSONL streams and per-chat session files.
//!
//! Everything here is append-only line-oriented JSON with crash recovery:
//! on open, a stream is truncated to its last fully-written line and any
//! damaged original is preserved as `.bak`.

pub mod event_log;
pub mod jsonl;
pub mod session;
pub mod state;

pub use event_log::{EventLog, EventLogConfig};
pub use jsonl::recover_jsonl;
pub use session::{EnsureResult, EnsureSource, SessionStore};
pub use state::{load_json, save_json_atomic};

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("session not found: {0}")]
    SessionNotFound(String),
}
