// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Closed error taxonomy shared across the platform.
//!
//! Every user-visible failure carries one of these kinds; crate-local error
//! enums map into a kind at the boundary where the failure becomes a record
//! (event payload, stream frame, HTTP body).

use serde::{Deserialize, Serialize};

/// Error kinds (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ConfigInvalid,
    ModelAuthFailed,
    ModelRateLimit,
    ToolDenied,
    PathNotAllowed,
    BudgetExceeded,
    SkillParseFailed,
    IoError,
    Timeout,
    Cancelled,
    MissingChatId,
    ProtocolError,
}

crate::simple_display! {
    ErrorKind {
        ConfigInvalid => "CONFIG_INVALID",
        ModelAuthFailed => "MODEL_AUTH_FAILED",
        ModelRateLimit => "MODEL_RATE_LIMIT",
        ToolDenied => "TOOL_DENIED",
        PathNotAllowed => "PATH_NOT_ALLOWED",
        BudgetExceeded => "BUDGET_EXCEEDED",
        SkillParseFailed => "SKILL_PARSE_FAILED",
        IoError => "IO_ERROR",
        Timeout => "TIMEOUT",
        Cancelled => "CANCELLED",
        MissingChatId => "MISSING_CHAT_ID",
        ProtocolError => "PROTOCOL_ERROR",
    }
}

impl ErrorKind {
    /// Whether a node failure with this kind may be retried by the runtime.
    ///
    /// Policy denials and budget rejections are final for the invocation;
    /// retrying with the same inputs cannot change the outcome.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorKind::ToolDenied
                | ErrorKind::PathNotAllowed
                | ErrorKind::BudgetExceeded
                | ErrorKind::Cancelled
                | ErrorKind::ConfigInvalid
                | ErrorKind::MissingChatId
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        denied = { ErrorKind::ToolDenied },
        path = { ErrorKind::PathNotAllowed },
        budget = { ErrorKind::BudgetExceeded },
        cancelled = { ErrorKind::Cancelled },
    )]
    fn final_kinds_never_retry(kind: ErrorKind) {
        assert!(!kind.is_retryable());
    }

    #[parameterized(
        timeout = { ErrorKind::Timeout },
        io = { ErrorKind::IoError },
        rate_limit = { ErrorKind::ModelRateLimit },
    )]
    fn transient_kinds_retry(kind: ErrorKind) {
        assert!(kind.is_retryable());
    }

    #[test]
    fn serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorKind::PathNotAllowed).unwrap();
        assert_eq!(json, "\"PATH_NOT_ALLOWED\"");
        assert_eq!(ErrorKind::PathNotAllowed.to_string(), "PATH_NOT_ALLOWED");
    }
}
