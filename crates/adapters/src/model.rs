// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `ChatModel` capability: streaming LLM completions.

use amon_core::{DialogueTurn, ErrorKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Errors from model adapters.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model auth failed: {0}")]
    AuthFailed(String),

    #[error("model rate limited: {0}")]
    RateLimit(String),

    #[error("model transport error: {0}")]
    Transport(String),

    #[error("model call cancelled")]
    Cancelled,
}

impl ModelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModelError::AuthFailed(_) => ErrorKind::ModelAuthFailed,
            ModelError::RateLimit(_) => ErrorKind::ModelRateLimit,
            ModelError::Transport(_) => ErrorKind::IoError,
            ModelError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// One completion request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatRequest {
    pub model: Option<String>,
    pub system: Option<String>,
    pub history: Vec<DialogueTurn>,
    pub prompt: String,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into(), ..Default::default() }
    }

    amon_core::setters! {
        set {
            history: Vec<DialogueTurn>,
        }
        option {
            model: String,
            system: String,
        }
    }
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Provider-reported cost in USD; drives budget accounting.
    pub cost_usd: f64,
}

/// A finished completion.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatResponse {
    pub text: String,
    pub usage: Usage,
}

/// Streaming LLM capability.
///
/// Implementations push incremental text into `tokens` as it arrives (the
/// runtime feeds these to the inactivity timer and the live stream) and
/// return the aggregated response. Dropping the receiver must not fail the
/// completion.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        request: ChatRequest,
        tokens: mpsc::Sender<String>,
    ) -> Result<ChatResponse, ModelError>;
}

/// Model used when no provider is configured: every call fails with an
/// auth error that surfaces as `MODEL_AUTH_FAILED`.
#[derive(Debug, Clone, Default)]
pub struct NullChatModel;

#[async_trait]
impl ChatModel for NullChatModel {
    async fn complete(
        &self,
        _request: ChatRequest,
        _tokens: mpsc::Sender<String>,
    ) -> Result<ChatResponse, ModelError> {
        Err(ModelError::AuthFailed("no model provider configured (set OPENAI_API_KEY)".into()))
    }
}
