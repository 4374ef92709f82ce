// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted fake capabilities for tests.

use crate::model::{ChatModel, ChatRequest, ChatResponse, ModelError, Usage};
use crate::sandbox::{SandboxError, SandboxRequest, SandboxResult, SandboxRunner};
use crate::tool::{Tool, ToolError};
use amon_core::Risk;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Scripted chat model: pops queued responses, streams them in small
/// chunks, and records every request for assertions.
#[derive(Clone, Default)]
pub struct FakeChatModel {
    responses: Arc<Mutex<VecDeque<Result<String, String>>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
    /// Chunk size for streaming; 0 streams the whole text at once.
    chunk_size: usize,
    cost_per_call: f64,
}

impl FakeChatModel {
    pub fn new() -> Self {
        Self { chunk_size: 4, cost_per_call: 0.01, ..Default::default() }
    }

    /// Queue a successful response.
    pub fn respond(self, text: impl Into<String>) -> Self {
        self.responses.lock().push_back(Ok(text.into()));
        self
    }

    /// Queue a rate-limit failure.
    pub fn fail_rate_limited(self) -> Self {
        self.responses.lock().push_back(Err("rate limited".into()));
        self
    }

    pub fn cost_per_call(mut self, cost: f64) -> Self {
        self.cost_per_call = cost;
        self
    }

    /// Requests seen so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ChatModel for FakeChatModel {
    async fn complete(
        &self,
        request: ChatRequest,
        tokens: mpsc::Sender<String>,
    ) -> Result<ChatResponse, ModelError> {
        self.requests.lock().push(request.clone());

        let scripted = self.responses.lock().pop_front();
        let text = match scripted {
            Some(Ok(text)) => text,
            Some(Err(msg)) => return Err(ModelError::RateLimit(msg)),
            // Default canned answer keeps graph-shaped tests short.
            None => format!("ok: {}", amon_core::short(&request.prompt, 40)),
        };

        if self.chunk_size == 0 {
            let _ = tokens.send(text.clone()).await;
        } else {
            let chars: Vec<char> = text.chars().collect();
            for chunk in chars.chunks(self.chunk_size) {
                let _ = tokens.send(chunk.iter().collect()).await;
                tokio::task::yield_now().await;
            }
        }

        Ok(ChatResponse {
            usage: Usage {
                input_tokens: request.prompt.len() as u64,
                output_tokens: text.len() as u64,
                cost_usd: self.cost_per_call,
            },
            text,
        })
    }
}

/// Fake tool that records calls and returns a scripted value (or echoes
/// its args).
#[derive(Clone)]
pub struct FakeTool {
    name: String,
    risk: Risk,
    response: Option<Value>,
    calls: Arc<Mutex<Vec<Value>>>,
}

impl FakeTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), risk: Risk::Low, response: None, calls: Arc::default() }
    }

    pub fn risk(mut self, risk: Risk) -> Self {
        self.risk = risk;
        self
    }

    pub fn respond_with(mut self, value: Value) -> Self {
        self.response = Some(value);
        self
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Tool for FakeTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn risk(&self) -> Risk {
        self.risk
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
        self.calls.lock().push(args.clone());
        Ok(self.response.clone().unwrap_or(args))
    }
}

/// Fake sandbox returning a scripted result.
#[derive(Clone)]
pub struct FakeSandbox {
    result: SandboxResult,
    requests: Arc<Mutex<Vec<SandboxRequest>>>,
}

impl FakeSandbox {
    pub fn succeeding(stdout: impl Into<String>) -> Self {
        Self {
            result: SandboxResult {
                exit_code: 0,
                stdout: stdout.into(),
                stderr: String::new(),
                outputs: Default::default(),
            },
            requests: Arc::default(),
        }
    }

    pub fn failing(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            result: SandboxResult {
                exit_code,
                stdout: String::new(),
                stderr: stderr.into(),
                outputs: Default::default(),
            },
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Vec<SandboxRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl SandboxRunner for FakeSandbox {
    async fn exec(&self, request: SandboxRequest) -> Result<SandboxResult, SandboxError> {
        self.requests.lock().push(request);
        Ok(self.result.clone())
    }
}
