// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resolved task graphs: node specs, edges, guards, and canonical JSON.
//!
//! A resolved graph is what the runtime executes and what lands on disk as
//! `graph.resolved.json`. Nodes live in a `Vec` so declaration order (the
//! scheduling tie-break) survives the canonical sorted-key dump — JSON
//! arrays keep their order, only object keys are sorted.

use crate::event::Risk;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};

/// Retry policy for a node. Attempt `n` (1-based) backs off
/// `backoff_s * 2^(n-1)` seconds plus uniform jitter in `[0, jitter_s]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_s")]
    pub backoff_s: f64,
    #[serde(default)]
    pub jitter_s: f64,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_backoff_s() -> f64 {
    1.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: default_max_attempts(), backoff_s: default_backoff_s(), jitter_s: 0.0 }
    }
}

impl RetryPolicy {
    /// Backoff before retrying after the given failed attempt (1-based),
    /// excluding jitter.
    pub fn backoff_for_attempt(&self, attempt: u32) -> f64 {
        self.backoff_s * f64::powi(2.0, attempt.saturating_sub(1) as i32)
    }
}

/// Node timeouts in seconds. `inactivity_s` resets on any observed progress
/// token; `hard_s` is a wall-clock cap. `warning_after_s` emits a
/// non-terminal warning when it elapses with no token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_inactivity_s")]
    pub inactivity_s: u64,
    #[serde(default = "default_hard_s")]
    pub hard_s: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_after_s: Option<u64>,
}

fn default_inactivity_s() -> u64 {
    60
}

fn default_hard_s() -> u64 {
    600
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            inactivity_s: default_inactivity_s(),
            hard_s: default_hard_s(),
            warning_after_s: None,
        }
    }
}

/// Which engine executes a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionEngine {
    Llm,
    #[default]
    Tool,
    Hybrid,
}

crate::simple_display! {
    ExecutionEngine {
        Llm => "llm",
        Tool => "tool",
        Hybrid => "hybrid",
    }
}

/// Node behavior (closed set). The runtime dispatches on this tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// Model call; the response body is written to `output_path`.
    AgentTask {
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_path: Option<String>,
    },

    /// Literal file write.
    WriteFile { content: String, output_path: String },

    /// Tool capability invocation, gated by policy.
    ToolCall {
        tool: String,
        #[serde(default)]
        args: Value,
    },

    /// Predicate over session state; writes nothing.
    Condition { predicate: String },

    /// Bounded fan-out over an array session key. Children share the
    /// parent's timeouts; retry policy applies per child.
    Map {
        over: String,
        template: Box<NodeKind>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_children: Option<usize>,
    },

    /// Submit to the sandbox runner (input pack, output unpack).
    SandboxRun {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_path: Option<String>,
    },

    /// Emit a plan card and park the run until confirmed.
    Confirm {
        command: String,
        #[serde(default)]
        args: Value,
        #[serde(default)]
        risk: Risk,
        #[serde(default = "default_confirm_expiry_s")]
        expiry_s: u64,
    },
}

fn default_confirm_expiry_s() -> u64 {
    3600
}

impl NodeKind {
    /// Tag name for dispatch tables and log spans.
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::AgentTask { .. } => "agent_task",
            NodeKind::WriteFile { .. } => "write_file",
            NodeKind::ToolCall { .. } => "tool_call",
            NodeKind::Condition { .. } => "condition",
            NodeKind::Map { .. } => "map",
            NodeKind::SandboxRun { .. } => "sandbox_run",
            NodeKind::Confirm { .. } => "confirm",
        }
    }

    /// Whether executing this node dispatches a model call.
    pub fn needs_llm(&self) -> bool {
        match self {
            NodeKind::AgentTask { .. } => true,
            NodeKind::Map { template, .. } => template.needs_llm(),
            _ => false,
        }
    }

    /// The declared output path, if this node writes a file.
    pub fn output_path(&self) -> Option<&str> {
        match self {
            NodeKind::AgentTask { output_path, .. } => output_path.as_deref(),
            NodeKind::WriteFile { output_path, .. } => Some(output_path),
            NodeKind::SandboxRun { output_path, .. } => output_path.as_deref(),
            NodeKind::Map { template, .. } => template.output_path(),
            _ => None,
        }
    }
}

/// A vertex in the resolved graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Session keys this node reads.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reads: Vec<String>,
    /// Session keys this node writes. A key may carry a type hint after a
    /// colon (`"draft:text"`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub writes: Vec<String>,
    #[serde(default)]
    pub engine: ExecutionEngine,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub timeout: Timeouts,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            reads: Vec::new(),
            writes: Vec::new(),
            engine: ExecutionEngine::Tool,
            retry: RetryPolicy::default(),
            timeout: Timeouts::default(),
        }
    }

    crate::setters! {
        set {
            reads: Vec<String>,
            writes: Vec<String>,
            engine: ExecutionEngine,
            retry: RetryPolicy,
            timeout: Timeouts,
        }
    }

    /// Write keys with any `:hint` suffix stripped.
    pub fn write_keys(&self) -> impl Iterator<Item = &str> {
        self.writes.iter().map(|w| w.split(':').next().unwrap_or(w))
    }
}

/// Directed edge with an optional guard over session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self { from: from.into(), to: to.into(), when: None }
    }

    pub fn when(mut self, guard: impl Into<String>) -> Self {
        self.when = Some(guard.into());
        self
    }
}

/// Errors from graph loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("invalid graph JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("graph has no nodes")]
    Empty,

    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("edge references unknown node: {0}")]
    UnknownNode(String),

    #[error("graph contains a cycle involving node: {0}")]
    Cycle(String),

    #[error("node {node}: output path not under docs/, audits/ or workspace/: {path}")]
    InvalidOutputPath { node: String, path: String },
}

/// A resolved task DAG.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<NodeSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn new(nodes: Vec<NodeSpec>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    /// Parse and validate a resolved graph from JSON text.
    pub fn load(text: &str) -> Result<Self, GraphError> {
        let graph: Graph = serde_json::from_str(text)?;
        graph.validate()?;
        Ok(graph)
    }

    /// Canonical dump: stable JSON with sorted object keys.
    ///
    /// `load(dump(g))` then `dump` again yields byte-identical output,
    /// which run replay and content hashing rely on.
    pub fn dump(&self) -> Result<String, GraphError> {
        // serde_json::Value maps are BTreeMap-backed, so object keys come
        // out sorted; array (node/edge) order is preserved.
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_string_pretty(&value)?)
    }

    /// Content hash of the canonical dump.
    pub fn content_hash(&self) -> Result<String, GraphError> {
        let canonical = self.dump()?;
        Ok(format!("{:x}", Sha256::digest(canonical.as_bytes())))
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Incoming edges of a node, in declaration order.
    pub fn edges_into<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| e.to == id)
    }

    /// Outgoing edges of a node, in declaration order.
    pub fn edges_out_of<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| e.from == id)
    }

    pub fn validate(&self) -> Result<(), GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
            if let Some(path) = node.kind.output_path() {
                if !output_path_allowed(path) {
                    return Err(GraphError::InvalidOutputPath {
                        node: node.id.clone(),
                        path: path.to_string(),
                    });
                }
            }
        }

        for edge in &self.edges {
            for end in [&edge.from, &edge.to] {
                if !seen.contains(end.as_str()) {
                    return Err(GraphError::UnknownNode(end.clone()));
                }
            }
        }

        self.topo_layers().map(|_| ())
    }

    /// Kahn layering. Nodes in the same layer have no path between them
    /// and are eligible for concurrent execution; within a layer the order
    /// is declaration order.
    pub fn topo_layers(&self) -> Result<Vec<Vec<String>>, GraphError> {
        let mut in_degree: HashMap<&str, usize> =
            self.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        for edge in &self.edges {
            if let Some(d) = in_degree.get_mut(edge.to.as_str()) {
                *d += 1;
            }
        }

        let mut layers = Vec::new();
        let mut frontier: VecDeque<&str> = self
            .nodes
            .iter()
            .filter(|n| in_degree[n.id.as_str()] == 0)
            .map(|n| n.id.as_str())
            .collect();
        let mut resolved = 0usize;

        while !frontier.is_empty() {
            let layer: Vec<String> = frontier.iter().map(|s| s.to_string()).collect();
            resolved += layer.len();
            let mut next: Vec<&str> = Vec::new();
            for id in frontier.drain(..) {
                for edge in self.edges.iter().filter(|e| e.from == id) {
                    if let Some(d) = in_degree.get_mut(edge.to.as_str()) {
                        *d -= 1;
                        if *d == 0 {
                            next.push(edge.to.as_str());
                        }
                    }
                }
            }
            // Declaration order within the layer
            next.sort_by_key(|id| self.nodes.iter().position(|n| n.id == *id));
            frontier.extend(next);
            layers.push(layer);
        }

        if resolved != self.nodes.len() {
            let stuck = self
                .nodes
                .iter()
                .find(|n| in_degree[n.id.as_str()] > 0)
                .map(|n| n.id.clone())
                .unwrap_or_default();
            return Err(GraphError::Cycle(stuck));
        }
        Ok(layers)
    }
}

fn output_path_allowed(path: &str) -> bool {
    let p = std::path::Path::new(path);
    if p.is_absolute() || path.contains("..") {
        return false;
    }
    ["docs/", "audits/", "workspace/"].iter().any(|prefix| path.starts_with(prefix))
}

/// Evaluate an edge guard / condition predicate against session state.
///
/// Grammar: `key`, `!key`, `key == literal`, `key != literal`. Truthiness
/// follows JSON: `null`, `false`, `0`, `""`, `[]`, `{}` are falsy. An
/// absent guard is truthy; an unknown key is falsy.
pub fn eval_guard(expr: &str, state: &HashMap<String, Value>) -> bool {
    let expr = expr.trim();
    if expr.is_empty() {
        return true;
    }
    if let Some((lhs, rhs)) = expr.split_once("==") {
        return lookup(state, lhs.trim()).map(|v| value_matches(v, rhs.trim())).unwrap_or(false);
    }
    if let Some((lhs, rhs)) = expr.split_once("!=") {
        return !lookup(state, lhs.trim()).map(|v| value_matches(v, rhs.trim())).unwrap_or(false);
    }
    if let Some(key) = expr.strip_prefix('!') {
        return !lookup(state, key.trim()).map(is_truthy).unwrap_or(false);
    }
    lookup(state, expr).map(is_truthy).unwrap_or(false)
}

fn lookup<'a>(state: &'a HashMap<String, Value>, key: &str) -> Option<&'a Value> {
    state.get(key)
}

fn value_matches(value: &Value, literal: &str) -> bool {
    let literal = literal.trim_matches(|c| c == '"' || c == '\'');
    match value {
        Value::String(s) => s == literal,
        Value::Bool(b) => literal.parse::<bool>().map(|l| l == *b).unwrap_or(false),
        Value::Number(n) => literal.parse::<f64>().map(|l| Some(l) == n.as_f64()).unwrap_or(false),
        _ => false,
    }
}

/// JSON truthiness for guards and condition nodes.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
#[path = "graph_tests.rs"]
mod tests;
