// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Graph builders: chat modes and automation templates.
//!
//! Builders produce resolved graphs; the runtime treats them like any
//! other graph. The terminal answer of a chat graph always lands in the
//! `final` session key so the orchestrator can append the assistant turn
//! without caring which mode ran.

use amon_core::graph::{Edge, Graph, NodeKind, NodeSpec};
use amon_core::{ExecutionEngine, Risk};
use serde_json::Value;
use std::collections::HashMap;

/// Number of parallel reviews in the self-critique mode.
pub const REVIEW_COUNT: usize = 10;

fn agent(id: &str, prompt: String, output_path: Option<String>, writes: &[&str]) -> NodeSpec {
    NodeSpec::new(id, NodeKind::AgentTask { prompt, model: None, output_path })
        .writes(writes.iter().map(|s| s.to_string()).collect())
        .engine(ExecutionEngine::Llm)
}

/// One agent task answering directly.
pub fn single(prompt: &str) -> Graph {
    Graph::new(
        vec![agent("answer", prompt.to_string(), Some("docs/answer.md".into()), &["final"])],
        vec![],
    )
}

/// Draft → ten parallel reviews → synthesis → `docs/final.md` whose first
/// line carries the `Final` marker.
pub fn self_critique(prompt: &str) -> Graph {
    let mut nodes = vec![agent(
        "draft",
        format!("Write a first draft for the following request.\n\n{prompt}"),
        Some("docs/draft.md".into()),
        &["draft"],
    )];
    let mut edges = Vec::new();

    let mut review_keys = Vec::new();
    for i in 0..REVIEW_COUNT {
        let id = format!("review-{i}");
        let key = format!("review{i}");
        nodes.push(agent(
            &id,
            format!(
                "You are reviewer {i} of {REVIEW_COUNT}. Critique the draft below; be specific \
                 about one weakness and one improvement.\n\n{{draft}}"
            ),
            Some(format!("docs/reviews/review-{i}.md")),
            &[&key],
        ));
        edges.push(Edge::new("draft", id));
        review_keys.push(key);
    }

    let review_block =
        review_keys.iter().map(|k| format!("{{{k}}}")).collect::<Vec<_>>().join("\n\n");
    nodes.push(agent(
        "synthesize",
        format!(
            "Rewrite the draft incorporating the reviews.\n\nDraft:\n{{draft}}\n\n\
             Reviews:\n{review_block}"
        ),
        None,
        &["final"],
    ));
    for i in 0..REVIEW_COUNT {
        edges.push(Edge::new(format!("review-{i}"), "synthesize"));
    }

    nodes.push(NodeSpec::new(
        "publish",
        NodeKind::WriteFile {
            content: "Final\n\n{final}".into(),
            output_path: "docs/final.md".into(),
        },
    ));
    edges.push(Edge::new("synthesize", "publish"));

    Graph::new(nodes, edges)
}

/// Plan → two workers → merge.
pub fn team(prompt: &str) -> Graph {
    let nodes = vec![
        agent(
            "plan",
            format!("Break the following request into two deliverables.\n\n{prompt}"),
            Some("docs/plan.md".into()),
            &["plan"],
        ),
        agent(
            "work-1",
            "Produce deliverable 1 of the plan.\n\n{plan}".into(),
            Some("docs/team/part-1.md".into()),
            &["part1"],
        ),
        agent(
            "work-2",
            "Produce deliverable 2 of the plan.\n\n{plan}".into(),
            Some("docs/team/part-2.md".into()),
            &["part2"],
        ),
        agent(
            "merge",
            "Merge the deliverables into one coherent answer.\n\nPart 1:\n{part1}\n\nPart 2:\n{part2}"
                .into(),
            Some("docs/final.md".into()),
            &["final"],
        ),
    ];
    let edges = vec![
        Edge::new("plan", "work-1"),
        Edge::new("plan", "work-2"),
        Edge::new("work-1", "merge"),
        Edge::new("work-2", "merge"),
    ];
    Graph::new(nodes, edges)
}

/// Resolve an automation template into a graph.
///
/// Hooks and schedules name templates; `vars` substitute into the
/// template's prompt/args. Unknown templates fall back to a single
/// agent task over the rendered prompt.
pub fn template(template_id: &str, vars: &HashMap<String, String>) -> Graph {
    let var = |key: &str, default: &str| vars.get(key).cloned().unwrap_or_else(|| default.into());
    match template_id {
        "summarize_doc" => {
            let path = var("path", "docs");
            Graph::new(
                vec![agent(
                    "summarize",
                    format!("Summarize the document at {path} in five bullet points."),
                    Some("docs/summaries/latest.md".into()),
                    &["final"],
                )],
                vec![],
            )
        }
        "audit_changes" => Graph::new(
            vec![agent(
                "audit",
                format!("Audit the recent change to {}.", var("path", "the workspace")),
                Some("audits/latest.md".into()),
                &["final"],
            )],
            vec![],
        ),
        other => Graph::new(
            vec![agent(
                "run",
                format!("Execute template {other} with vars {vars:?}."),
                None,
                &["final"],
            )],
            vec![],
        ),
    }
}

/// One-node tool graph for deterministic hook automation (no LLM).
pub fn tool_call(tool: &str, args: Value) -> Graph {
    Graph::new(
        vec![NodeSpec::new("call", NodeKind::ToolCall { tool: tool.to_string(), args })
            .writes(vec!["result".into()])],
        vec![],
    )
}

/// Wrap a graph behind a confirm node (high-risk hook rules).
pub fn with_confirmation(graph: Graph, command: &str) -> Graph {
    let mut nodes = vec![NodeSpec::new(
        "approve",
        NodeKind::Confirm {
            command: command.to_string(),
            args: Value::Null,
            risk: Risk::High,
            expiry_s: 3600,
        },
    )];
    let mut edges = Vec::new();
    // Every root of the wrapped graph now depends on approval.
    let roots: Vec<String> = graph
        .nodes
        .iter()
        .filter(|n| graph.edges_into(&n.id).next().is_none())
        .map(|n| n.id.clone())
        .collect();
    nodes.extend(graph.nodes);
    edges.extend(graph.edges);
    for root in roots {
        edges.push(Edge::new("approve", root));
    }
    Graph::new(nodes, edges)
}
