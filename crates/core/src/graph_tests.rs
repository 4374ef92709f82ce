// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use proptest::prelude::*;
use serde_json::json;

fn diamond() -> Graph {
    Graph::new(
        vec![
            NodeSpec::new("a", NodeKind::Condition { predicate: "go".into() }),
            NodeSpec::new(
                "b",
                NodeKind::WriteFile { content: "left".into(), output_path: "docs/b.md".into() },
            ),
            NodeSpec::new(
                "c",
                NodeKind::WriteFile { content: "right".into(), output_path: "docs/c.md".into() },
            ),
            NodeSpec::new(
                "d",
                NodeKind::WriteFile { content: "join".into(), output_path: "docs/d.md".into() },
            ),
        ],
        vec![
            Edge::new("a", "b"),
            Edge::new("a", "c"),
            Edge::new("b", "d"),
            Edge::new("c", "d"),
        ],
    )
}

#[test]
fn topo_layers_diamond() {
    let layers = diamond().topo_layers().unwrap();
    assert_eq!(
        layers,
        vec![vec!["a".to_string()], vec!["b".to_string(), "c".to_string()], vec!["d".to_string()]]
    );
}

#[test]
fn layer_order_is_declaration_order() {
    // c is declared before b; the second layer must follow declaration order.
    let graph = Graph::new(
        vec![
            NodeSpec::new("root", NodeKind::Condition { predicate: "x".into() }),
            NodeSpec::new("c", NodeKind::Condition { predicate: "x".into() }),
            NodeSpec::new("b", NodeKind::Condition { predicate: "x".into() }),
        ],
        vec![Edge::new("root", "c"), Edge::new("root", "b")],
    );
    let layers = graph.topo_layers().unwrap();
    assert_eq!(layers[1], vec!["c".to_string(), "b".to_string()]);
}

#[test]
fn cycle_is_rejected() {
    let graph = Graph::new(
        vec![
            NodeSpec::new("a", NodeKind::Condition { predicate: "x".into() }),
            NodeSpec::new("b", NodeKind::Condition { predicate: "x".into() }),
        ],
        vec![Edge::new("a", "b"), Edge::new("b", "a")],
    );
    assert!(matches!(graph.validate(), Err(GraphError::Cycle(_))));
}

#[test]
fn duplicate_node_rejected() {
    let graph = Graph::new(
        vec![
            NodeSpec::new("a", NodeKind::Condition { predicate: "x".into() }),
            NodeSpec::new("a", NodeKind::Condition { predicate: "y".into() }),
        ],
        vec![],
    );
    assert!(matches!(graph.validate(), Err(GraphError::DuplicateNode(_))));
}

#[test]
fn edge_to_unknown_node_rejected() {
    let graph = Graph::new(
        vec![NodeSpec::new("a", NodeKind::Condition { predicate: "x".into() })],
        vec![Edge::new("a", "ghost")],
    );
    assert!(matches!(graph.validate(), Err(GraphError::UnknownNode(_))));
}

#[test]
fn output_path_outside_allowed_dirs_rejected() {
    let graph = Graph::new(
        vec![NodeSpec::new(
            "a",
            NodeKind::WriteFile { content: "x".into(), output_path: "../etc/passwd".into() },
        )],
        vec![],
    );
    assert!(matches!(graph.validate(), Err(GraphError::InvalidOutputPath { .. })));

    let graph = Graph::new(
        vec![NodeSpec::new(
            "a",
            NodeKind::WriteFile { content: "x".into(), output_path: "/tmp/x".into() },
        )],
        vec![],
    );
    assert!(matches!(graph.validate(), Err(GraphError::InvalidOutputPath { .. })));
}

#[test]
fn dump_is_stable_under_reload() {
    let graph = diamond();
    let once = graph.dump().unwrap();
    let reloaded = Graph::load(&once).unwrap();
    let twice = reloaded.dump().unwrap();
    assert_eq!(once, twice);
}

#[test]
fn dump_sorts_object_keys_but_keeps_node_order() {
    let graph = diamond();
    let dumped = graph.dump().unwrap();
    let value: serde_json::Value = serde_json::from_str(&dumped).unwrap();
    let ids: Vec<&str> =
        value["nodes"].as_array().unwrap().iter().map(|n| n["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["a", "b", "c", "d"]);
}

#[test]
fn content_hash_is_deterministic() {
    let g1 = diamond();
    let g2 = Graph::load(&g1.dump().unwrap()).unwrap();
    assert_eq!(g1.content_hash().unwrap(), g2.content_hash().unwrap());
}

#[test]
fn node_kind_tags() {
    let spec = NodeSpec::new(
        "t",
        NodeKind::ToolCall { tool: "fs.read".into(), args: json!({"path": "docs/a.md"}) },
    );
    let v = serde_json::to_value(&spec).unwrap();
    assert_eq!(v["type"], "tool_call");
    assert_eq!(spec.kind.name(), "tool_call");
}

#[test]
fn map_needs_llm_follows_template() {
    let map = NodeKind::Map {
        over: "items".into(),
        template: Box::new(NodeKind::AgentTask {
            prompt: "review {item}".into(),
            model: None,
            output_path: Some("docs/reviews/{index}.md".into()),
        }),
        max_children: Some(10),
    };
    assert!(map.needs_llm());
    assert_eq!(map.output_path(), Some("docs/reviews/{index}.md"));
}

#[test]
fn write_keys_strip_hints() {
    let spec = NodeSpec::new("a", NodeKind::Condition { predicate: "x".into() })
        .writes(vec!["draft:text".into(), "count".into()]);
    let keys: Vec<&str> = spec.write_keys().collect();
    assert_eq!(keys, vec!["draft", "count"]);
}

mod guards {
    use super::*;
    use std::collections::HashMap;

    fn state() -> HashMap<String, Value> {
        let mut s = HashMap::new();
        s.insert("ok".to_string(), json!(true));
        s.insert("name".to_string(), json!("amon"));
        s.insert("count".to_string(), json!(3));
        s.insert("empty".to_string(), json!(""));
        s.insert("zero".to_string(), json!(0));
        s
    }

    #[test]
    fn bare_key_truthiness() {
        let s = state();
        assert!(eval_guard("ok", &s));
        assert!(!eval_guard("empty", &s));
        assert!(!eval_guard("zero", &s));
        assert!(!eval_guard("missing", &s));
    }

    #[test]
    fn negation() {
        let s = state();
        assert!(!eval_guard("!ok", &s));
        assert!(eval_guard("!missing", &s));
    }

    #[test]
    fn equality() {
        let s = state();
        assert!(eval_guard("name == amon", &s));
        assert!(eval_guard("name == \"amon\"", &s));
        assert!(eval_guard("count == 3", &s));
        assert!(!eval_guard("name == other", &s));
        assert!(eval_guard("name != other", &s));
    }

    #[test]
    fn empty_guard_is_truthy() {
        assert!(eval_guard("", &state()));
        assert!(eval_guard("  ", &state()));
    }
}

proptest! {
    /// dumps(loads(dumps(loads(text)))) == dumps(loads(text)) for any graph
    /// built from arbitrary node/edge shapes.
    #[test]
    fn round_trip_is_idempotent(node_count in 1usize..6, edge_seed in 0usize..32) {
        let nodes: Vec<NodeSpec> = (0..node_count)
            .map(|i| {
                NodeSpec::new(
                    format!("n{i}"),
                    NodeKind::WriteFile {
                        content: format!("content {i}"),
                        output_path: format!("docs/n{i}.md"),
                    },
                )
            })
            .collect();
        // Forward-only edges keep the graph acyclic.
        let mut edges = Vec::new();
        for i in 0..node_count {
            for j in (i + 1)..node_count {
                if (edge_seed >> (i + j)) & 1 == 1 {
                    edges.push(Edge::new(format!("n{i}"), format!("n{j}")));
                }
            }
        }
        let graph = Graph::new(nodes, edges);
        let once = graph.dump().unwrap();
        let reloaded = Graph::load(&once).unwrap();
        let twice = reloaded.dump().unwrap();
        prop_assert_eq!(once, twice);
    }
}
