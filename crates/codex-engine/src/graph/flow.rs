use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use codex_core::error::{CodexError, Result};

use super::edge::Edge;
use super::node::{Node, NodeKind};

/// Inbound JSON shape of a node: `{id, type, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub data: Value,
}

/// Inbound JSON shape of a flow: `{nodes, edges}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowDefinition {
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// Validated, immutable flow graph.
#[derive(Debug, Clone, Serialize)]
pub struct FlowGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl FlowGraph {
    /// Build a graph from already typed nodes.
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Result<Self> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if node.id.is_empty() {
                return Err(CodexError::InvalidGraph("node id must not be empty".into()));
            }
            if index.insert(node.id.clone(), i).is_some() {
                return Err(CodexError::InvalidGraph(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }

        for edge in &edges {
            for end in [&edge.source, &edge.target] {
                if !index.contains_key(end) {
                    return Err(CodexError::InvalidGraph(format!(
                        "edge {} -> {} references unknown node '{}'",
                        edge.source, edge.target, end
                    )));
                }
            }
        }

        Ok(Self {
            nodes,
            edges,
            index,
        })
    }

    /// Build a graph from its inbound definition, parsing node types.
    pub fn from_definition(definition: FlowDefinition) -> Result<Self> {
        let nodes = definition
            .nodes
            .into_iter()
            .map(|def| {
                let kind = NodeKind::parse(&def.id, &def.node_type)?;
                Ok(Node::new(def.id, kind).with_data(def.data))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(nodes, definition.edges)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let definition: FlowDefinition = serde_json::from_str(json)?;
        Self::from_definition(definition)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let definition: FlowDefinition = serde_json::from_value(value)?;
        Self::from_definition(definition)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Ids of the nodes `id` depends on, in edge order.
    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.target == id)
            .map(|e| e.source.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn linear() -> Value {
        json!({
            "nodes": [
                { "id": "start", "type": "entry" },
                { "id": "save", "type": "tool", "data": { "tool": "fs_write", "operation": "file_write" } },
                { "id": "end", "type": "exit", "data": {} }
            ],
            "edges": [
                { "source": "start", "target": "save" },
                { "source": "save", "target": "end" }
            ]
        })
    }

    #[test]
    fn parse_linear_flow() {
        let graph = FlowGraph::from_value(linear()).unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.edges().len(), 2);
        assert_eq!(graph.node("save").unwrap().kind, NodeKind::Tool);
        assert_eq!(graph.node("start").unwrap().data, json!({}));
        assert!(graph.node("missing").is_none());
        assert_eq!(graph.incoming("end").collect::<Vec<_>>(), vec!["save"]);
        assert_eq!(graph.incoming("start").count(), 0);
    }

    #[test]
    fn parse_from_json_string() {
        let graph = FlowGraph::from_json(&linear().to_string()).unwrap();
        assert_eq!(graph.nodes()[0].id, "start");
        assert!(FlowGraph::from_json("{not json").is_err());
    }

    #[test]
    fn malformed_type_fails_fast() {
        let flow = json!({ "nodes": [{ "id": "x", "type": "" }] });
        let err = FlowGraph::from_value(flow).unwrap_err();
        assert!(err.is_planning());
        assert!(matches!(err, CodexError::InvalidNodeType { .. }));
    }

    #[test]
    fn unknown_type_is_accepted() {
        let flow = json!({ "nodes": [{ "id": "w", "type": "custom_widget" }] });
        let graph = FlowGraph::from_value(flow).unwrap();
        assert_eq!(graph.node("w").unwrap().kind, NodeKind::Unknown("custom_widget".into()));
    }

    #[test]
    fn dangling_edge_rejected() {
        let flow = json!({
            "nodes": [{ "id": "a", "type": "entry" }],
            "edges": [{ "source": "a", "target": "ghost" }]
        });
        let err = FlowGraph::from_value(flow).unwrap_err();
        assert!(matches!(err, CodexError::InvalidGraph(msg) if msg.contains("ghost")));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let nodes = vec![Node::new("a", NodeKind::Entry), Node::new("a", NodeKind::Exit)];
        let err = FlowGraph::new(nodes, vec![]).unwrap_err();
        assert!(matches!(err, CodexError::InvalidGraph(_)));
    }

    #[test]
    fn empty_flow() {
        let graph = FlowGraph::from_value(json!({})).unwrap();
        assert!(graph.is_empty());
    }
}
