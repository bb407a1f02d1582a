use std::sync::OnceLock;

use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::Value;

use codex_core::error::{CodexError, Result};

/// Node type of a flow node.
///
/// Well-formed type names outside the known set parse to `Unknown` and are
/// skipped at execution time instead of failing the plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Entry,
    Exit,
    Llm,
    Tool,
    Condition,
    Loop,
    Parallel,
    Rollback,
    Unknown(String),
}

fn type_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z][a-z0-9_-]*$").unwrap_or_else(|e| panic!("invalid node type pattern: {e}"))
    })
}

impl NodeKind {
    /// Parse a raw `type` string for the node `node_id`.
    pub fn parse(node_id: &str, raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        let kind = match normalized.as_str() {
            "entry" => Self::Entry,
            "exit" => Self::Exit,
            "llm" => Self::Llm,
            "tool" => Self::Tool,
            "condition" => Self::Condition,
            "loop" => Self::Loop,
            "parallel" => Self::Parallel,
            "rollback" => Self::Rollback,
            other if type_name_pattern().is_match(other) => Self::Unknown(other.to_string()),
            _ => {
                return Err(CodexError::InvalidNodeType {
                    node_id: node_id.to_string(),
                    raw: raw.to_string(),
                })
            }
        };
        Ok(kind)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Entry => "entry",
            Self::Exit => "exit",
            Self::Llm => "llm",
            Self::Tool => "tool",
            Self::Condition => "condition",
            Self::Loop => "loop",
            Self::Parallel => "parallel",
            Self::Rollback => "rollback",
            Self::Unknown(raw) => raw,
        }
    }

    /// A failure in a critical step aborts the rest of the plan.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Tool | Self::Llm)
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for NodeKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A node in a flow graph.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Free-form node configuration (`tool`, `action`, `operation`, `prompt`, ...).
    pub data: Value,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            data: Value::Object(Default::default()),
        }
    }

    /// Replace the node's data. `null` is normalized to an empty object.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = if data.is_null() {
            Value::Object(Default::default())
        } else {
            data
        };
        self
    }

    /// The declared `operation` name, used for rollback-point selection.
    pub fn operation(&self) -> Option<&str> {
        self.data.get("operation").and_then(|v| v.as_str())
    }
}
