use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use codex_core::error::{CodexError, Result};
use codex_core::traits::Tool;
use codex_core::types::ToolInvocation;

/// Timeout applied when the access checker has no entry for a tool.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 60;

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Register an already shared tool.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tools.
    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Execute a tool by name, bounded by `timeout_secs`.
    pub async fn execute(
        &self,
        name: &str,
        invocation: ToolInvocation,
        timeout_secs: u64,
    ) -> Result<serde_json::Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| CodexError::ToolNotFound(name.to_string()))?;

        let timeout = Duration::from_secs(timeout_secs);

        match tokio::time::timeout(timeout, tool.execute(invocation)).await {
            Ok(result) => result,
            Err(_) => Err(CodexError::ToolTimeout {
                tool: name.to_string(),
                timeout_secs,
            }),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
