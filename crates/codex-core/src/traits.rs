use std::path::Path;

use futures::future::BoxFuture;
use tracing::info;

use crate::error::Result;
use crate::types::*;

/// LLM completion provider. Model selection, cost accounting, and
/// provider fallback live behind this trait.
pub trait LlmClient: Send + Sync + 'static {
    fn complete(&self, request: LlmRequest) -> BoxFuture<'_, Result<LlmResponse>>;
}

/// Extensible tool execution with an optional compensating action.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (matches the `tool` field of a node's data).
    fn name(&self) -> &str;

    /// Execute the tool inside its sandbox directory.
    fn execute(&self, invocation: ToolInvocation) -> BoxFuture<'_, Result<serde_json::Value>>;

    /// Undo the side effects of an earlier invocation.
    ///
    /// `rollback_data` carries `tool`, `action`, `input` and, once the call
    /// has returned, `result`. Returns whether compensation succeeded.
    fn compensate(&self, rollback_data: serde_json::Value) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            info!(
                tool = %self.name(),
                action = %rollback_data["action"].as_str().unwrap_or_default(),
                "No compensation defined for tool, treating as rolled back"
            );
            Ok(true)
        })
    }
}

/// Permission and quota checks consulted before every tool invocation.
pub trait ToolAccessChecker: Send + Sync + 'static {
    fn validate_tool_access(&self, tool: &str, action: &str, ctx: &ExecutionContext) -> bool;

    fn check_resource_quota(&self, tool: &str, ctx: &ExecutionContext) -> bool;

    /// Upper bound on a single invocation of `tool`, if any.
    fn timeout_secs(&self, tool: &str) -> Option<u64> {
        let _ = tool;
        None
    }

    /// Claim an in-flight slot for `tool` on behalf of `ctx.user_id`.
    /// Every successful claim is paired with one `release_slot`.
    fn acquire_slot(&self, tool: &str, ctx: &ExecutionContext) -> bool {
        let _ = (tool, ctx);
        true
    }

    fn release_slot(&self, tool: &str, ctx: &ExecutionContext) {
        let _ = (tool, ctx);
    }
}

/// A scoped sandbox directory. Dropping the lease removes the directory.
pub trait SandboxLease: Send {
    fn path(&self) -> &Path;
}

/// Sandboxing facility handing out per-step working directories.
pub trait Sandbox: Send + Sync + 'static {
    fn acquire(&self, execution_id: &str, step_id: &str) -> Result<Box<dyn SandboxLease>>;
}
