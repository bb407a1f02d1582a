use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use codex_core::error::{CodexError, Result};
use codex_core::traits::{LlmClient, Sandbox, ToolAccessChecker};
use codex_core::types::{ExecutionContext, LlmRequest, ToolInvocation};
use codex_tools::{SubAgentClient, ToolRegistry, DEFAULT_TOOL_TIMEOUT_SECS, TRIGGER_AGENT_TOOL};

use crate::graph::NodeKind;
use crate::plan::ExecutionStep;
use crate::rollback::{RollbackCoordinator, RollbackHook};

/// Per-step inputs the executor needs beyond the step itself.
pub struct StepScope<'a> {
    pub execution_id: &'a str,
    pub ctx: &'a ExecutionContext,
    /// Whether the plan marked this step as a rollback point.
    pub checkpoint: bool,
}

/// Runs a single step against its node-type handler.
pub struct StepExecutor {
    tools: Arc<ToolRegistry>,
    checker: Arc<dyn ToolAccessChecker>,
    sandbox: Arc<dyn Sandbox>,
    llm: Option<Arc<dyn LlmClient>>,
    sub_agent: SubAgentClient,
}

impl StepExecutor {
    pub fn new(
        tools: Arc<ToolRegistry>,
        checker: Arc<dyn ToolAccessChecker>,
        sandbox: Arc<dyn Sandbox>,
        llm: Option<Arc<dyn LlmClient>>,
        sub_agent: SubAgentClient,
    ) -> Self {
        Self {
            tools,
            checker,
            sandbox,
            llm,
            sub_agent,
        }
    }

    /// Dispatch `step` and return its output.
    pub async fn execute(
        &self,
        step: &ExecutionStep,
        scope: StepScope<'_>,
        rollback: &mut RollbackCoordinator,
    ) -> Result<Value> {
        match &step.node_type {
            NodeKind::Llm => self.execute_llm(step, &scope, rollback).await,
            NodeKind::Tool => self.execute_tool(step, &scope, rollback).await,
            NodeKind::Condition => Ok(evaluate_condition(step)),
            NodeKind::Entry
            | NodeKind::Exit
            | NodeKind::Loop
            | NodeKind::Parallel
            | NodeKind::Rollback => Ok(skipped(format!(
                "Node type {} not implemented",
                step.node_type
            ))),
            NodeKind::Unknown(raw) => Ok(skipped(format!("Unknown node type {}", raw))),
        }
    }

    async fn execute_llm(
        &self,
        step: &ExecutionStep,
        scope: &StepScope<'_>,
        rollback: &mut RollbackCoordinator,
    ) -> Result<Value> {
        let llm = self
            .llm
            .as_ref()
            .ok_or_else(|| CodexError::Llm("No LLM client configured".into()))?;

        let data = &step.input_data;
        let prompt = data
            .get("prompt")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CodexError::Llm(format!("LLM node '{}' has no prompt", step.node_id)))?;

        let request = LlmRequest {
            prompt: prompt.to_string(),
            system_prompt: str_field(data, "system_prompt"),
            model: str_field(data, "model"),
            max_tokens: data
                .get("max_tokens")
                .and_then(|v| v.as_u64())
                .and_then(|v| u32::try_from(v).ok()),
            temperature: data.get("temperature").and_then(|v| v.as_f64()).map(|t| t as f32),
        };

        debug!(execution_id = scope.execution_id, step_id = %step.step_id, "Calling LLM");
        let response = llm.complete(request).await?;

        let output = json!({
            "response": response.text,
            "tokens_used": response.tokens_used,
            "model": response.model,
        });

        // Completions have no external side effects; the checkpoint only
        // keeps the step in the reverse rollback sequence.
        if scope.checkpoint {
            rollback.arm(RollbackHook::noop(
                step.step_id.clone(),
                json!({ "model": output["model"].clone() }),
            ));
        }
        Ok(output)
    }

    async fn execute_tool(
        &self,
        step: &ExecutionStep,
        scope: &StepScope<'_>,
        rollback: &mut RollbackCoordinator,
    ) -> Result<Value> {
        let data = &step.input_data;
        let tool_name = data
            .get("tool")
            .or_else(|| data.get("tool_name"))
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let action = data
            .get("action")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        if tool_name == TRIGGER_AGENT_TOOL {
            return self.sub_agent.trigger(data, scope.ctx).await;
        }

        if tool_name.is_empty() {
            return Err(CodexError::ToolValidation("Tool name is required".into()));
        }

        if !self.checker.validate_tool_access(tool_name, action, scope.ctx) {
            return Err(CodexError::AccessDenied {
                tool: tool_name.to_string(),
                action: action.to_string(),
            });
        }

        if !self.checker.check_resource_quota(tool_name, scope.ctx) {
            return Err(CodexError::QuotaExceeded(tool_name.to_string()));
        }

        if !self.checker.acquire_slot(tool_name, scope.ctx) {
            return Err(CodexError::ConcurrencyLimit(tool_name.to_string()));
        }
        let _slot = SlotGuard {
            checker: self.checker.as_ref(),
            tool: tool_name,
            ctx: scope.ctx,
        };

        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| CodexError::ToolNotFound(tool_name.to_string()))?;

        // Dropping the lease removes the directory on every exit path.
        let lease = self.sandbox.acquire(scope.execution_id, &step.step_id)?;
        let workdir = lease.path().to_path_buf();

        if scope.checkpoint {
            rollback.arm(RollbackHook::for_tool(
                step.step_id.clone(),
                tool,
                json!({ "tool": tool_name, "action": action, "input": data }),
            ));
        }

        let invocation = ToolInvocation {
            execution_id: scope.execution_id.to_string(),
            step_id: step.step_id.clone(),
            action: action.to_string(),
            input: data.clone(),
            workdir: workdir.clone(),
            context: scope.ctx.clone(),
        };
        let timeout = self
            .checker
            .timeout_secs(tool_name)
            .unwrap_or(DEFAULT_TOOL_TIMEOUT_SECS);

        info!(
            execution_id = scope.execution_id,
            step_id = %step.step_id,
            tool = tool_name,
            action,
            "Executing tool"
        );
        let result = self.tools.execute(tool_name, invocation, timeout).await?;
        drop(lease);

        if scope.checkpoint {
            rollback.record_data(&step.step_id, "result", result.clone());
        }

        Ok(json!({
            "tool": tool_name,
            "action": action,
            "result": result,
            "workdir": workdir.display().to_string(),
        }))
    }
}

/// Releases a claimed concurrency slot on every exit path.
struct SlotGuard<'a> {
    checker: &'a dyn ToolAccessChecker,
    tool: &'a str,
    ctx: &'a ExecutionContext,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.checker.release_slot(self.tool, self.ctx);
    }
}

/// Only the literal string `"true"` is true; a missing condition defaults to it.
fn evaluate_condition(step: &ExecutionStep) -> Value {
    let condition = step
        .input_data
        .get("condition")
        .map(|v| v.as_str() == Some("true"))
        .unwrap_or(true);
    json!({ "condition_result": condition })
}

fn skipped(reason: String) -> Value {
    json!({ "status": "skipped", "reason": reason })
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(|v| v.as_str()).map(String::from)
}
