//! Mocks and fixtures shared by CodexOS tests.

use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use codex_core::error::{CodexError, Result};
use codex_core::traits::{LlmClient, Tool, ToolAccessChecker};
use codex_core::types::{ExecutionContext, LlmRequest, LlmResponse, ToolInvocation};

/// Install a test subscriber once. Honors `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Shared log of tool executions and compensations, by action name.
#[derive(Clone, Default)]
pub struct ToolLog {
    executed: Arc<Mutex<Vec<String>>>,
    compensated: Arc<Mutex<Vec<String>>>,
}

impl ToolLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn compensated(&self) -> Vec<String> {
        self.compensated.lock().unwrap().clone()
    }

    fn push_executed(&self, action: &str) {
        self.executed.lock().unwrap().push(action.to_string());
    }

    fn push_compensated(&self, rollback_data: &Value) {
        let action = rollback_data["action"].as_str().unwrap_or_default();
        self.compensated.lock().unwrap().push(action.to_string());
    }
}

/// Tool that succeeds and records every call.
pub struct RecordingTool {
    name: String,
    log: ToolLog,
}

impl RecordingTool {
    pub fn new(name: &str) -> Self {
        Self::with_log(name, ToolLog::new())
    }

    pub fn with_log(name: &str, log: ToolLog) -> Self {
        Self {
            name: name.to_string(),
            log,
        }
    }

    pub fn log(&self) -> ToolLog {
        self.log.clone()
    }
}

impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, invocation: ToolInvocation) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            self.log.push_executed(&invocation.action);
            Ok(json!({
                "tool": self.name,
                "action": invocation.action,
                "step_id": invocation.step_id,
                "workdir_exists": invocation.workdir.is_dir(),
            }))
        })
    }

    fn compensate(&self, rollback_data: Value) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            self.log.push_compensated(&rollback_data);
            Ok(true)
        })
    }
}

/// Tool whose execution always fails.
pub struct FailingTool {
    name: String,
    log: ToolLog,
    reversible: bool,
}

impl FailingTool {
    pub fn new(name: &str) -> Self {
        Self::with_log(name, ToolLog::new())
    }

    pub fn with_log(name: &str, log: ToolLog) -> Self {
        Self {
            name: name.to_string(),
            log,
            reversible: true,
        }
    }

    /// Compensation is still logged but reports failure.
    pub fn irreversible(mut self) -> Self {
        self.reversible = false;
        self
    }

    pub fn log(&self) -> ToolLog {
        self.log.clone()
    }
}

impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, invocation: ToolInvocation) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            Err(CodexError::ToolExecution {
                tool: self.name.clone(),
                message: format!("{} failed", invocation.action),
            })
        })
    }

    fn compensate(&self, rollback_data: Value) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            self.log.push_compensated(&rollback_data);
            Ok(self.reversible)
        })
    }
}

/// Tool that sleeps before succeeding. The execution is logged only once
/// the sleep finishes.
pub struct SlowTool {
    name: String,
    delay: Duration,
    log: ToolLog,
}

impl SlowTool {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
            log: ToolLog::new(),
        }
    }

    pub fn with_log(mut self, log: ToolLog) -> Self {
        self.log = log;
        self
    }

    pub fn log(&self) -> ToolLog {
        self.log.clone()
    }
}

impl Tool for SlowTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, invocation: ToolInvocation) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.log.push_executed(&invocation.action);
            Ok(json!({ "tool": self.name, "action": invocation.action }))
        })
    }

    fn compensate(&self, rollback_data: Value) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            self.log.push_compensated(&rollback_data);
            Ok(true)
        })
    }
}

/// LLM client returning a fixed completion.
pub struct MockLlm {
    text: String,
    tokens: u64,
    requests: Arc<Mutex<Vec<LlmRequest>>>,
}

impl MockLlm {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            tokens: 100,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<LlmRequest>>> {
        self.requests.clone()
    }
}

impl LlmClient for MockLlm {
    fn complete(&self, request: LlmRequest) -> BoxFuture<'_, Result<LlmResponse>> {
        Box::pin(async move {
            let model = request.model.clone().unwrap_or_else(|| "mock-model".to_string());
            self.requests.lock().unwrap().push(request);
            Ok(LlmResponse {
                text: self.text.clone(),
                model,
                tokens_used: self.tokens,
            })
        })
    }
}

/// Access checker that permits every tool.
pub struct AllowAll;

impl ToolAccessChecker for AllowAll {
    fn validate_tool_access(&self, _tool: &str, _action: &str, _ctx: &ExecutionContext) -> bool {
        true
    }

    fn check_resource_quota(&self, _tool: &str, _ctx: &ExecutionContext) -> bool {
        true
    }
}

/// Access checker that denies every tool.
pub struct DenyAll;

impl ToolAccessChecker for DenyAll {
    fn validate_tool_access(&self, _tool: &str, _action: &str, _ctx: &ExecutionContext) -> bool {
        false
    }

    fn check_resource_quota(&self, _tool: &str, _ctx: &ExecutionContext) -> bool {
        false
    }
}

/// Flow JSON `entry -> tool -> exit` where the tool node carries `data`.
pub fn single_tool_flow(tool_data: Value) -> Value {
    json!({
        "nodes": [
            { "id": "start", "type": "entry" },
            { "id": "work", "type": "tool", "data": tool_data },
            { "id": "end", "type": "exit" }
        ],
        "edges": [
            { "source": "start", "target": "work" },
            { "source": "work", "target": "end" }
        ]
    })
}

pub fn test_context() -> ExecutionContext {
    ExecutionContext::new("test-user", "test-tenant")
}
