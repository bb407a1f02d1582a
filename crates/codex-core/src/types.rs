use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a fresh identifier for plans, steps, and executions.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Lifecycle status shared by steps and whole executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Planning,
    Executing,
    Completed,
    Failed,
    Interrupted,
    RollingBack,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
            Self::RollingBack => "rolling_back",
        }
    }

    /// Whether a step in this state has finished running.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Interrupted)
    }

    /// Allowed forward transitions of the step state machine.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Planning, Executing)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Executing, Interrupted)
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource ceiling granted to one execution by the surrounding application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceQuota {
    pub cpu_time_secs: f64,
    pub memory_mb: u64,
    pub disk_mb: u64,
}

/// Identity and runtime data passed through an execution.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub user_id: String,
    pub tenant_id: String,
    /// Bearer token forwarded to sub-agent calls.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Base URL of the run-agent API; falls back to the configured default.
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub quota: Option<ResourceQuota>,
}

impl ExecutionContext {
    pub fn new(user_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            ..Default::default()
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    pub fn with_quota(mut self, quota: ResourceQuota) -> Self {
        self.quota = Some(quota);
        self
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("user_id", &self.user_id)
            .field("tenant_id", &self.tenant_id)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("quota", &self.quota)
            .finish()
    }
}

/// A single tool call handed to a `Tool` implementation.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub execution_id: String,
    pub step_id: String,
    pub action: String,
    /// The node's full data map.
    pub input: serde_json::Value,
    /// Scoped sandbox directory, removed once the call returns.
    pub workdir: PathBuf,
    pub context: ExecutionContext,
}

/// Completion request sent to the LLM collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub prompt: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Completion returned by the LLM collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub model: String,
    pub tokens_used: u64,
}

/// Execution event broadcast to all subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// A plan was compiled and the execution registered.
    ExecutionStarted {
        execution_id: String,
        plan_id: String,
        total_steps: usize,
    },
    /// A step entered `executing`.
    StepStarted {
        execution_id: String,
        step_id: String,
        node_id: String,
        node_type: String,
    },
    /// A step completed; `progress` is the fraction of steps completed so far.
    StepCompleted {
        execution_id: String,
        step_id: String,
        node_id: String,
        progress: f64,
    },
    StepFailed {
        execution_id: String,
        step_id: String,
        node_id: String,
        error: String,
    },
    /// A step was not run.
    StepSkipped {
        execution_id: String,
        step_id: String,
        node_id: String,
        reason: String,
    },
    RollbackPerformed {
        execution_id: String,
        step_id: String,
        success: bool,
    },
    ExecutionCompleted {
        execution_id: String,
        status: ExecutionStatus,
        steps_completed: usize,
        total_steps: usize,
        timestamp: DateTime<Utc>,
    },
    ExecutionCancelled {
        execution_id: String,
        rollbacks_performed: usize,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> &str {
        match self {
            Self::ExecutionStarted { execution_id, .. }
            | Self::StepStarted { execution_id, .. }
            | Self::StepCompleted { execution_id, .. }
            | Self::StepFailed { execution_id, .. }
            | Self::StepSkipped { execution_id, .. }
            | Self::RollbackPerformed { execution_id, .. }
            | Self::ExecutionCompleted { execution_id, .. }
            | Self::ExecutionCancelled { execution_id, .. } => execution_id,
        }
    }
}
