use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use codex_core::error::{CodexError, Result};
use codex_core::types::ExecutionContext;

/// Reserved tool name that chains another agent through the run-agent API.
pub const TRIGGER_AGENT_TOOL: &str = "trigger_agent";

const DEFAULT_MODE: &str = "autonomous";

#[derive(Debug, Serialize)]
struct RunAgentRequest<'a> {
    agent_id: &'a str,
    input: &'a Value,
    context: &'a Value,
    mode: &'a str,
}

/// HTTP client for `POST {api_base}/api/v1/agents/run`.
///
/// Transport and status failures never surface as errors: they are folded
/// into an error-shaped output so the calling step still completes.
pub struct SubAgentClient {
    http: reqwest::Client,
    default_api_base: String,
    timeout: Duration,
}

impl SubAgentClient {
    pub fn new(default_api_base: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("CodexOS/0.3")
            .build()
            .map_err(|e| CodexError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            default_api_base: default_api_base.into(),
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Run the sub-agent named by `data.agent_id`.
    ///
    /// Only a missing `agent_id` is an error.
    pub async fn trigger(&self, data: &Value, ctx: &ExecutionContext) -> Result<Value> {
        let agent_id = data
            .get("agent_id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CodexError::ToolValidation("agent_id is required".into()))?;

        let input = data.get("input").cloned().unwrap_or_else(|| json!({}));
        let context = data.get("context").cloned().unwrap_or_else(|| json!({}));
        let mode = data
            .get("mode")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_MODE);

        let api_base = ctx
            .api_base
            .as_deref()
            .unwrap_or(&self.default_api_base)
            .trim_end_matches('/');
        let url = format!("{}/api/v1/agents/run", api_base);

        info!(agent_id, %url, mode, "Triggering sub-agent");

        let body = RunAgentRequest {
            agent_id,
            input: &input,
            context: &context,
            mode,
        };

        let mut request = self.http.post(&url).timeout(self.timeout).json(&body);
        if let Some(token) = ctx.access_token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(agent_id, error = %e, "Sub-agent request failed");
                return Ok(error_output(agent_id, e.to_string()));
            }
        };

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            warn!(agent_id, status = status.as_u16(), "Sub-agent returned error status");
            return Ok(error_output(
                agent_id,
                format!("HTTP {}: {}", status.as_u16(), text),
            ));
        }

        let payload: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(agent_id, error = %e, "Sub-agent response was not JSON");
                return Ok(error_output(agent_id, format!("Invalid response body: {}", e)));
            }
        };

        Ok(json!({
            "tool": TRIGGER_AGENT_TOOL,
            "agent_id": agent_id,
            "status": "success",
            "output": payload.get("output").cloned().unwrap_or(Value::Null),
            "execution_id": payload.get("execution_id").cloned().unwrap_or(Value::Null),
            "tokens_used": payload.get("tokens_used").and_then(|v| v.as_u64()).unwrap_or(0),
            "cost_cents": payload.get("cost_cents").and_then(|v| v.as_u64()).unwrap_or(0),
        }))
    }
}

fn error_output(agent_id: &str, error: String) -> Value {
    json!({
        "tool": TRIGGER_AGENT_TOOL,
        "agent_id": agent_id,
        "status": "error",
        "error": error,
    })
}
