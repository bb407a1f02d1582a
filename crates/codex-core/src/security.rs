use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::traits::ToolAccessChecker;
use crate::types::ExecutionContext;

/// Permission and resource envelope for one tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolPermission {
    #[serde(default = "default_allowed")]
    pub allowed: bool,
    /// CPU time limit in seconds.
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit_secs: f64,
    #[serde(default = "default_memory_limit")]
    pub memory_limit_mb: u64,
    /// Wall-clock limit for a single invocation.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Actions this tool may perform (empty = any).
    #[serde(default)]
    pub allowed_actions: Vec<String>,
}

fn default_allowed() -> bool {
    true
}

fn default_cpu_limit() -> f64 {
    30.0
}

fn default_memory_limit() -> u64 {
    512
}

fn default_timeout() -> u64 {
    60
}

fn default_max_concurrent() -> usize {
    5
}

impl ToolPermission {
    pub fn new(allowed: bool, cpu: f64, memory_mb: u64, timeout_secs: u64, max_concurrent: usize) -> Self {
        Self {
            allowed,
            cpu_limit_secs: cpu,
            memory_limit_mb: memory_mb,
            timeout_secs,
            max_concurrent,
            allowed_actions: vec![],
        }
    }
}

/// In-flight invocations keyed by `(tool, user_id)`.
type ActiveCounts = HashMap<(String, String), usize>;

/// Table-driven tool permission policy.
///
/// Clones share the in-flight counters, so a policy handed to an engine
/// keeps counting across executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionPolicy {
    #[serde(default = "PermissionPolicy::default_tools")]
    pub tools: HashMap<String, ToolPermission>,
    #[serde(skip)]
    active: Arc<Mutex<ActiveCounts>>,
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self {
            tools: Self::default_tools(),
            active: Arc::default(),
        }
    }
}

impl PermissionPolicy {
    /// Built-in tool permissions (5 defaults). Code and shell execution
    /// are disabled unless explicitly enabled.
    pub fn default_tools() -> HashMap<String, ToolPermission> {
        HashMap::from([
            ("fs_read".to_string(), ToolPermission::new(true, 30.0, 512, 60, 5)),
            ("fs_write".to_string(), ToolPermission::new(true, 60.0, 1024, 120, 3)),
            ("web_request".to_string(), ToolPermission::new(true, 30.0, 256, 60, 10)),
            ("code_execution".to_string(), ToolPermission::new(false, 300.0, 2048, 300, 1)),
            ("shell_command".to_string(), ToolPermission::new(false, 60.0, 512, 120, 1)),
        ])
    }

    pub fn permission(&self, tool: &str) -> Option<&ToolPermission> {
        self.tools.get(tool)
    }

    /// Invocations of `tool` currently running for `user_id`.
    pub fn active_count(&self, tool: &str, user_id: &str) -> usize {
        self.active()
            .get(&(tool.to_string(), user_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn active(&self) -> MutexGuard<'_, ActiveCounts> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add or replace a tool entry.
    pub fn with_tool(mut self, name: impl Into<String>, permission: ToolPermission) -> Self {
        self.tools.insert(name.into(), permission);
        self
    }
}

impl ToolAccessChecker for PermissionPolicy {
    fn validate_tool_access(&self, tool: &str, action: &str, ctx: &ExecutionContext) -> bool {
        let Some(permission) = self.tools.get(tool) else {
            warn!(tool, user_id = %ctx.user_id, "Unknown tool requested");
            return false;
        };

        if !permission.allowed {
            warn!(tool, user_id = %ctx.user_id, "Tool is disabled");
            return false;
        }

        if !permission.allowed_actions.is_empty()
            && !permission.allowed_actions.iter().any(|a| a == action)
        {
            warn!(tool, action, user_id = %ctx.user_id, "Tool action not permitted");
            return false;
        }

        true
    }

    fn check_resource_quota(&self, tool: &str, ctx: &ExecutionContext) -> bool {
        let (Some(permission), Some(quota)) = (self.tools.get(tool), ctx.quota.as_ref()) else {
            return true;
        };

        let fits = permission.cpu_limit_secs <= quota.cpu_time_secs
            && permission.memory_limit_mb <= quota.memory_mb;
        if !fits {
            warn!(
                tool,
                tenant_id = %ctx.tenant_id,
                cpu_limit = permission.cpu_limit_secs,
                memory_limit_mb = permission.memory_limit_mb,
                "Tool limits exceed execution quota"
            );
        }
        fits
    }

    fn timeout_secs(&self, tool: &str) -> Option<u64> {
        self.tools.get(tool).map(|p| p.timeout_secs)
    }

    fn acquire_slot(&self, tool: &str, ctx: &ExecutionContext) -> bool {
        let Some(permission) = self.tools.get(tool) else {
            return true;
        };

        let mut active = self.active();
        let count = active
            .entry((tool.to_string(), ctx.user_id.clone()))
            .or_insert(0);
        if *count >= permission.max_concurrent {
            warn!(
                tool,
                user_id = %ctx.user_id,
                max_concurrent = permission.max_concurrent,
                "Concurrent invocation limit reached"
            );
            return false;
        }
        *count += 1;
        true
    }

    fn release_slot(&self, tool: &str, ctx: &ExecutionContext) {
        let key = (tool.to_string(), ctx.user_id.clone());
        let mut active = self.active();
        if let Some(count) = active.get_mut(&key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                active.remove(&key);
            }
        }
    }
}
