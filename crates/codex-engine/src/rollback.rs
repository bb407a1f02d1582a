use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{error, info, warn};

use codex_core::error::Result;
use codex_core::event::EventBus;
use codex_core::traits::Tool;
use codex_core::types::ExecutionEvent;

/// Compensating action invoked with the hook's rollback data.
pub type Compensation = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<bool>> + Send + Sync>;

/// Registered compensating action for one checkpointed step.
#[derive(Clone)]
pub struct RollbackHook {
    pub step_id: String,
    pub rollback_data: Value,
    compensation: Compensation,
}

impl RollbackHook {
    pub fn new(step_id: impl Into<String>, rollback_data: Value, compensation: Compensation) -> Self {
        Self {
            step_id: step_id.into(),
            rollback_data,
            compensation,
        }
    }

    /// Hook that undoes a tool call through `Tool::compensate`.
    pub fn for_tool(step_id: impl Into<String>, tool: Arc<dyn Tool>, rollback_data: Value) -> Self {
        let compensation: Compensation = Arc::new(move |data| -> BoxFuture<'static, Result<bool>> {
            let tool = tool.clone();
            Box::pin(async move { tool.compensate(data).await })
        });
        Self::new(step_id, rollback_data, compensation)
    }

    /// Hook for steps with nothing external to undo.
    pub fn noop(step_id: impl Into<String>, rollback_data: Value) -> Self {
        let compensation: Compensation =
            Arc::new(|_| -> BoxFuture<'static, Result<bool>> { Box::pin(async { Ok(true) }) });
        Self::new(step_id, rollback_data, compensation)
    }
}

impl std::fmt::Debug for RollbackHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackHook")
            .field("step_id", &self.step_id)
            .field("rollback_data", &self.rollback_data)
            .finish_non_exhaustive()
    }
}

/// Outcome of one compensation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackRecord {
    pub step_id: String,
    pub success: bool,
}

/// Per-execution rollback state.
///
/// Each hook runs at most once: it is removed from the map before its
/// compensation is invoked.
pub struct RollbackCoordinator {
    execution_id: String,
    hooks: HashMap<String, RollbackHook>,
    completion_order: Vec<String>,
    records: Vec<RollbackRecord>,
    event_bus: Option<Arc<EventBus>>,
}

impl RollbackCoordinator {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            hooks: HashMap::new(),
            completion_order: Vec::new(),
            records: Vec::new(),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Register (or replace) the hook for `hook.step_id`.
    pub fn arm(&mut self, hook: RollbackHook) {
        self.hooks.insert(hook.step_id.clone(), hook);
    }

    pub fn is_armed(&self, step_id: &str) -> bool {
        self.hooks.contains_key(step_id)
    }

    /// Set `key` in an armed hook's rollback data.
    pub fn record_data(&mut self, step_id: &str, key: &str, value: Value) {
        if let Some(Value::Object(map)) = self.hooks.get_mut(step_id).map(|h| &mut h.rollback_data) {
            map.insert(key.to_string(), value);
        }
    }

    pub fn rollback_data(&self, step_id: &str) -> Option<&Value> {
        self.hooks.get(step_id).map(|h| &h.rollback_data)
    }

    /// Note that an armed step completed. Completed steps are rolled back
    /// in reverse of this order.
    pub fn mark_completed(&mut self, step_id: &str) {
        if self.hooks.contains_key(step_id) {
            self.completion_order.push(step_id.to_string());
        }
    }

    /// Compensate one step. Returns whether a hook was invoked.
    pub async fn compensate_step(&mut self, step_id: &str) -> bool {
        let Some(hook) = self.hooks.remove(step_id) else {
            return false;
        };

        let success = match (hook.compensation)(hook.rollback_data.clone()).await {
            Ok(true) => {
                info!(execution_id = %self.execution_id, step_id, "Rolled back step");
                true
            }
            Ok(false) => {
                warn!(execution_id = %self.execution_id, step_id, "Compensation reported failure");
                false
            }
            Err(e) => {
                error!(execution_id = %self.execution_id, step_id, error = %e, "Compensation failed");
                false
            }
        };

        self.records.push(RollbackRecord {
            step_id: step_id.to_string(),
            success,
        });
        if let Some(bus) = &self.event_bus {
            bus.publish(ExecutionEvent::RollbackPerformed {
                execution_id: self.execution_id.clone(),
                step_id: step_id.to_string(),
                success,
            });
        }
        true
    }

    /// Compensate every completed step that still holds a hook, most
    /// recently completed first. Returns the number of hooks invoked.
    pub async fn rollback_completed(&mut self) -> usize {
        let order = std::mem::take(&mut self.completion_order);
        let mut invoked = 0;
        for step_id in order.iter().rev() {
            if self.compensate_step(step_id).await {
                invoked += 1;
            }
        }
        invoked
    }

    /// Compensations that reported success. Failed ones stay in `records`.
    pub fn performed(&self) -> usize {
        self.records.iter().filter(|r| r.success).count()
    }

    pub fn records(&self) -> &[RollbackRecord] {
        &self.records
    }
}
