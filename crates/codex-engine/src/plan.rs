use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use codex_core::error::{CodexError, Result};
use codex_core::types::{new_id, ExecutionStatus};

use crate::estimator::ResourceEstimate;
use crate::graph::NodeKind;

/// Runtime instantiation of one node within an execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStep {
    pub step_id: String,
    pub node_id: String,
    pub node_type: NodeKind,
    pub input_data: Value,
    pub output_data: Option<Value>,
    pub status: ExecutionStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub rollback_data: Option<Value>,
}

impl ExecutionStep {
    pub fn new(node_id: impl Into<String>, node_type: NodeKind, input_data: Value) -> Self {
        Self {
            step_id: new_id(),
            node_id: node_id.into(),
            node_type,
            input_data,
            output_data: None,
            status: ExecutionStatus::Planning,
            start_time: None,
            end_time: None,
            error: None,
            rollback_data: None,
        }
    }

    /// Move to `next` if the state machine allows it.
    fn transition(&mut self, next: ExecutionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(
                step_id = %self.step_id,
                from = %self.status,
                to = %next,
                "Rejected step status transition"
            );
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.end_time = Some(Utc::now());
        }
        true
    }

    pub fn begin(&mut self) -> bool {
        let moved = self.transition(ExecutionStatus::Executing);
        if moved {
            self.start_time = Some(Utc::now());
        }
        moved
    }

    pub fn complete(&mut self, output: Value) -> bool {
        let moved = self.transition(ExecutionStatus::Completed);
        if moved {
            self.output_data = Some(output);
        }
        moved
    }

    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        let moved = self.transition(ExecutionStatus::Failed);
        if moved {
            self.error = Some(error.into());
        }
        moved
    }

    pub fn interrupt(&mut self) -> bool {
        let moved = self.transition(ExecutionStatus::Interrupted);
        if moved {
            self.error = Some("Interrupted".into());
        }
        moved
    }

    /// Completed without doing work (unimplemented or unknown node type).
    pub fn is_skipped(&self) -> bool {
        self.status == ExecutionStatus::Completed
            && self
                .output_data
                .as_ref()
                .and_then(|o| o.get("status"))
                .and_then(|s| s.as_str())
                == Some("skipped")
    }
}

/// Ordered step list compiled from a flow graph.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    pub plan_id: String,
    pub steps: Vec<ExecutionStep>,
    pub rollback_points: HashSet<String>,
    /// `dependencies[target_step] = [source_step, ...]`. Steps without
    /// incoming edges have no entry.
    pub dependencies: HashMap<String, Vec<String>>,
    pub resource_requirements: ResourceEstimate,
    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    pub fn step(&self, step_id: &str) -> Option<&ExecutionStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn is_rollback_point(&self, step_id: &str) -> bool {
        self.rollback_points.contains(step_id)
    }

    pub fn dependencies_of(&self, step_id: &str) -> &[String] {
        self.dependencies
            .get(step_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every step id referenced by `dependencies` and `rollback_points` must
    /// belong to a step of this plan.
    pub fn validate(&self) -> Result<()> {
        let ids: HashSet<&str> = self.steps.iter().map(|s| s.step_id.as_str()).collect();

        let dangling = self
            .dependencies
            .iter()
            .flat_map(|(target, sources)| std::iter::once(target).chain(sources))
            .chain(self.rollback_points.iter())
            .find(|id| !ids.contains(id.as_str()));

        match dangling {
            Some(id) => Err(CodexError::InvalidGraph(format!(
                "plan {} references unknown step '{}'",
                self.plan_id, id
            ))),
            None => Ok(()),
        }
    }

    fn node_id_of<'a>(&'a self, step_id: &'a str) -> &'a str {
        self.step(step_id).map(|s| s.node_id.as_str()).unwrap_or(step_id)
    }

    /// Dependencies expressed by node id, independent of generated step ids.
    pub fn dependency_nodes(&self) -> BTreeMap<String, Vec<String>> {
        self.dependencies
            .iter()
            .map(|(target, sources)| {
                let mut sources: Vec<String> = sources
                    .iter()
                    .map(|s| self.node_id_of(s).to_string())
                    .collect();
                sources.sort();
                (self.node_id_of(target).to_string(), sources)
            })
            .collect()
    }

    /// Rollback points expressed by node id.
    pub fn rollback_nodes(&self) -> BTreeSet<String> {
        self.rollback_points
            .iter()
            .map(|s| self.node_id_of(s).to_string())
            .collect()
    }
}
