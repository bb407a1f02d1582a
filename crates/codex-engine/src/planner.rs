use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tracing::info;

use codex_core::config::{EngineConfig, EstimatorConfig, PlannerConfig};
use codex_core::error::Result;
use codex_core::types::{new_id, ExecutionContext};

use crate::estimator::ResourceEstimator;
use crate::graph::{FlowGraph, Node};
use crate::plan::{ExecutionPlan, ExecutionStep};

/// Compiles a flow graph into an ordered execution plan.
#[derive(Debug, Clone, Default)]
pub struct Planner {
    config: PlannerConfig,
    estimator: ResourceEstimator,
}

impl Planner {
    pub fn new(config: PlannerConfig, estimator: EstimatorConfig) -> Self {
        Self {
            config,
            estimator: ResourceEstimator::new(estimator),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.planner.clone(), config.estimator.clone())
    }

    /// A node becomes a rollback point when its type is checkpointable and
    /// its `operation` contains a critical substring. Over-matching is
    /// acceptable; missing a side-effecting operation is not.
    pub fn is_rollback_point(&self, node: &Node) -> bool {
        let type_eligible = self
            .config
            .checkpoint_node_types
            .iter()
            .any(|t| t == node.kind.as_str());
        if !type_eligible {
            return false;
        }

        node.operation().is_some_and(|op| {
            self.config
                .critical_operations
                .iter()
                .any(|critical| op.contains(critical.as_str()))
        })
    }

    pub fn create_plan(&self, graph: &FlowGraph, ctx: &ExecutionContext) -> Result<ExecutionPlan> {
        let mut steps = Vec::with_capacity(graph.len());
        let mut rollback_points = HashSet::new();
        let mut step_ids: HashMap<&str, String> = HashMap::with_capacity(graph.len());

        for node in graph.nodes() {
            let step = ExecutionStep::new(node.id.clone(), node.kind.clone(), node.data.clone());
            if self.is_rollback_point(node) {
                rollback_points.insert(step.step_id.clone());
            }
            step_ids.insert(node.id.as_str(), step.step_id.clone());
            steps.push(step);
        }

        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        for edge in graph.edges() {
            if let (Some(source), Some(target)) = (
                step_ids.get(edge.source.as_str()),
                step_ids.get(edge.target.as_str()),
            ) {
                dependencies
                    .entry(target.clone())
                    .or_default()
                    .push(source.clone());
            }
        }

        let resource_requirements = self.estimator.estimate(&steps, ctx);

        let plan = ExecutionPlan {
            plan_id: new_id(),
            steps,
            rollback_points,
            dependencies,
            resource_requirements,
            created_at: Utc::now(),
        };
        plan.validate()?;

        info!(
            plan_id = %plan.plan_id,
            user_id = %ctx.user_id,
            steps = plan.steps.len(),
            rollback_points = plan.rollback_points.len(),
            "Created execution plan"
        );
        Ok(plan)
    }
}
