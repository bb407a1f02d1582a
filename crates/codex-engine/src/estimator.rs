use serde::{Deserialize, Serialize};
use tracing::debug;

use codex_core::config::EstimatorConfig;
use codex_core::types::ExecutionContext;

use crate::graph::NodeKind;
use crate::plan::ExecutionStep;

/// Aggregate resource prediction for a plan.
///
/// `max_concurrent_steps` is advisory; the engine runs steps sequentially.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceEstimate {
    pub estimated_cpu_time_secs: f64,
    pub estimated_memory_mb: u64,
    pub estimated_disk_mb: u64,
    pub max_concurrent_steps: usize,
}

/// Table-driven cost model over node types.
#[derive(Debug, Clone, Default)]
pub struct ResourceEstimator {
    config: EstimatorConfig,
}

impl ResourceEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    pub fn estimate(&self, steps: &[ExecutionStep], ctx: &ExecutionContext) -> ResourceEstimate {
        let mut estimate = ResourceEstimate {
            max_concurrent_steps: self.config.max_concurrent_cap.min(steps.len()),
            ..Default::default()
        };

        for step in steps {
            match step.node_type {
                NodeKind::Llm => {
                    estimate.estimated_cpu_time_secs += self.config.llm_cpu_secs;
                    estimate.estimated_memory_mb += self.config.llm_memory_mb;
                }
                NodeKind::Tool => {
                    estimate.estimated_cpu_time_secs += self.config.tool_cpu_secs;
                    estimate.estimated_memory_mb += self.config.tool_memory_mb;
                    estimate.estimated_disk_mb += self.config.tool_disk_mb;
                }
                _ => {}
            }
        }

        debug!(
            tenant_id = %ctx.tenant_id,
            steps = steps.len(),
            cpu_secs = estimate.estimated_cpu_time_secs,
            memory_mb = estimate.estimated_memory_mb,
            "Estimated plan resources"
        );
        estimate
    }
}
