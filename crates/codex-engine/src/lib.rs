pub mod engine;
pub mod estimator;
pub mod executor;
pub mod graph;
pub mod live;
pub mod plan;
pub mod planner;
pub mod recorder;
pub mod rollback;

pub use engine::{Engine, EngineBuilder, ExecutionHandle, ExecutionResult};
pub use estimator::{ResourceEstimate, ResourceEstimator};
pub use executor::{StepExecutor, StepScope};
pub use graph::{Edge, FlowDefinition, FlowGraph, Node, NodeDefinition, NodeKind};
pub use live::{LiveExecutions, LiveGuard};
pub use plan::{ExecutionPlan, ExecutionStep};
pub use planner::Planner;
pub use recorder::{ExecutionRecorder, MemoryRecorder};
pub use rollback::{Compensation, RollbackCoordinator, RollbackHook, RollbackRecord};
