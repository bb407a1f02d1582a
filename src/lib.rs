//! CodexOS agent flow execution core.
//!
//! Compiles declarative node/edge flows into execution plans, runs their
//! steps with per-tool security checks and scoped sandboxes, and undoes
//! checkpointed side effects with compensating rollback.

pub use codex_core::{config, error, event, security, traits, types};
pub use codex_core::{CodexError, EngineConfig, EventBus, Result};
pub use codex_engine::{
    Engine, EngineBuilder, ExecutionHandle, ExecutionPlan, ExecutionRecorder, ExecutionResult,
    ExecutionStep, FlowDefinition, FlowGraph, MemoryRecorder, Node, NodeKind, Planner,
    ResourceEstimate, RollbackHook,
};
pub use codex_tools::{SubAgentClient, TempDirSandbox, ToolRegistry};
