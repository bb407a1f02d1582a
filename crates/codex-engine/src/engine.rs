use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use codex_core::config::EngineConfig;
use codex_core::error::{CodexError, Result};
use codex_core::event::EventBus;
use codex_core::traits::{LlmClient, Sandbox, ToolAccessChecker};
use codex_core::types::{new_id, ExecutionContext, ExecutionEvent, ExecutionStatus};
use codex_tools::{SubAgentClient, TempDirSandbox, ToolRegistry};

use crate::executor::{StepExecutor, StepScope};
use crate::graph::FlowGraph;
use crate::live::LiveExecutions;
use crate::plan::ExecutionPlan;
use crate::planner::Planner;
use crate::recorder::ExecutionRecorder;
use crate::rollback::RollbackCoordinator;

/// Terminal snapshot of one execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub plan_id: String,
    pub status: ExecutionStatus,
    pub steps_completed: usize,
    pub total_steps: usize,
    /// Step outputs keyed by node id.
    pub output: Map<String, Value>,
    pub execution_time_ms: u64,
    pub rollbacks_performed: usize,
    pub errors: Vec<String>,
}

/// A flow running on its own task.
///
/// The task can only be stopped through its cancellation token, so an
/// interrupted execution always rolls back. Dropping the handle detaches
/// the task without stopping it.
pub struct ExecutionHandle {
    pub execution_id: String,
    join: JoinHandle<Result<ExecutionResult>>,
    cancel: CancellationToken,
}

impl ExecutionHandle {
    /// Request cancellation. Same effect as [`Engine::interrupt_flow`].
    pub fn interrupt(&self) {
        info!(execution_id = %self.execution_id, "Execution interrupt requested");
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the execution to finish.
    pub async fn wait(self) -> Result<ExecutionResult> {
        self.join
            .await
            .map_err(|e| CodexError::TaskJoin(e.to_string()))?
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    tools: ToolRegistry,
    checker: Option<Arc<dyn ToolAccessChecker>>,
    sandbox: Option<Arc<dyn Sandbox>>,
    llm: Option<Arc<dyn LlmClient>>,
    event_bus: Option<Arc<EventBus>>,
    recorder: Option<Arc<dyn ExecutionRecorder>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            tools: ToolRegistry::new(),
            checker: None,
            sandbox: None,
            llm: None,
            event_bus: None,
            recorder: None,
        }
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Defaults to the `[security]` permission table.
    pub fn access_checker(mut self, checker: Arc<dyn ToolAccessChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Defaults to temporary directories under `executor.sandbox_root`.
    pub fn sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn recorder(mut self, recorder: Arc<dyn ExecutionRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let checker: Arc<dyn ToolAccessChecker> = match self.checker {
            Some(checker) => checker,
            None => Arc::new(self.config.security.clone()),
        };
        let sandbox: Arc<dyn Sandbox> = match self.sandbox {
            Some(sandbox) => sandbox,
            None => Arc::new(TempDirSandbox::new(self.config.sandbox_root())),
        };
        let sub_agent = SubAgentClient::new(
            self.config.executor.default_api_base.clone(),
            self.config.executor.sub_agent_timeout_secs,
        )?;

        Ok(Engine {
            planner: Planner::from_config(&self.config),
            executor: StepExecutor::new(Arc::new(self.tools), checker, sandbox, self.llm, sub_agent),
            live: LiveExecutions::new(),
            event_bus: self.event_bus.unwrap_or_default(),
            recorder: self.recorder,
            config: self.config,
        })
    }
}

/// Execution coordinator: plans a flow, runs its steps in order, and
/// rolls back checkpoints on fatal failure or cancellation.
pub struct Engine {
    config: EngineConfig,
    planner: Planner,
    executor: StepExecutor,
    live: LiveExecutions,
    event_bus: Arc<EventBus>,
    recorder: Option<Arc<dyn ExecutionRecorder>>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Ids of executions currently running on this engine.
    pub fn active_executions(&self) -> Vec<String> {
        self.live.ids()
    }

    /// Request cancellation of a live execution. Returns false if the id is
    /// not running. The running step finishes first unless
    /// `executor.interrupt_in_flight` is set.
    pub fn interrupt_flow(&self, execution_id: &str) -> bool {
        self.live.cancel(execution_id)
    }

    /// Plan and run a flow on the current task.
    ///
    /// Dropping the returned future abandons the execution without rolling
    /// back. Use [`Engine::spawn_flow`] when it may need to stop early.
    pub async fn execute_flow(
        &self,
        graph: &FlowGraph,
        ctx: ExecutionContext,
    ) -> Result<ExecutionResult> {
        let plan = self.planner.create_plan(graph, &ctx)?;
        self.execute_plan(plan, ctx).await
    }

    /// Run an already compiled plan on the current task.
    pub async fn execute_plan(
        &self,
        plan: ExecutionPlan,
        ctx: ExecutionContext,
    ) -> Result<ExecutionResult> {
        let execution_id = new_id();
        let guard = self.live.register(&execution_id);
        let result = self
            .run_steps(plan, &ctx, &execution_id, guard.token().clone())
            .await;
        drop(guard);
        result
    }

    /// Plan a flow and run it on a new task. The execution is registered
    /// before this returns, so it can be interrupted right away.
    pub fn spawn_flow(
        self: &Arc<Self>,
        graph: &FlowGraph,
        ctx: ExecutionContext,
    ) -> Result<ExecutionHandle> {
        let plan = self.planner.create_plan(graph, &ctx)?;
        let execution_id = new_id();
        let guard = self.live.register(&execution_id);

        let cancel = guard.token().clone();

        let engine = Arc::clone(self);
        let id = execution_id.clone();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            let result = engine.run_steps(plan, &ctx, &id, token).await;
            drop(guard);
            result
        });

        Ok(ExecutionHandle {
            execution_id,
            join,
            cancel,
        })
    }

    async fn run_steps(
        &self,
        mut plan: ExecutionPlan,
        ctx: &ExecutionContext,
        execution_id: &str,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();
        let total_steps = plan.steps.len();
        let mut rollback =
            RollbackCoordinator::new(execution_id).with_event_bus(self.event_bus.clone());
        let mut completed: HashSet<String> = HashSet::new();
        let mut output = Map::new();
        let mut errors = Vec::new();
        let mut cancelled = false;

        info!(
            execution_id,
            plan_id = %plan.plan_id,
            user_id = %ctx.user_id,
            tenant_id = %ctx.tenant_id,
            total_steps,
            "Execution started"
        );
        self.event_bus.publish(ExecutionEvent::ExecutionStarted {
            execution_id: execution_id.to_string(),
            plan_id: plan.plan_id.clone(),
            total_steps,
        });

        for index in 0..total_steps {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let step_id = plan.steps[index].step_id.clone();
            let node_id = plan.steps[index].node_id.clone();
            let checkpoint = plan.is_rollback_point(&step_id);
            let missing: Vec<&String> = plan
                .dependencies_of(&step_id)
                .iter()
                .filter(|dep| !completed.contains(*dep))
                .collect();

            if !missing.is_empty() {
                let reason = format!("{} unmet dependencies", missing.len());
                debug!(execution_id, step_id = %step_id, node_id = %node_id, %reason, "Skipping step");
                self.event_bus.publish(ExecutionEvent::StepSkipped {
                    execution_id: execution_id.to_string(),
                    step_id,
                    node_id,
                    reason,
                });
                continue;
            }

            plan.steps[index].begin();
            self.event_bus.publish(ExecutionEvent::StepStarted {
                execution_id: execution_id.to_string(),
                step_id: step_id.clone(),
                node_id: node_id.clone(),
                node_type: plan.steps[index].node_type.to_string(),
            });

            let outcome = {
                let scope = StepScope {
                    execution_id,
                    ctx,
                    checkpoint,
                };
                let dispatch = self.executor.execute(&plan.steps[index], scope, &mut rollback);
                if self.config.executor.interrupt_in_flight {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        result = dispatch => Some(result),
                    }
                } else {
                    Some(dispatch.await)
                }
            };

            let step = &mut plan.steps[index];
            if let Some(data) = rollback.rollback_data(&step_id) {
                step.rollback_data = Some(data.clone());
            }
            match outcome {
                None => {
                    step.interrupt();
                    warn!(execution_id, step_id = %step_id, "Step interrupted in flight");
                    rollback.compensate_step(&step_id).await;
                    cancelled = true;
                    break;
                }
                Some(Ok(step_output)) => {
                    step.complete(step_output.clone());
                    rollback.mark_completed(&step_id);
                    completed.insert(step_id.clone());
                    output.insert(node_id.clone(), step_output);

                    let progress = completed.len() as f64 / total_steps as f64;
                    info!(execution_id, step_id = %step_id, node_id = %node_id, progress, "Step completed");
                    self.event_bus.publish(ExecutionEvent::StepCompleted {
                        execution_id: execution_id.to_string(),
                        step_id,
                        node_id,
                        progress,
                    });
                }
                Some(Err(e)) => {
                    let message = e.to_string();
                    step.fail(message.clone());
                    let critical = step.node_type.is_critical();
                    errors.push(format!("Step {} ({}): {}", step_id, node_id, message));
                    error!(execution_id, step_id = %step_id, node_id = %node_id, error = %message, critical, "Step failed");
                    self.event_bus.publish(ExecutionEvent::StepFailed {
                        execution_id: execution_id.to_string(),
                        step_id: step_id.clone(),
                        node_id,
                        error: message,
                    });

                    if checkpoint {
                        rollback.compensate_step(&step_id).await;
                    }

                    if cancel.is_cancelled() {
                        cancelled = true;
                        break;
                    }

                    if critical {
                        warn!(execution_id, step_id = %step_id, "Critical step failed, aborting remaining steps");
                        if self.config.executor.rollback_completed_on_abort {
                            rollback.rollback_completed().await;
                        }
                        break;
                    }
                }
            }
        }

        // An interrupt that landed during the final step still counts.
        cancelled |= cancel.is_cancelled();
        let steps_completed = completed.len();

        if cancelled {
            let rolled_back = rollback.rollback_completed().await;
            let rollbacks_performed = rollback.performed();
            info!(execution_id, rolled_back, rollbacks_performed, "Execution interrupted");
            self.event_bus.publish(ExecutionEvent::ExecutionCancelled {
                execution_id: execution_id.to_string(),
                rollbacks_performed,
            });

            let result = ExecutionResult {
                execution_id: execution_id.to_string(),
                plan_id: plan.plan_id.clone(),
                status: ExecutionStatus::Interrupted,
                steps_completed,
                total_steps,
                output,
                execution_time_ms: started.elapsed().as_millis() as u64,
                rollbacks_performed,
                errors,
            };
            self.record(&result, &plan).await;
            return Err(CodexError::Cancelled {
                execution_id: execution_id.to_string(),
                rollbacks_performed,
            });
        }

        let status = if steps_completed == total_steps {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };

        let result = ExecutionResult {
            execution_id: execution_id.to_string(),
            plan_id: plan.plan_id.clone(),
            status,
            steps_completed,
            total_steps,
            output,
            execution_time_ms: started.elapsed().as_millis() as u64,
            rollbacks_performed: rollback.performed(),
            errors,
        };

        info!(
            execution_id,
            status = %result.status,
            steps_completed,
            total_steps,
            rollbacks = result.rollbacks_performed,
            elapsed_ms = result.execution_time_ms,
            "Execution finished"
        );
        self.event_bus.publish(ExecutionEvent::ExecutionCompleted {
            execution_id: execution_id.to_string(),
            status,
            steps_completed,
            total_steps,
            timestamp: Utc::now(),
        });

        self.record(&result, &plan).await;
        Ok(result)
    }

    async fn record(&self, result: &ExecutionResult, plan: &ExecutionPlan) {
        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.record(result, &plan.steps).await {
                error!(execution_id = %result.execution_id, error = %e, "Failed to record execution");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use codex_test_utils::{AllowAll, FailingTool, MockLlm, RecordingTool, SlowTool, ToolLog};
    use serde_json::json;

    use crate::recorder::MemoryRecorder;

    struct Fixture {
        _root: tempfile::TempDir,
        config: EngineConfig,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.executor.sandbox_root = root.path().join("sandbox").display().to_string();
        Fixture {
            _root: root,
            config,
        }
    }

    fn engine_with(config: EngineConfig, tools: ToolRegistry) -> Engine {
        Engine::builder(config)
            .tools(tools)
            .access_checker(Arc::new(AllowAll))
            .llm(Arc::new(MockLlm::new("ok")))
            .build()
            .unwrap()
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("user-1", "tenant-1")
    }

    fn db_flow() -> FlowGraph {
        FlowGraph::from_value(json!({
            "nodes": [
                { "id": "start", "type": "entry" },
                { "id": "update", "type": "tool", "data": { "tool": "db", "action": "write", "operation": "database_update" } },
                { "id": "end", "type": "exit" }
            ],
            "edges": [
                { "source": "start", "target": "update" },
                { "source": "update", "target": "end" }
            ]
        }))
        .unwrap()
    }

    fn chain_flow(tools: &[(&str, &str)]) -> FlowGraph {
        let nodes: Vec<Value> = tools
            .iter()
            .map(|(id, tool)| {
                json!({
                    "id": id,
                    "type": "tool",
                    "data": { "tool": tool, "action": id, "operation": "file_write" }
                })
            })
            .collect();
        let edges: Vec<Value> = tools
            .windows(2)
            .map(|w| json!({ "source": w[0].0, "target": w[1].0 }))
            .collect();
        FlowGraph::from_value(json!({ "nodes": nodes, "edges": edges })).unwrap()
    }

    #[tokio::test]
    async fn successful_flow_completes_without_rollback() {
        let f = fixture();
        let mut tools = ToolRegistry::new();
        tools.register(RecordingTool::new("db"));
        let engine = engine_with(f.config.clone(), tools);

        let result = engine.execute_flow(&db_flow(), ctx()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.steps_completed, 3);
        assert_eq!(result.total_steps, 3);
        assert_eq!(result.rollbacks_performed, 0);
        assert!(result.errors.is_empty());
        assert_eq!(result.output["update"]["result"]["action"], "write");
        assert_eq!(result.output["start"]["status"], "skipped");
        assert!(engine.active_executions().is_empty());
    }

    #[tokio::test]
    async fn failing_critical_tool_rolls_back_once() {
        let f = fixture();
        let failing = FailingTool::new("db");
        let log = failing.log();
        let mut tools = ToolRegistry::new();
        tools.register(failing);
        let engine = engine_with(f.config.clone(), tools);

        let result = engine.execute_flow(&db_flow(), ctx()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.rollbacks_performed, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("(update)"));
        assert_eq!(result.steps_completed, 1);
        assert_eq!(log.compensated(), vec!["write"]);
        assert!(!result.output.contains_key("end"));
    }

    #[tokio::test]
    async fn abort_rolls_back_completed_steps_in_reverse() {
        let f = fixture();
        let recording = RecordingTool::new("fs");
        let log: ToolLog = recording.log();
        let failing = FailingTool::with_log("broken", log.clone());
        let mut tools = ToolRegistry::new();
        tools.register(recording);
        tools.register(failing);
        let engine = engine_with(f.config.clone(), tools);

        let flow = chain_flow(&[("s1", "fs"), ("s2", "fs"), ("s3", "fs"), ("s4", "broken")]);
        let result = engine.execute_flow(&flow, ctx()).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(log.executed(), vec!["s1", "s2", "s3"]);
        assert_eq!(log.compensated(), vec!["s4", "s3", "s2", "s1"]);
        assert_eq!(result.rollbacks_performed, 4);
    }

    #[tokio::test]
    async fn abort_without_completed_rollback() {
        let mut f = fixture();
        f.config.executor.rollback_completed_on_abort = false;
        let recording = RecordingTool::new("fs");
        let log = recording.log();
        let mut tools = ToolRegistry::new();
        tools.register(recording);
        tools.register(FailingTool::with_log("broken", log.clone()));
        let engine = engine_with(f.config.clone(), tools);

        let flow = chain_flow(&[("s1", "fs"), ("s2", "broken")]);
        let result = engine.execute_flow(&flow, ctx()).await.unwrap();
        assert_eq!(log.compensated(), vec!["s2"]);
        assert_eq!(result.rollbacks_performed, 1);
    }

    #[tokio::test]
    async fn unknown_node_type_does_not_abort() {
        let f = fixture();
        let engine = engine_with(f.config.clone(), ToolRegistry::new());
        let flow = FlowGraph::from_value(json!({
            "nodes": [
                { "id": "start", "type": "entry" },
                { "id": "widget", "type": "custom_widget" },
                { "id": "gate", "type": "condition", "data": { "condition": "true" } }
            ],
            "edges": [
                { "source": "start", "target": "widget" },
                { "source": "widget", "target": "gate" }
            ]
        }))
        .unwrap();

        let result = engine.execute_flow(&flow, ctx()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.output["widget"]["status"], "skipped");
        assert_eq!(result.output["gate"]["condition_result"], true);
    }

    #[tokio::test]
    async fn step_waits_for_dependencies_by_id() {
        let f = fixture();
        let mut tools = ToolRegistry::new();
        tools.register(RecordingTool::new("db"));
        let engine = engine_with(f.config.clone(), tools);

        // `report` is ordered before its dependency `check`, so it is skipped.
        let flow = FlowGraph::from_value(json!({
            "nodes": [
                { "id": "start", "type": "entry" },
                { "id": "load", "type": "tool", "data": { "tool": "db", "action": "read" } },
                { "id": "report", "type": "exit" },
                { "id": "check", "type": "condition" }
            ],
            "edges": [
                { "source": "check", "target": "report" },
                { "source": "start", "target": "load" }
            ]
        }))
        .unwrap();

        let result = engine.execute_flow(&flow, ctx()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.steps_completed, 3);
        assert_eq!(result.total_steps, 4);
        assert!(result.errors.is_empty());
        assert!(!result.output.contains_key("report"));
        assert!(result.output.contains_key("check"));
    }

    #[tokio::test]
    async fn llm_failure_is_critical() {
        let f = fixture();
        let engine = Engine::builder(f.config.clone())
            .access_checker(Arc::new(AllowAll))
            .build()
            .unwrap();
        let flow = FlowGraph::from_value(json!({
            "nodes": [
                { "id": "think", "type": "llm", "data": { "prompt": "plan" } },
                { "id": "after", "type": "condition" }
            ]
        }))
        .unwrap();

        let result = engine.execute_flow(&flow, ctx()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.steps_completed, 0);
        assert_eq!(result.errors.len(), 1);
        assert!(!result.output.contains_key("after"));
    }

    #[tokio::test]
    async fn events_and_recorder() {
        let f = fixture();
        let mut tools = ToolRegistry::new();
        tools.register(RecordingTool::new("db"));
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let recorder = Arc::new(MemoryRecorder::new());
        let engine = Engine::builder(f.config.clone())
            .tools(tools)
            .access_checker(Arc::new(AllowAll))
            .event_bus(bus)
            .recorder(recorder.clone())
            .build()
            .unwrap();

        let result = engine.execute_flow(&db_flow(), ctx()).await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.execution_id(), result.execution_id);
            kinds.push(match event {
                ExecutionEvent::ExecutionStarted { .. } => "started",
                ExecutionEvent::StepStarted { .. } => "step_started",
                ExecutionEvent::StepCompleted { .. } => "step_completed",
                ExecutionEvent::ExecutionCompleted { .. } => "completed",
                _ => "other",
            });
        }
        assert_eq!(kinds.first(), Some(&"started"));
        assert_eq!(kinds.last(), Some(&"completed"));
        assert_eq!(kinds.iter().filter(|k| **k == "step_completed").count(), 3);

        let recorded = recorder.results();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].execution_id, result.execution_id);
        let steps = recorder.steps_for(&result.execution_id).unwrap();
        assert!(steps.iter().all(|s| s.status == ExecutionStatus::Completed));
    }

    #[tokio::test]
    async fn interrupt_between_steps_rolls_back_in_reverse() {
        let f = fixture();
        let recording = RecordingTool::new("fs");
        let log = recording.log();
        let slow = SlowTool::new("slow", Duration::from_millis(300)).with_log(log.clone());
        let mut tools = ToolRegistry::new();
        tools.register(recording);
        tools.register(slow);
        let recorder = Arc::new(MemoryRecorder::new());
        let engine = Arc::new(
            Engine::builder(f.config.clone())
                .tools(tools)
                .access_checker(Arc::new(AllowAll))
                .recorder(recorder.clone())
                .build()
                .unwrap(),
        );

        let flow = chain_flow(&[("s1", "fs"), ("s2", "slow"), ("s3", "fs")]);
        let handle = engine.spawn_flow(&flow, ctx()).unwrap();
        let execution_id = handle.execution_id.clone();
        assert!(engine.active_executions().contains(&execution_id));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(engine.interrupt_flow(&execution_id));

        let err = handle.wait().await.unwrap_err();
        match err {
            CodexError::Cancelled {
                execution_id: id,
                rollbacks_performed,
            } => {
                assert_eq!(id, execution_id);
                assert_eq!(rollbacks_performed, 2);
            }
            other => panic!("unexpected error: {other}"),
        }

        // The in-flight step finished; s3 never started.
        assert_eq!(log.executed(), vec!["s1", "s2"]);
        assert_eq!(log.compensated(), vec!["s2", "s1"]);
        assert!(engine.active_executions().is_empty());
        assert!(!engine.interrupt_flow(&execution_id));

        let recorded = recorder.results();
        assert_eq!(recorded[0].status, ExecutionStatus::Interrupted);
    }

    #[tokio::test]
    async fn interrupt_in_flight_preempts_step() {
        let mut f = fixture();
        f.config.executor.interrupt_in_flight = true;
        let recording = RecordingTool::new("fs");
        let log = recording.log();
        let slow = SlowTool::new("slow", Duration::from_secs(30)).with_log(log.clone());
        let mut tools = ToolRegistry::new();
        tools.register(recording);
        tools.register(slow);
        let engine = Arc::new(engine_with(f.config.clone(), tools));

        let flow = chain_flow(&[("s1", "fs"), ("s2", "slow"), ("s3", "fs")]);
        let handle = engine.spawn_flow(&flow, ctx()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(engine.interrupt_flow(&handle.execution_id));

        let err = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap()
            .unwrap_err();
        assert!(err.is_cancelled());
        // s2 was armed before it started, so it is compensated with s1.
        assert_eq!(log.executed(), vec!["s1"]);
        assert_eq!(log.compensated(), vec!["s2", "s1"]);
    }

    #[tokio::test]
    async fn interrupt_during_final_step_is_not_lost() {
        let f = fixture();
        let slow = SlowTool::new("slow", Duration::from_millis(300));
        let log = slow.log();
        let mut tools = ToolRegistry::new();
        tools.register(slow);
        let engine = Arc::new(engine_with(f.config.clone(), tools));

        let flow = chain_flow(&[("s1", "slow")]);
        let handle = engine.spawn_flow(&flow, ctx()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(engine.interrupt_flow(&handle.execution_id));

        match handle.wait().await.unwrap_err() {
            CodexError::Cancelled {
                rollbacks_performed, ..
            } => assert_eq!(rollbacks_performed, 1),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(log.executed(), vec!["s1"]);
        assert_eq!(log.compensated(), vec!["s1"]);
    }

    #[tokio::test]
    async fn handle_interrupt_rolls_back() {
        let f = fixture();
        let recording = RecordingTool::new("fs");
        let log = recording.log();
        let mut tools = ToolRegistry::new();
        tools.register(recording);
        tools.register(SlowTool::new("slow", Duration::from_millis(300)).with_log(log.clone()));
        let engine = Arc::new(engine_with(f.config.clone(), tools));

        let flow = chain_flow(&[("s1", "fs"), ("s2", "slow"), ("s3", "fs")]);
        let handle = engine.spawn_flow(&flow, ctx()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());
        handle.interrupt();

        let err = handle.wait().await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(log.executed(), vec!["s1", "s2"]);
        assert_eq!(log.compensated(), vec!["s2", "s1"]);
        assert!(engine.active_executions().is_empty());
    }

    #[tokio::test]
    async fn refused_compensation_is_not_counted() {
        let f = fixture();
        let failing = FailingTool::new("db").irreversible();
        let log = failing.log();
        let mut tools = ToolRegistry::new();
        tools.register(failing);
        let engine = engine_with(f.config.clone(), tools);

        let result = engine.execute_flow(&db_flow(), ctx()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(log.compensated(), vec!["write"]);
        assert_eq!(result.rollbacks_performed, 0);
    }

    #[tokio::test]
    async fn recorded_steps_carry_rollback_data() {
        let f = fixture();
        let mut tools = ToolRegistry::new();
        tools.register(RecordingTool::new("db"));
        let recorder = Arc::new(MemoryRecorder::new());
        let engine = Engine::builder(f.config.clone())
            .tools(tools)
            .access_checker(Arc::new(AllowAll))
            .recorder(recorder.clone())
            .build()
            .unwrap();

        let plan = engine.planner().create_plan(&db_flow(), &ctx()).unwrap();
        let result = engine.execute_plan(plan, ctx()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);

        let steps = recorder.steps_for(&result.execution_id).unwrap();
        let update = steps.iter().find(|s| s.node_id == "update").unwrap();
        assert_eq!(update.status, ExecutionStatus::Completed);
        let data = update.rollback_data.as_ref().unwrap();
        assert_eq!(data["tool"], "db");
        assert_eq!(data["result"]["action"], "write");

        let start = steps.iter().find(|s| s.node_id == "start").unwrap();
        assert!(start.rollback_data.is_none());
    }

    #[tokio::test]
    async fn engines_do_not_share_live_executions() {
        let f = fixture();
        let mut tools = ToolRegistry::new();
        tools.register(SlowTool::new("slow", Duration::from_millis(200)));
        let a = Arc::new(engine_with(f.config.clone(), tools));
        let b = engine_with(f.config.clone(), ToolRegistry::new());

        let flow = chain_flow(&[("s1", "slow")]);
        let handle = a.spawn_flow(&flow, ctx()).unwrap();
        assert!(b.active_executions().is_empty());
        assert!(!b.interrupt_flow(&handle.execution_id));

        let result = handle.wait().await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
    }
}
