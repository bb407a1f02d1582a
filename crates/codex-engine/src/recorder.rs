use std::sync::Mutex;

use futures::future::BoxFuture;

use codex_core::error::Result;

use crate::engine::ExecutionResult;
use crate::plan::ExecutionStep;

/// Persistence hook for finished executions, owned by the surrounding
/// application. Called once per execution, whatever its outcome.
pub trait ExecutionRecorder: Send + Sync + 'static {
    fn record<'a>(
        &'a self,
        result: &'a ExecutionResult,
        steps: &'a [ExecutionStep],
    ) -> BoxFuture<'a, Result<()>>;
}

/// Keeps recorded executions in memory.
#[derive(Default)]
pub struct MemoryRecorder {
    records: Mutex<Vec<(ExecutionResult, Vec<ExecutionStep>)>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<ExecutionResult> {
        self.records
            .lock()
            .map(|r| r.iter().map(|(result, _)| result.clone()).collect())
            .unwrap_or_default()
    }

    pub fn steps_for(&self, execution_id: &str) -> Option<Vec<ExecutionStep>> {
        let records = self.records.lock().ok()?;
        records
            .iter()
            .find(|(result, _)| result.execution_id == execution_id)
            .map(|(_, steps)| steps.clone())
    }
}

impl ExecutionRecorder for MemoryRecorder {
    fn record<'a>(
        &'a self,
        result: &'a ExecutionResult,
        steps: &'a [ExecutionStep],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if let Ok(mut records) = self.records.lock() {
                records.push((result.clone(), steps.to_vec()));
            }
            Ok(())
        })
    }
}
