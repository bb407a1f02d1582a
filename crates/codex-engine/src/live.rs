use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Engine-scoped table of running executions and their cancellation tokens.
///
/// The lock is never held across an await point.
#[derive(Clone, Default)]
pub struct LiveExecutions {
    inner: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl LiveExecutions {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `execution_id`. The entry is removed when the guard drops.
    pub fn register(&self, execution_id: &str) -> LiveGuard {
        let token = CancellationToken::new();
        self.table().insert(execution_id.to_string(), token.clone());
        debug!(execution_id, "Registered live execution");
        LiveGuard {
            registry: self.clone(),
            execution_id: execution_id.to_string(),
            token,
        }
    }

    /// Cancel a live execution. Returns false if it is not running.
    pub fn cancel(&self, execution_id: &str) -> bool {
        let token = self.table().get(execution_id).cloned();
        match token {
            Some(token) => {
                token.cancel();
                info!(execution_id, "Execution interrupt requested");
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, execution_id: &str) -> bool {
        self.table().contains_key(execution_id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.table().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}

/// Registration of one live execution; deregisters on drop.
pub struct LiveGuard {
    registry: LiveExecutions,
    execution_id: String,
    token: CancellationToken,
}

impl LiveGuard {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.registry.table().remove(&self.execution_id);
        debug!(execution_id = %self.execution_id, "Deregistered live execution");
    }
}
