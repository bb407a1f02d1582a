use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CodexError, Result};
use crate::security::PermissionPolicy;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub security: PermissionPolicy,
}

/// Rollback-point selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Substrings of a node's `operation` that mark it as side-effecting.
    #[serde(default = "default_critical_operations")]
    pub critical_operations: Vec<String>,
    /// Node types eligible to become rollback points.
    #[serde(default = "default_checkpoint_node_types")]
    pub checkpoint_node_types: Vec<String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            critical_operations: default_critical_operations(),
            checkpoint_node_types: default_checkpoint_node_types(),
        }
    }
}

fn default_critical_operations() -> Vec<String> {
    ["file_write", "database_update", "api_call", "payment"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_checkpoint_node_types() -> Vec<String> {
    ["tool", "llm", "parallel"].into_iter().map(String::from).collect()
}

/// Per-node-type cost table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorConfig {
    #[serde(default = "default_llm_cpu_secs")]
    pub llm_cpu_secs: f64,
    #[serde(default = "default_llm_memory_mb")]
    pub llm_memory_mb: u64,
    #[serde(default = "default_tool_cpu_secs")]
    pub tool_cpu_secs: f64,
    #[serde(default = "default_tool_memory_mb")]
    pub tool_memory_mb: u64,
    #[serde(default = "default_tool_disk_mb")]
    pub tool_disk_mb: u64,
    #[serde(default = "default_max_concurrent_cap")]
    pub max_concurrent_cap: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            llm_cpu_secs: default_llm_cpu_secs(),
            llm_memory_mb: default_llm_memory_mb(),
            tool_cpu_secs: default_tool_cpu_secs(),
            tool_memory_mb: default_tool_memory_mb(),
            tool_disk_mb: default_tool_disk_mb(),
            max_concurrent_cap: default_max_concurrent_cap(),
        }
    }
}

fn default_llm_cpu_secs() -> f64 { 30.0 }
fn default_llm_memory_mb() -> u64 { 512 }
fn default_tool_cpu_secs() -> f64 { 10.0 }
fn default_tool_memory_mb() -> u64 { 256 }
fn default_tool_disk_mb() -> u64 { 50 }
fn default_max_concurrent_cap() -> usize { 5 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Parent directory for per-step sandboxes.
    #[serde(default = "default_sandbox_root")]
    pub sandbox_root: String,
    /// Run-agent API used when the context carries no `api_base`.
    #[serde(default = "default_api_base")]
    pub default_api_base: String,
    #[serde(default = "default_sub_agent_timeout")]
    pub sub_agent_timeout_secs: u64,
    /// Roll back completed checkpoints when a critical step aborts the plan.
    #[serde(default = "default_rollback_completed_on_abort")]
    pub rollback_completed_on_abort: bool,
    /// Race in-flight steps against cancellation instead of waiting for
    /// the step boundary.
    #[serde(default)]
    pub interrupt_in_flight: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            sandbox_root: default_sandbox_root(),
            default_api_base: default_api_base(),
            sub_agent_timeout_secs: default_sub_agent_timeout(),
            rollback_completed_on_abort: default_rollback_completed_on_abort(),
            interrupt_in_flight: false,
        }
    }
}

fn default_sandbox_root() -> String { "/tmp/codexos-sandbox".to_string() }
fn default_api_base() -> String { "http://localhost:8000".to_string() }
fn default_sub_agent_timeout() -> u64 { 300 }
fn default_rollback_completed_on_abort() -> bool { true }

impl EngineConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| CodexError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| CodexError::Config(e.to_string()))
    }

    pub fn sandbox_root(&self) -> PathBuf {
        PathBuf::from(&self.executor.sandbox_root)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_CODEX_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_CODEX_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_CODEX_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_CODEX_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_CODEX_VAR}\"");
    }

    #[test]
    fn test_empty_document_is_complete() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.planner.critical_operations.len(), 4);
        assert_eq!(config.planner.checkpoint_node_types, vec!["tool", "llm", "parallel"]);
        assert_eq!(config.estimator.llm_cpu_secs, 30.0);
        assert_eq!(config.estimator.tool_disk_mb, 50);
        assert_eq!(config.estimator.max_concurrent_cap, 5);
        assert_eq!(config.executor.sub_agent_timeout_secs, 300);
        assert!(config.executor.rollback_completed_on_abort);
        assert!(!config.executor.interrupt_in_flight);
        assert_eq!(config.security.tools.len(), 5);
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let toml_str = r#"
[planner]
critical_operations = ["refund"]

[executor]
sandbox_root = "/var/tmp/sandboxes"
interrupt_in_flight = true

[security.tools.crm_sync]
allowed = true
timeout_secs = 15
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.planner.critical_operations, vec!["refund"]);
        assert_eq!(config.planner.checkpoint_node_types.len(), 3);
        assert_eq!(config.sandbox_root(), PathBuf::from("/var/tmp/sandboxes"));
        assert!(config.executor.interrupt_in_flight);
        assert_eq!(config.executor.default_api_base, "http://localhost:8000");
        // An explicit table replaces the built-in one.
        assert_eq!(config.security.tools.len(), 1);
        assert_eq!(config.security.tools["crm_sync"].timeout_secs, 15);
    }

    #[test]
    fn test_load_from_file() {
        std::env::set_var("TEST_CODEX_API_BASE", "https://agents.example.com");
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"[executor]\ndefault_api_base = \"${TEST_CODEX_API_BASE}\"\n")
            .expect("write toml");

        let config = EngineConfig::load(tmp.path()).expect("load config");
        assert_eq!(config.executor.default_api_base, "https://agents.example.com");
        std::env::remove_var("TEST_CODEX_API_BASE");
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load(Path::new("/nonexistent/codex.toml")).unwrap_err();
        assert!(matches!(err, CodexError::ConfigNotFound(_)));
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"[executor\n").expect("write toml");
        let err = EngineConfig::load(tmp.path()).unwrap_err();
        assert!(matches!(err, CodexError::Config(_)));
    }
}
