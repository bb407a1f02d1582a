use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use codex_core::error::{CodexError, Result};
use codex_core::traits::{Sandbox, SandboxLease};

/// Sandbox handing out one temporary directory per tool step under a
/// shared root. Each directory is removed when its lease is dropped.
pub struct TempDirSandbox {
    root: PathBuf,
}

impl TempDirSandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

struct TempDirLease {
    dir: TempDir,
}

impl SandboxLease for TempDirLease {
    fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Drop for TempDirLease {
    fn drop(&mut self) {
        debug!(path = %self.dir.path().display(), "Releasing sandbox directory");
    }
}

impl Sandbox for TempDirSandbox {
    fn acquire(&self, execution_id: &str, step_id: &str) -> Result<Box<dyn SandboxLease>> {
        std::fs::create_dir_all(&self.root).map_err(|e| {
            CodexError::Sandbox(format!(
                "Failed to create sandbox root {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("codexos-{}-{}-", execution_id, step_id))
            .tempdir_in(&self.root)
            .map_err(|e| CodexError::Sandbox(format!("Failed to create sandbox: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o700))?;
        }

        debug!(path = %dir.path().display(), "Acquired sandbox directory");
        Ok(Box::new(TempDirLease { dir }))
    }
}
