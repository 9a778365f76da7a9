//! Workspace manager: one managed clone of the target repository.
//!
//! Acquiring a repository wipes the managed root (retrying, and forcing
//! write permission on entries that resist deletion), recreates it, and
//! performs a full `git clone` into it. A failed clone leaves nothing behind.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

use crate::config::WorkspaceConfig;
use crate::error::OracleError;
use crate::models::Workspace;

/// Source-control client able to produce a full working copy.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Clone `url` into `dest`. `dest` exists and is empty.
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()>;
}

/// [`SourceControl`] backed by the `git` executable.
#[derive(Debug, Clone, Default)]
pub struct GitCli;

#[async_trait]
impl SourceControl for GitCli {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        let output = tokio::process::Command::new("git")
            .arg("clone")
            .arg("--")
            .arg(url)
            .arg(dest)
            .output()
            .await
            .with_context(|| "Failed to execute 'git clone'. Is git installed?")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git clone failed: {}", stderr.trim());
        }

        Ok(())
    }
}

pub struct WorkspaceManager {
    root: PathBuf,
    remove_attempts: u32,
    remove_backoff: Duration,
    scm: Arc<dyn SourceControl>,
}

impl WorkspaceManager {
    pub fn new(config: &WorkspaceConfig, scm: Arc<dyn SourceControl>) -> Self {
        Self {
            root: config.root.clone(),
            remove_attempts: config.remove_attempts.max(1),
            remove_backoff: Duration::from_millis(config.remove_backoff_ms),
            scm,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_present(&self) -> bool {
        self.root.exists()
    }

    /// Replace the managed root with a fresh clone of `source_url`.
    pub async fn acquire(
        &self,
        source_url: &str,
        generation: u64,
    ) -> Result<Workspace, OracleError> {
        let url = source_url.trim();
        if url.is_empty() {
            return Err(OracleError::Acquisition {
                url: String::new(),
                reason: "repository URL must not be empty".to_string(),
            });
        }
        if url.starts_with('-') {
            return Err(OracleError::Acquisition {
                url: url.to_string(),
                reason: "repository URL must not start with '-'".to_string(),
            });
        }

        let mut warnings = Vec::new();

        if self.root.exists() {
            tracing::info!(root = %self.root.display(), "cleaning up existing repository");
            if let Err(e) = self.remove_root().await {
                tracing::warn!(
                    root = %self.root.display(),
                    error = %e,
                    "could not clean up existing repository, continuing anyway"
                );
                warnings.push(format!("could not remove previous workspace: {:#}", e));
            }
        }

        std::fs::create_dir_all(&self.root).map_err(|e| OracleError::Acquisition {
            url: url.to_string(),
            reason: format!("failed to create {}: {}", self.root.display(), e),
        })?;

        tracing::info!(url, root = %self.root.display(), "cloning repository");
        if let Err(e) = self.scm.clone_repo(url, &self.root).await {
            if let Err(cleanup) = self.remove_root().await {
                tracing::warn!(error = %cleanup, "failed to remove partial clone");
            }
            return Err(OracleError::Acquisition {
                url: url.to_string(),
                reason: format!("{:#}", e),
            });
        }
        tracing::info!(url, "repository cloned");

        Ok(Workspace {
            root: self.root.clone(),
            source_url: url.to_string(),
            generation,
            acquired_at: chrono::Utc::now(),
            warnings,
        })
    }

    /// Remove the managed root. Succeeds when it does not exist.
    pub async fn release(&self) -> Result<()> {
        self.remove_root().await
    }

    async fn remove_root(&self) -> Result<()> {
        remove_dir_with_retries(&self.root, self.remove_attempts, self.remove_backoff).await
    }
}

/// Remove `path` recursively, retrying up to `attempts` times.
///
/// Between attempts every entry under `path` is made writable, so trees
/// containing read-only files (git pack files on Windows) can be deleted.
pub async fn remove_dir_with_retries(path: &Path, attempts: u32, backoff: Duration) -> Result<()> {
    let mut last_err = None;

    for attempt in 0..attempts.max(1) {
        if attempt > 0 {
            tokio::time::sleep(backoff).await;
        }

        match std::fs::remove_dir_all(path) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                tracing::debug!(
                    path = %path.display(),
                    attempt = attempt + 1,
                    error = %e,
                    "removal failed, forcing permissions"
                );
                force_writable(path);
                last_err = Some(e);
            }
        }
    }

    match last_err {
        Some(e) => Err(anyhow::Error::new(e).context(format!(
            "Failed to remove {} after {} attempts",
            path.display(),
            attempts
        ))),
        None => Ok(()),
    }
}

fn force_writable(path: &Path) {
    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        let _ = make_writable(entry.path());
    }
}

#[cfg(unix)]
fn make_writable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777))
}

#[cfg(not(unix))]
fn make_writable(path: &Path) -> std::io::Result<()> {
    let mut perms = std::fs::metadata(path)?.permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(false);
    std::fs::set_permissions(path, perms)
}
