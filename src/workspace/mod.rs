pub mod git;
pub mod manager;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;

pub use manager::{GitFixWorkspace, WorkspaceManager};

/// Isolated per-branch checkouts the workflow implements in.
#[async_trait]
pub trait WorktreeProvider: Send + Sync {
    /// Create (or reuse) the worktree for `branch` and return its path.
    async fn ensure_worktree(&self, branch: &str) -> Result<PathBuf>;

    /// Commit exactly `files`. Returns `false` when there was nothing to commit.
    async fn commit(&self, path: &Path, files: &[String], message: &str) -> Result<bool>;

    /// Push the worktree's branch to the remote.
    async fn push(&self, path: &Path) -> Result<()>;

    async fn remove_worktree(&self, branch: &str) -> Result<()>;
}
