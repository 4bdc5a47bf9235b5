use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::autofix::FixWorkspace;
use crate::error::Result;
use crate::platform::Platform;
use crate::store::SessionStore;
use crate::workspace::{git, WorktreeProvider};

/// Git worktrees under `base_dir`, branched from the local checkout at `repo_path`.
pub struct WorkspaceManager {
    repo_path: PathBuf,
    base_dir: PathBuf,
    platform: Arc<dyn Platform>,
}

impl WorkspaceManager {
    pub fn new(repo_path: &Path, base_dir: &Path, platform: Arc<dyn Platform>) -> Self {
        Self {
            repo_path: repo_path.to_path_buf(),
            base_dir: base_dir.to_path_buf(),
            platform,
        }
    }

    pub fn worktree_path(&self, branch: &str) -> PathBuf {
        self.base_dir.join(branch.replace('/', "__"))
    }
}

#[async_trait]
impl WorktreeProvider for WorkspaceManager {
    async fn ensure_worktree(&self, branch: &str) -> Result<PathBuf> {
        let path = self.worktree_path(branch);
        git::ensure_worktree(&self.repo_path, &path, branch).await?;
        tracing::info!(branch, path = %path.display(), "Worktree ready");
        Ok(path)
    }

    async fn commit(&self, path: &Path, files: &[String], message: &str) -> Result<bool> {
        if files.is_empty() {
            return Ok(false);
        }
        let committed = git::commit_paths(path, files, message).await?;
        if !committed {
            tracing::info!(path = %path.display(), "No changes to commit");
        }
        Ok(committed)
    }

    async fn push(&self, path: &Path) -> Result<()> {
        let token = self.platform.access_token().await?;
        git::push(path, &token).await
    }

    async fn remove_worktree(&self, branch: &str) -> Result<()> {
        let path = self.worktree_path(branch);
        git::remove_worktree(&self.repo_path, &path, branch).await?;
        tracing::info!(branch, "Removed worktree");
        Ok(())
    }
}

/// Auto-fix checkouts: the worktree of the session that opened the PR,
/// or the main checkout when no session owns it.
pub struct GitFixWorkspace {
    worktrees: Arc<WorkspaceManager>,
    store: Arc<dyn SessionStore>,
    pinned: Option<PathBuf>,
}

impl GitFixWorkspace {
    pub fn new(worktrees: Arc<WorkspaceManager>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            worktrees,
            store,
            pinned: None,
        }
    }

    /// Always fix in `root`, whichever PR is asked for.
    pub fn pinned_to(mut self, root: PathBuf) -> Self {
        self.pinned = Some(root);
        self
    }
}

#[async_trait]
impl FixWorkspace for GitFixWorkspace {
    async fn root_for(&self, pr_number: u64) -> Result<PathBuf> {
        if let Some(root) = &self.pinned {
            return Ok(root.clone());
        }
        let owner = self
            .store
            .list()
            .await?
            .into_iter()
            .find(|s| s.pull_request_number == Some(pr_number));

        match owner.and_then(|s| s.worktree_path) {
            Some(path) if path.exists() => Ok(path),
            _ => {
                tracing::debug!(pr = pr_number, "No session worktree for PR, using main checkout");
                Ok(self.worktrees.repo_path.clone())
            }
        }
    }

    async fn commit(&self, root: &Path, files: &[String], message: &str) -> Result<bool> {
        self.worktrees.commit(root, files, message).await
    }

    async fn push(&self, root: &Path) -> Result<()> {
        self.worktrees.push(root).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakePlatform;
    use crate::store::MemorySessionStore;
    use crate::workflow::session::WorkflowSession;
    use crate::workspace::git::testing::init_repo;

    fn manager(tmp: &Path) -> Arc<WorkspaceManager> {
        let repo = tmp.join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        init_repo(&repo);
        Arc::new(WorkspaceManager::new(
            &repo,
            &tmp.join("worktrees"),
            Arc::new(FakePlatform::default()),
        ))
    }

    #[tokio::test]
    async fn test_worktree_path_flattens_branch() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path());
        assert_eq!(
            mgr.worktree_path("feature/x"),
            tmp.path().join("worktrees").join("feature__x")
        );
    }

    #[tokio::test]
    async fn test_commit_with_no_files_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path());
        let path = mgr.ensure_worktree("issue-5").await.unwrap();
        assert!(!mgr.commit(&path, &[], "nothing").await.unwrap());

        std::fs::write(path.join("new.txt"), "hello").unwrap();
        assert!(mgr.commit(&path, &["new.txt".to_string()], "add").await.unwrap());
    }

    #[tokio::test]
    async fn test_fix_workspace_prefers_session_worktree() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path());
        let path = mgr.ensure_worktree("issue-6").await.unwrap();

        let store = Arc::new(MemorySessionStore::default());
        let mut session = WorkflowSession::new(6, 3);
        session.worktree_path = Some(path.clone());
        session.pull_request_number = Some(106);
        store.save(&session).await.unwrap();

        let fixes = GitFixWorkspace::new(Arc::clone(&mgr), store);
        assert_eq!(fixes.root_for(106).await.unwrap(), path);
        assert_eq!(fixes.root_for(999).await.unwrap(), tmp.path().join("repo"));

        let pinned = fixes.pinned_to(tmp.path().join("elsewhere"));
        assert_eq!(pinned.root_for(106).await.unwrap(), tmp.path().join("elsewhere"));
    }
}
