use std::path::{Path, PathBuf};

use git2::{
    BranchType, Cred, PushOptions, RemoteCallbacks, Repository, Signature, WorktreeAddOptions,
    WorktreePruneOptions,
};

use crate::error::{AppError, Result};

const BOT_NAME: &str = "DevFlow Bot";
const BOT_EMAIL: &str = "devflow-bot@users.noreply.github.com";

/// Reject branch names that could be read as options or escape `refs/heads`.
pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('-') || name.contains("..") || name.contains(char::is_whitespace) {
        return Err(AppError::Git(format!("Invalid branch name: {name:?}")));
    }
    Ok(())
}

fn worktree_name(branch: &str) -> String {
    branch.replace('/', "-")
}

/// Build `PushOptions` that authenticate via credential callback.
/// The token is captured by the closure and never written to disk.
fn make_push_options(token: &str) -> PushOptions<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username_from_url, _allowed_types| {
        Cred::userpass_plaintext("x-access-token", token)
    });
    let mut opts = PushOptions::new();
    opts.remote_callbacks(callbacks);
    opts
}

/// Make sure `worktree_path` is a worktree of `repo_path` with `branch` checked out.
///
/// Re-running is safe: an existing checkout is reused, an existing branch is
/// attached instead of recreated, and a stale worktree entry is pruned first.
pub async fn ensure_worktree(repo_path: &Path, worktree_path: &Path, branch: &str) -> Result<()> {
    validate_branch_name(branch)?;

    let repo_path = repo_path.to_path_buf();
    let worktree_path = worktree_path.to_path_buf();
    let branch = branch.to_string();

    tokio::task::spawn_blocking(move || {
        if worktree_path.join(".git").exists() {
            tracing::debug!(path = %worktree_path.display(), "Reusing existing worktree");
            return Ok(());
        }

        let repo = Repository::open(&repo_path)?;
        let name = worktree_name(&branch);

        if let Ok(stale) = repo.find_worktree(&name) {
            tracing::info!(worktree = %name, "Pruning stale worktree entry");
            let mut prune = WorktreePruneOptions::new();
            prune.valid(true).working_tree(true);
            stale.prune(Some(&mut prune))?;
        }

        let local = match repo.find_branch(&branch, BranchType::Local) {
            Ok(existing) => existing,
            Err(_) => {
                let head = repo.head()?.peel_to_commit()?;
                repo.branch(&branch, &head, false)?
            }
        };

        if let Some(parent) = worktree_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::Workspace(format!("Failed to create worktree dir: {e}")))?;
        }

        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(local.get()));
        repo.worktree(&name, &worktree_path, Some(&opts))?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Worktree task panicked: {e}")))?
}

/// Remove a worktree and its checkout. The branch itself is kept.
pub async fn remove_worktree(repo_path: &Path, worktree_path: &Path, branch: &str) -> Result<()> {
    let repo_path = repo_path.to_path_buf();
    let worktree_path = worktree_path.to_path_buf();
    let name = worktree_name(branch);

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&repo_path)?;
        if let Ok(worktree) = repo.find_worktree(&name) {
            let mut prune = WorktreePruneOptions::new();
            prune.valid(true).working_tree(true);
            worktree.prune(Some(&mut prune))?;
        }
        if worktree_path.exists() {
            std::fs::remove_dir_all(&worktree_path)
                .map_err(|e| AppError::Workspace(format!("Failed to remove worktree: {e}")))?;
        }
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Remove-worktree task panicked: {e}")))?
}

/// Stage exactly `files` (additions and deletions) and commit them.
///
/// Returns `false` without committing when the staged tree equals HEAD.
pub async fn commit_paths(dir: &Path, files: &[String], message: &str) -> Result<bool> {
    let dir = dir.to_path_buf();
    let files: Vec<PathBuf> = files.iter().map(PathBuf::from).collect();
    let message = message.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut index = repo.index()?;
        for file in &files {
            if dir.join(file).exists() {
                index.add_path(file)?;
            } else {
                index.remove_path(file)?;
            }
        }
        index.write()?;

        let tree_oid = index.write_tree()?;
        let parent = repo.head()?.peel_to_commit()?;
        if parent.tree_id() == tree_oid {
            return Ok(false);
        }

        let tree = repo.find_tree(tree_oid)?;
        let sig = Signature::now(BOT_NAME, BOT_EMAIL)?;
        repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&parent])?;
        Ok(true)
    })
    .await
    .map_err(|e| AppError::Git(format!("Commit task panicked: {e}")))?
}

/// Name of the branch checked out in `dir`.
pub async fn current_branch(dir: &Path) -> Result<String> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let head = repo.head()?;
        head.shorthand()
            .map(str::to_string)
            .ok_or_else(|| AppError::Git("HEAD is not a named branch".to_string()))
    })
    .await
    .map_err(|e| AppError::Git(format!("Branch task panicked: {e}")))?
}

/// Push the checked-out branch of `dir` to origin.
pub async fn push(dir: &Path, token: &str) -> Result<()> {
    let branch_name = current_branch(dir).await?;
    validate_branch_name(&branch_name)?;

    let dir = dir.to_path_buf();
    let token = token.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut remote = repo.find_remote("origin")?;
        let refspec = format!("refs/heads/{branch_name}:refs/heads/{branch_name}");
        let mut push_opts = make_push_options(&token);
        remote.push(&[&refspec], Some(&mut push_opts))?;
        tracing::info!(branch = %branch_name, "Pushed branch");
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Push task panicked: {e}")))?
}

#[cfg(test)]
pub mod testing {
    use std::path::Path;

    use git2::{Repository, Signature};

    /// A repository at `dir` with one commit containing `README.md`.
    pub fn init_repo(dir: &Path) -> Repository {
        let repo = Repository::init(dir).unwrap();
        std::fs::write(dir.join("README.md"), "# widgets\n").unwrap();
        {
            let mut index = repo.index().unwrap();
            index.add_path(Path::new("README.md")).unwrap();
            index.write().unwrap();
            let tree_oid = index.write_tree().unwrap();
            let tree = repo.find_tree(tree_oid).unwrap();
            let sig = Signature::now("Test", "test@example.com").unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
        }
        repo
    }
}
