use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::fs;

use crate::error::{AppError, Result};
use crate::store::SessionStore;
use crate::workflow::session::{issue_id, WorkflowSession};

/// One JSON document per issue under `dir`, named `issue-{n}.json`.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, issue_number: u64) -> PathBuf {
        self.dir.join(format!("{}.json", issue_id(issue_number)))
    }

    /// Move an unreadable file aside so the next run starts fresh.
    async fn quarantine(&self, path: &Path, reason: &str) {
        let backup = path.with_extension("json.backup");
        tracing::warn!(
            path = %path.display(),
            backup = %backup.display(),
            reason,
            "Corrupt session file, backing up"
        );
        if let Err(e) = fs::rename(path, &backup).await {
            tracing::error!(path = %path.display(), error = %e, "Failed to back up corrupt session");
        }
    }

    async fn read_session(&self, path: &Path) -> Result<Option<WorkflowSession>> {
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::State(format!("read {}: {e}", path.display())));
            }
        };
        match serde_json::from_str(&contents) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                self.quarantine(path, &e.to_string()).await;
                Ok(None)
            }
        }
    }

    /// Delete terminal sessions not updated for `days` days. Returns the count removed.
    pub async fn cleanup_completed(&self, days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(days);
        let mut removed = 0;
        for session in self.list().await? {
            if session.current_state.is_terminal() && session.updated_at < cutoff {
                if self.delete(session.issue_number).await? {
                    removed += 1;
                }
            }
        }
        tracing::info!(removed, days, "Cleaned up finished sessions");
        Ok(removed)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, issue_number: u64) -> Result<Option<WorkflowSession>> {
        self.read_session(&self.path_for(issue_number)).await
    }

    async fn save(&self, session: &WorkflowSession) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AppError::State(format!("create {}: {e}", self.dir.display())))?;

        let path = self.path_for(session.issue_number);
        let tmp_path = path.with_extension("json.tmp");
        let mut buf = serde_json::to_string_pretty(session)?;
        buf.push('\n');

        fs::write(&tmp_path, buf)
            .await
            .map_err(|e| AppError::State(format!("write {}: {e}", tmp_path.display())))?;
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| AppError::State(format!("replace {}: {e}", path.display())))?;

        tracing::debug!(
            issue = session.issue_number,
            state = %session.current_state,
            "Session saved"
        );
        Ok(())
    }

    async fn delete(&self, issue_number: u64) -> Result<bool> {
        match fs::remove_file(self.path_for(issue_number)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::State(format!("delete session {issue_number}: {e}"))),
        }
    }

    async fn list(&self) -> Result<Vec<WorkflowSession>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::State(format!("list {}: {e}", self.dir.display()))),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_session = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("issue-") && n.ends_with(".json"));
            if !is_session {
                continue;
            }
            if let Some(session) = self.read_session(&path).await? {
                sessions.push(session);
            }
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::state::WorkflowState;

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("sessions"));

        let mut session = WorkflowSession::new(42, 3);
        session.current_state = WorkflowState::Validated;
        store.save(&session).await.unwrap();

        let loaded = store.load(42).await.unwrap().unwrap();
        assert_eq!(loaded.current_state, WorkflowState::Validated);
        assert!(dir.path().join("sessions/issue-42.json").exists());
        assert!(!dir.path().join("sessions/issue-42.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_session_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        assert!(store.load(1).await.unwrap().is_none());
        assert!(!store.delete(1).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        std::fs::write(dir.path().join("issue-9.json"), "{ not json").unwrap();

        assert!(store.load(9).await.unwrap().is_none());
        assert!(dir.path().join("issue-9.json.backup").exists());
        assert!(!dir.path().join("issue-9.json").exists());
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_skips_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());

        let mut older = WorkflowSession::new(1, 3);
        older.updated_at = Utc::now() - Duration::hours(2);
        let newer = WorkflowSession::new(2, 3);
        store.save(&older).await.unwrap();
        store.save(&newer).await.unwrap();
        std::fs::write(dir.path().join("issue-3.json"), "garbage").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let numbers: Vec<u64> = store.list().await.unwrap().iter().map(|s| s.issue_number).collect();
        assert_eq!(numbers, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_cleanup_only_removes_old_terminal_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());

        let mut old_done = WorkflowSession::new(1, 3);
        old_done.current_state = WorkflowState::Merged;
        old_done.updated_at = Utc::now() - Duration::days(10);
        let mut old_active = WorkflowSession::new(2, 3);
        old_active.current_state = WorkflowState::Implementing;
        old_active.updated_at = Utc::now() - Duration::days(10);
        let mut fresh_done = WorkflowSession::new(3, 3);
        fresh_done.current_state = WorkflowState::ReadyForHuman;

        for s in [&old_done, &old_active, &fresh_done] {
            store.save(s).await.unwrap();
        }

        assert_eq!(store.cleanup_completed(7).await.unwrap(), 1);
        assert!(store.load(1).await.unwrap().is_none());
        assert!(store.load(2).await.unwrap().is_some());
        assert!(store.load(3).await.unwrap().is_some());
    }
}
