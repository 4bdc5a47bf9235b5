use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::store::SessionStore;
use crate::workflow::session::WorkflowSession;

/// Non-persistent store for tests and dry runs.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<u64, WorkflowSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, issue_number: u64) -> Result<Option<WorkflowSession>> {
        Ok(self.sessions.read().await.get(&issue_number).cloned())
    }

    async fn save(&self, session: &WorkflowSession) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.issue_number, session.clone());
        Ok(())
    }

    async fn delete(&self, issue_number: u64) -> Result<bool> {
        Ok(self.sessions.write().await.remove(&issue_number).is_some())
    }

    async fn list(&self) -> Result<Vec<WorkflowSession>> {
        let mut sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }
}
