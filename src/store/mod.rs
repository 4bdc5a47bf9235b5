pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::workflow::session::WorkflowSession;
use crate::workflow::state::WorkflowState;

pub use file::FileSessionStore;
pub use memory::MemorySessionStore;

/// Persistence for workflow sessions, keyed by issue number.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// `None` when no session exists (or the stored one was unreadable).
    async fn load(&self, issue_number: u64) -> Result<Option<WorkflowSession>>;

    /// Insert or overwrite.
    async fn save(&self, session: &WorkflowSession) -> Result<()>;

    /// Returns whether a session was removed.
    async fn delete(&self, issue_number: u64) -> Result<bool>;

    /// All sessions, most recently updated first.
    async fn list(&self) -> Result<Vec<WorkflowSession>>;
}

/// Aggregate counts, always derived from the full session set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowStatistics {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub ready_for_human: usize,
    pub success_rate: f64,
    pub average_iterations: f64,
}

impl WorkflowStatistics {
    pub fn from_sessions(sessions: &[WorkflowSession]) -> Self {
        let total = sessions.len();
        let completed = sessions
            .iter()
            .filter(|s| matches!(s.current_state, WorkflowState::Completed | WorkflowState::Merged))
            .count();
        let ready_for_human = sessions
            .iter()
            .filter(|s| s.current_state == WorkflowState::ReadyForHuman)
            .count();
        let failed = sessions
            .iter()
            .filter(|s| s.current_state.is_failure_terminal())
            .count();
        let active = total - completed - failed;

        let finished = completed + failed;
        let success_rate = if finished == 0 {
            0.0
        } else {
            completed as f64 / finished as f64
        };
        let average_iterations = if total == 0 {
            0.0
        } else {
            sessions.iter().map(|s| s.iteration_count as f64).sum::<f64>() / total as f64
        };

        Self {
            total,
            active,
            completed,
            failed,
            ready_for_human,
            success_rate,
            average_iterations,
        }
    }
}
