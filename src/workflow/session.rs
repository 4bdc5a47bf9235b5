use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::platform::types::Issue;
use crate::workflow::state::{Stage, WorkflowState};

/// Persisted progress of one issue through the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSession {
    pub issue_id: String,
    pub issue_number: u64,
    pub current_state: WorkflowState,
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub worktree_path: Option<PathBuf>,
    pub branch_name: Option<String>,
    pub pull_request_number: Option<u64>,
    /// Append-only log of agent output.
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub issue: IssueSnapshot,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub errors: Vec<ErrorEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Issue fields captured when the session was last run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueSnapshot {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub url: String,
}

impl From<&Issue> for IssueSnapshot {
    fn from(issue: &Issue) -> Self {
        Self {
            title: issue.title.clone(),
            body: issue.body.clone(),
            labels: issue.labels.clone(),
            url: issue.url.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub stage: String,
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub stage: String,
    pub kind: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

pub fn issue_id(issue_number: u64) -> String {
    format!("issue-{issue_number}")
}

impl WorkflowSession {
    pub fn new(issue_number: u64, max_iterations: u32) -> Self {
        let now = Utc::now();
        Self {
            issue_id: issue_id(issue_number),
            issue_number,
            current_state: WorkflowState::Pending,
            iteration_count: 0,
            max_iterations,
            worktree_path: None,
            branch_name: None,
            pull_request_number: None,
            transcript: String::new(),
            issue: IssueSnapshot::default(),
            history: Vec::new(),
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn append_transcript(&mut self, stage: Stage, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        if !self.transcript.is_empty() {
            self.transcript.push_str("\n\n");
        }
        self.transcript
            .push_str(&format!("### {} ({})\n{}", stage, Utc::now().to_rfc3339(), text.trim_end()));
        self.updated_at = Utc::now();
    }

    /// Move to `to`, recording the step in the history log.
    pub fn record_transition(&mut self, stage: Stage, to: WorkflowState, detail: Option<String>) {
        let now = Utc::now();
        self.history.push(HistoryEntry {
            stage: stage.name().to_string(),
            from: self.current_state,
            to,
            at: now,
            detail,
        });
        self.current_state = to;
        self.updated_at = now;
    }

    pub fn record_error(&mut self, stage: Stage, kind: &str, message: &str) {
        let now = Utc::now();
        self.errors.push(ErrorEntry {
            stage: stage.name().to_string(),
            kind: kind.to_string(),
            message: message.to_string(),
            at: now,
        });
        self.updated_at = now;
    }

    pub fn last_error(&self) -> Option<&ErrorEntry> {
        self.errors.last()
    }

    /// Stage names of every successful transition, oldest first.
    pub fn completed_stages(&self) -> Vec<String> {
        self.history.iter().map(|h| h.stage.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_starts_pending() {
        let session = WorkflowSession::new(42, 3);
        assert_eq!(session.issue_id, "issue-42");
        assert_eq!(session.current_state, WorkflowState::Pending);
        assert_eq!(session.iteration_count, 0);
        assert!(session.pull_request_number.is_none());
    }

    #[test]
    fn test_transition_appends_history() {
        let mut session = WorkflowSession::new(7, 3);
        session.record_transition(Stage::Validation, WorkflowState::Validated, None);
        session.record_transition(Stage::WorktreeCreation, WorkflowState::Implementing, Some("issue-7".into()));

        assert_eq!(session.current_state, WorkflowState::Implementing);
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[1].from, WorkflowState::Validated);
        assert_eq!(session.completed_stages(), vec!["validation", "worktree_creation"]);
    }

    #[test]
    fn test_transcript_is_append_only() {
        let mut session = WorkflowSession::new(1, 3);
        session.append_transcript(Stage::Validation, "looks valid");
        session.append_transcript(Stage::Implementation, "   ");
        session.append_transcript(Stage::Implementation, "changed src/lib.rs");

        assert!(session.transcript.starts_with("### validation"));
        assert!(session.transcript.contains("looks valid"));
        assert!(session.transcript.contains("changed src/lib.rs"));
        assert_eq!(session.transcript.matches("###").count(), 2);
    }

    #[test]
    fn test_deserializes_without_optional_logs() {
        let json = r#"{
            "issue_id": "issue-3",
            "issue_number": 3,
            "current_state": "IMPLEMENTED",
            "iteration_count": 1,
            "max_iterations": 3,
            "worktree_path": null,
            "branch_name": "issue-3",
            "pull_request_number": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        }"#;
        let session: WorkflowSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.current_state, WorkflowState::Implemented);
        assert!(session.history.is_empty());
        assert!(session.last_error().is_none());
    }
}
