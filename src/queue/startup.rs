use std::sync::Arc;

use crate::platform::Platform;
use crate::queue::task::Task;
use crate::server::AppState;
use crate::store::SessionStore;
use crate::workflow::WorkflowSession;

/// Issue numbers whose sessions stopped short of a terminal state.
pub fn resumable_issues(sessions: &[WorkflowSession]) -> Vec<u64> {
    sessions
        .iter()
        .filter(|s| !s.current_state.is_terminal())
        .map(|s| s.issue_number)
        .collect()
}

/// Re-enqueue interrupted sessions, then any open issue carrying the trigger
/// label that has no session yet.
///
/// This allows the service to resume work after a restart.
pub async fn scan_pending_work(state: &Arc<AppState>) {
    tracing::info!("Scanning for resumable sessions and labelled issues...");

    let sessions = match state.services.store.list().await {
        Ok(sessions) => sessions,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list sessions on startup");
            Vec::new()
        }
    };

    let mut enqueued = 0;
    for issue_number in resumable_issues(&sessions) {
        tracing::info!(issue = issue_number, "Resuming interrupted session");
        if state.task_queue.write().await.enqueue(Task::ProcessIssue { issue_number }) {
            enqueued += 1;
        }
    }

    let trigger_label = &state.services.config.github.trigger_label;
    match state.services.platform.list_open_issues_with_label(trigger_label).await {
        Ok(issues) => {
            for issue in issues {
                if sessions.iter().any(|s| s.issue_number == issue.number) {
                    continue;
                }
                tracing::info!(issue = issue.number, title = %issue.title, "Enqueuing labelled issue");
                if state
                    .task_queue
                    .write()
                    .await
                    .enqueue(Task::ProcessIssue { issue_number: issue.number })
                {
                    enqueued += 1;
                }
            }
        }
        Err(e) => {
            tracing::warn!(label = %trigger_label, error = %e, "Failed to list labelled issues on startup");
        }
    }

    tracing::info!(enqueued, "Startup scan complete");
}
