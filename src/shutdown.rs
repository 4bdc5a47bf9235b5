use std::sync::Arc;

use tokio::signal;

use crate::queue::startup::resumable_issues;
use crate::server::AppState;
use crate::store::SessionStore;

/// Wait for a shutdown signal (SIGINT or SIGTERM).
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }
}

/// Report what a restart will pick up: queued tasks are dropped, sessions
/// are already persisted after every transition.
pub async fn graceful_shutdown(state: &Arc<AppState>) {
    tracing::info!("Starting graceful shutdown...");

    let dropped = state.task_queue.read().await.len();
    if dropped > 0 {
        tracing::info!(dropped, "Discarding queued tasks; they are rescanned on startup");
    }

    match state.services.store.list().await {
        Ok(sessions) => {
            let resumable = resumable_issues(&sessions);
            if resumable.is_empty() {
                tracing::info!("No sessions left mid-workflow");
            }
            for session in sessions.iter().filter(|s| resumable.contains(&s.issue_number)) {
                tracing::info!(
                    issue = session.issue_number,
                    state = %session.current_state,
                    iteration = session.iteration_count,
                    "Session will resume on next start"
                );
            }
        }
        Err(e) => tracing::warn!(error = %e, "Failed to list sessions during shutdown"),
    }

    let monitored: Vec<u64> = state.monitor.tracked().iter().map(|s| s.pr_number).collect();
    if !monitored.is_empty() {
        tracing::info!(prs = ?monitored, "Stopped monitoring pull requests");
    }

    tracing::info!("Graceful shutdown complete");
}
