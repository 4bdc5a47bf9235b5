use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};

use crate::queue::task::Task;
use crate::server::AppState;
use crate::store::SessionStore;
use crate::webhook::events::{CheckSuiteEvent, IssuesEvent, PullRequestReviewEvent, WebhookEvent};
use crate::webhook::signature::verify_signature;

/// What an event asks the service to do.
#[derive(Debug, PartialEq, Eq)]
pub enum Routing {
    Enqueue(Vec<Task>),
    CancelIssue(u64),
    Ignore,
}

pub async fn handle_webhook(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let signature = match headers.get("x-hub-signature-256").and_then(|v| v.to_str().ok()) {
        Some(sig) => sig.to_string(),
        None => {
            tracing::warn!("Missing X-Hub-Signature-256 header");
            return StatusCode::UNAUTHORIZED;
        }
    };

    let event_type = match headers.get("x-github-event").and_then(|v| v.to_str().ok()) {
        Some(et) => et.to_string(),
        None => {
            tracing::warn!("Missing X-GitHub-Event header");
            return StatusCode::BAD_REQUEST;
        }
    };

    if let Err(e) = verify_signature(&state.webhook_secret, &body, &signature) {
        tracing::warn!(error = %e, "Webhook signature verification failed");
        return StatusCode::UNAUTHORIZED;
    }

    let event = match WebhookEvent::parse(&event_type, &body) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, event_type = %event_type, "Failed to parse webhook event");
            return StatusCode::BAD_REQUEST;
        }
    };

    tracing::info!(event_type = %event_type, "Received webhook event");

    let config = &state.services.config;
    match route_event(&event, &config.github.trigger_label, &config.project.repository()) {
        Routing::Enqueue(tasks) => {
            let tasks = tracked_only(&state, tasks).await;
            if tasks.is_empty() {
                return StatusCode::OK;
            }
            let mut queue = state.task_queue.write().await;
            for task in tasks {
                queue.enqueue(task);
            }
            StatusCode::ACCEPTED
        }
        Routing::CancelIssue(issue_number) => {
            state.task_queue.write().await.cancel_issue(issue_number);
            StatusCode::OK
        }
        Routing::Ignore => StatusCode::OK,
    }
}

/// Decide what an event means for `repository`, without touching any state.
pub fn route_event(event: &WebhookEvent, trigger_label: &str, repository: &str) -> Routing {
    if let Some(source) = event.repository() {
        if !source.eq_ignore_ascii_case(repository) {
            tracing::debug!(source, expected = repository, "Ignoring event from another repository");
            return Routing::Ignore;
        }
    }

    match event {
        WebhookEvent::Issues(e) => route_issues(e, trigger_label),
        WebhookEvent::PullRequestReview(e) => route_review(e),
        WebhookEvent::CheckSuite(e) => route_check_suite(e),
        WebhookEvent::Ping => {
            tracing::info!("Received ping event");
            Routing::Ignore
        }
        WebhookEvent::Unsupported(event_type) => {
            tracing::debug!(event_type = %event_type, "Ignoring unsupported event");
            Routing::Ignore
        }
    }
}

fn route_issues(event: &IssuesEvent, trigger_label: &str) -> Routing {
    // Pull requests also arrive as issues events.
    if event.issue.pull_request.is_some() {
        return Routing::Ignore;
    }
    let label_is_trigger = event.label.as_ref().is_some_and(|l| l.name == trigger_label);

    match event.action.as_str() {
        "labeled" if label_is_trigger => {
            tracing::info!(issue = event.issue.number, title = %event.issue.title, "Issue labelled for processing");
            Routing::Enqueue(vec![Task::ProcessIssue {
                issue_number: event.issue.number,
            }])
        }
        "reopened" if event.issue.labels.iter().any(|l| l.name == trigger_label) => {
            Routing::Enqueue(vec![Task::ProcessIssue {
                issue_number: event.issue.number,
            }])
        }
        "closed" => Routing::CancelIssue(event.issue.number),
        "unlabeled" if label_is_trigger => Routing::CancelIssue(event.issue.number),
        _ => Routing::Ignore,
    }
}

fn route_review(event: &PullRequestReviewEvent) -> Routing {
    if event.action != "submitted" || event.review.state != "changes_requested" {
        return Routing::Ignore;
    }
    tracing::info!(pr = event.pull_request.number, "Changes requested on pull request");
    Routing::Enqueue(vec![Task::MonitorPullRequest {
        pr_number: event.pull_request.number,
    }])
}

fn route_check_suite(event: &CheckSuiteEvent) -> Routing {
    let failed = matches!(
        event.check_suite.conclusion.as_deref(),
        Some("failure" | "timed_out" | "action_required")
    );
    if event.action != "completed" || !failed {
        return Routing::Ignore;
    }
    tracing::info!(
        branch = ?event.check_suite.head_branch,
        prs = event.check_suite.pull_requests.len(),
        "Check suite failed"
    );
    Routing::Enqueue(
        event
            .check_suite
            .pull_requests
            .iter()
            .map(|pr| Task::MonitorPullRequest { pr_number: pr.number })
            .collect(),
    )
}

/// Monitor tasks only for PRs a session opened or the monitor already watches.
async fn tracked_only(state: &AppState, tasks: Vec<Task>) -> Vec<Task> {
    if !tasks.iter().any(|t| matches!(t, Task::MonitorPullRequest { .. })) {
        return tasks;
    }
    let session_prs: Vec<u64> = match state.services.store.list().await {
        Ok(sessions) => sessions.iter().filter_map(|s| s.pull_request_number).collect(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to list sessions while routing webhook");
            Vec::new()
        }
    };
    tasks
        .into_iter()
        .filter(|task| match task {
            Task::MonitorPullRequest { pr_number } => {
                let tracked = session_prs.contains(pr_number) || state.monitor.is_tracking(*pr_number);
                if !tracked {
                    tracing::debug!(pr = pr_number, "Ignoring pull request DevFlow did not open");
                }
                tracked
            }
            Task::ProcessIssue { .. } => true,
        })
        .collect()
}
