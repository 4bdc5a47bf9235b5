use serde::Deserialize;

/// Webhook event parsed from the payload based on the X-GitHub-Event header.
#[derive(Debug)]
pub enum WebhookEvent {
    Issues(IssuesEvent),
    PullRequestReview(PullRequestReviewEvent),
    CheckSuite(CheckSuiteEvent),
    Ping,
    Unsupported(String),
}

#[derive(Debug, Deserialize)]
pub struct IssuesEvent {
    pub action: String,
    pub issue: IssuePayload,
    pub repository: RepositoryPayload,
    pub label: Option<LabelPayload>,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestReviewEvent {
    pub action: String,
    pub review: ReviewPayload,
    pub pull_request: PullRequestPayload,
    pub repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
pub struct CheckSuiteEvent {
    pub action: String,
    pub check_suite: CheckSuitePayload,
    pub repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
pub struct IssuePayload {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub labels: Vec<LabelPayload>,
    pub pull_request: Option<serde_json::Value>, // Present if issue is a PR
}

#[derive(Debug, Deserialize)]
pub struct LabelPayload {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ReviewPayload {
    pub state: String, // "approved", "changes_requested", "commented"
}

#[derive(Debug, Deserialize)]
pub struct PullRequestPayload {
    pub number: u64,
}

#[derive(Debug, Deserialize)]
pub struct CheckSuitePayload {
    /// `None` until the suite completes.
    pub conclusion: Option<String>,
    pub head_branch: Option<String>,
    #[serde(default)]
    pub pull_requests: Vec<PullRequestPayload>,
}

#[derive(Debug, Deserialize)]
pub struct RepositoryPayload {
    pub full_name: String,
}

impl WebhookEvent {
    pub fn parse(event_type: &str, payload: &[u8]) -> Result<Self, serde_json::Error> {
        match event_type {
            "issues" => Ok(WebhookEvent::Issues(serde_json::from_slice(payload)?)),
            "pull_request_review" => Ok(WebhookEvent::PullRequestReview(serde_json::from_slice(payload)?)),
            "check_suite" => Ok(WebhookEvent::CheckSuite(serde_json::from_slice(payload)?)),
            "ping" => Ok(WebhookEvent::Ping),
            other => Ok(WebhookEvent::Unsupported(other.to_string())),
        }
    }

    /// Full name of the repository the event came from.
    pub fn repository(&self) -> Option<&str> {
        match self {
            WebhookEvent::Issues(e) => Some(&e.repository.full_name),
            WebhookEvent::PullRequestReview(e) => Some(&e.repository.full_name),
            WebhookEvent::CheckSuite(e) => Some(&e.repository.full_name),
            WebhookEvent::Ping | WebhookEvent::Unsupported(_) => None,
        }
    }
}
