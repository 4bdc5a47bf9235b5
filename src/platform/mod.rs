pub mod github;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use types::*;

/// Issue, pull request and CI operations against one repository.
///
/// Every method may fail with `AppError::Platform`; callers inside the
/// workflow treat that as a stage failure.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Token usable for git pushes over HTTPS.
    async fn access_token(&self) -> Result<String>;

    /// Fetch a full issue with comments.
    async fn get_issue(&self, issue_number: u64) -> Result<Issue>;

    /// List open issues carrying a label.
    async fn list_open_issues_with_label(&self, label: &str) -> Result<Vec<Issue>>;

    /// Post a comment on an issue or PR.
    async fn add_issue_comment(&self, issue_number: u64, body: &str) -> Result<()>;

    /// Add labels to an issue or PR.
    async fn add_labels_to_issue(&self, issue_number: u64, labels: &[String]) -> Result<()>;

    async fn create_pull_request(&self, pr: &CreatePullRequest) -> Result<PullRequest>;

    /// Find the open pull request whose head is `head_branch`, if any.
    async fn find_open_pull_request(&self, head_branch: &str) -> Result<Option<PullRequest>>;

    async fn get_pull_request(&self, pr_number: u64) -> Result<PullRequest>;

    async fn get_pull_request_files(&self, pr_number: u64) -> Result<Vec<ChangedFile>>;

    /// Fetch reviews on a PR, including their inline comments.
    async fn list_pull_request_reviews(&self, pr_number: u64) -> Result<Vec<Review>>;

    /// Check runs reported against the PR's head commit.
    async fn list_check_runs(&self, pr_number: u64) -> Result<Vec<CheckRun>>;

    /// Raw log text of a check run's job.
    async fn get_check_run_log(&self, check_run_id: u64) -> Result<String>;
}
