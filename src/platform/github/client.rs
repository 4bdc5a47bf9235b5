use async_trait::async_trait;
use octocrab::Octocrab;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::{GitHubConfig, ProjectConfig};
use crate::error::{AppError, Result};
use crate::platform::types::*;
use crate::platform::Platform;

use super::auth::{generate_app_jwt, GitHubAuth};
use super::mapper;

const GITHUB_API_URL: &str = "https://api.github.com";

/// GitHub adapter bound to a single repository.
pub struct GitHubPlatform {
    owner: String,
    repo: String,
    auth: GitHubAuth,
    /// Cached installation token and its expiry (App auth only)
    token_cache: RwLock<Option<(String, chrono::DateTime<chrono::Utc>)>>,
    http: reqwest::Client,
}

impl GitHubPlatform {
    pub fn new(github: &GitHubConfig, project: &ProjectConfig) -> Result<Self> {
        Ok(Self {
            owner: project.repo_owner.clone(),
            repo: project.repo_name.clone(),
            auth: GitHubAuth::from_config(github)?,
            token_cache: RwLock::new(None),
            http: reqwest::Client::new(),
        })
    }

    async fn client(&self) -> Result<Octocrab> {
        let token = self.access_token().await?;
        Octocrab::builder()
            .personal_token(token)
            .build()
            .map_err(|e| AppError::Platform(format!("Failed to build octocrab client: {e}")))
    }

    fn repo_route(&self, suffix: &str) -> String {
        format!("/repos/{}/{}/{suffix}", self.owner, self.repo)
    }

    async fn get_json(&self, client: &Octocrab, route: &str) -> Result<Value> {
        client
            .get(route, None::<&()>)
            .await
            .map_err(|e| AppError::Platform(format!("GET {route} failed: {e}")))
    }

    async fn installation_token(
        &self,
        app_id: u64,
        private_key_path: &std::path::Path,
        installation_id: u64,
    ) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some((token, expiry)) = cache.as_ref() {
                if *expiry > chrono::Utc::now() + chrono::Duration::minutes(5) {
                    return Ok(token.clone());
                }
            }
        }

        let jwt = generate_app_jwt(app_id, private_key_path)?;
        let client = Octocrab::builder()
            .personal_token(jwt)
            .build()
            .map_err(|e| AppError::Platform(format!("Failed to build JWT client: {e}")))?;

        let url = format!("/app/installations/{installation_id}/access_tokens");
        let response: Value = client
            .post(&url, None::<&()>)
            .await
            .map_err(|e| AppError::Platform(format!("Failed to create installation token: {e}")))?;

        let token = response["token"]
            .as_str()
            .ok_or_else(|| AppError::Platform("No token in response".to_string()))?
            .to_string();

        let expires_at = response["expires_at"]
            .as_str()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|| chrono::Utc::now() + chrono::Duration::hours(1));

        *self.token_cache.write().await = Some((token.clone(), expires_at));

        Ok(token)
    }
}

#[async_trait]
impl Platform for GitHubPlatform {
    async fn access_token(&self) -> Result<String> {
        match &self.auth {
            GitHubAuth::Token(token) => Ok(token.clone()),
            GitHubAuth::App {
                app_id,
                private_key_path,
                installation_id,
            } => {
                self.installation_token(*app_id, private_key_path, *installation_id)
                    .await
            }
        }
    }

    async fn get_issue(&self, issue_number: u64) -> Result<Issue> {
        let client = self.client().await?;

        let issue = client
            .issues(&self.owner, &self.repo)
            .get(issue_number)
            .await?;

        let comments_page = client
            .issues(&self.owner, &self.repo)
            .list_comments(issue_number)
            .per_page(100)
            .send()
            .await?;

        Ok(mapper::map_issue(&issue, comments_page.items))
    }

    async fn list_open_issues_with_label(&self, label: &str) -> Result<Vec<Issue>> {
        let client = self.client().await?;

        let page = client
            .issues(&self.owner, &self.repo)
            .list()
            .state(octocrab::params::State::Open)
            .labels(&[label.to_string()])
            .per_page(100)
            .send()
            .await?;

        Ok(page
            .items
            .iter()
            .filter(|issue| issue.pull_request.is_none())
            .map(|issue| mapper::map_issue(issue, Vec::new()))
            .collect())
    }

    async fn add_issue_comment(&self, issue_number: u64, body: &str) -> Result<()> {
        let client = self.client().await?;
        client
            .issues(&self.owner, &self.repo)
            .create_comment(issue_number, body)
            .await?;
        Ok(())
    }

    async fn add_labels_to_issue(&self, issue_number: u64, labels: &[String]) -> Result<()> {
        let client = self.client().await?;
        client
            .issues(&self.owner, &self.repo)
            .add_labels(issue_number, labels)
            .await?;
        Ok(())
    }

    async fn create_pull_request(&self, pr: &CreatePullRequest) -> Result<PullRequest> {
        let client = self.client().await?;
        let created = client
            .pulls(&self.owner, &self.repo)
            .create(&pr.title, &pr.head_branch, &pr.base_branch)
            .body(&pr.body)
            .send()
            .await?;

        Ok(mapper::map_pull_request(created))
    }

    async fn find_open_pull_request(&self, head_branch: &str) -> Result<Option<PullRequest>> {
        let client = self.client().await?;
        let head = format!("{}:{head_branch}", self.owner);
        let route = self.repo_route(&format!(
            "pulls?state=open&head={}",
            urlencoding::encode(&head)
        ));

        let pulls = self.get_json(&client, &route).await?;
        Ok(pulls
            .as_array()
            .and_then(|items| items.first())
            .map(mapper::pull_request_from_json))
    }

    async fn get_pull_request(&self, pr_number: u64) -> Result<PullRequest> {
        let client = self.client().await?;
        let pr = self
            .get_json(&client, &self.repo_route(&format!("pulls/{pr_number}")))
            .await?;
        Ok(mapper::pull_request_from_json(&pr))
    }

    async fn get_pull_request_files(&self, pr_number: u64) -> Result<Vec<ChangedFile>> {
        let client = self.client().await?;
        let files = self
            .get_json(
                &client,
                &self.repo_route(&format!("pulls/{pr_number}/files?per_page=100")),
            )
            .await?;

        Ok(files
            .as_array()
            .map(|items| items.iter().map(mapper::changed_file_from_json).collect())
            .unwrap_or_default())
    }

    async fn list_pull_request_reviews(&self, pr_number: u64) -> Result<Vec<Review>> {
        let client = self.client().await?;
        let reviews = self
            .get_json(&client, &self.repo_route(&format!("pulls/{pr_number}/reviews")))
            .await?;

        let mut result = Vec::new();
        for review in reviews.as_array().map(Vec::as_slice).unwrap_or_default() {
            let review_id = review["id"].as_u64().unwrap_or(0);

            let comments_route =
                self.repo_route(&format!("pulls/{pr_number}/reviews/{review_id}/comments"));
            let comments = match self.get_json(&client, &comments_route).await {
                Ok(comments) => comments
                    .as_array()
                    .map(|items| items.iter().map(mapper::review_comment_from_json).collect())
                    .unwrap_or_default(),
                Err(e) => {
                    tracing::warn!(pr = pr_number, review = review_id, error = %e, "Failed to fetch review comments");
                    Vec::new()
                }
            };

            result.push(mapper::review_from_json(review, comments));
        }

        Ok(result)
    }

    async fn list_check_runs(&self, pr_number: u64) -> Result<Vec<CheckRun>> {
        let client = self.client().await?;
        let pr = self
            .get_json(&client, &self.repo_route(&format!("pulls/{pr_number}")))
            .await?;

        let sha = pr["head"]["sha"].as_str().ok_or_else(|| {
            AppError::Platform(format!("PR #{pr_number} has no head commit"))
        })?;

        let runs = self
            .get_json(
                &client,
                &self.repo_route(&format!("commits/{sha}/check-runs?per_page=100")),
            )
            .await?;

        Ok(runs["check_runs"]
            .as_array()
            .map(|items| items.iter().map(mapper::check_run_from_json).collect())
            .unwrap_or_default())
    }

    async fn get_check_run_log(&self, check_run_id: u64) -> Result<String> {
        let token = self.access_token().await?;
        // Actions job ids equal their check run ids; the endpoint redirects to the raw log.
        let url = format!(
            "{GITHUB_API_URL}/repos/{}/{}/actions/jobs/{check_run_id}/logs",
            self.owner, self.repo
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header("user-agent", "devflow")
            .header("accept", "application/vnd.github+json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Platform(format!(
                "Fetching log for check run {check_run_id} returned {status}"
            )));
        }

        Ok(response.text().await?)
    }
}
