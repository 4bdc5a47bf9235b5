use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AppError, Result};

/// Agent provider names this build knows how to construct.
pub const KNOWN_AGENTS: &[&str] = &["claude", "mock"];

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DevflowConfig {
    pub project: ProjectConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub claude: ClaudeConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub autofix: AutoFixConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProjectConfig {
    #[serde(default)]
    pub name: String,
    pub repo_owner: String,
    pub repo_name: String,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    /// Local checkout that worktrees are created from.
    #[serde(default = "default_repo_path")]
    pub repo_path: PathBuf,
}

impl ProjectConfig {
    pub fn repository(&self) -> String {
        format!("{}/{}", self.repo_owner, self.repo_name)
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.repo_name
        } else {
            &self.name
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Default)]
pub struct GitHubConfig {
    /// Personal access token. Takes precedence over App credentials.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub app_id: Option<u64>,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    #[serde(default)]
    pub installation_id: Option<u64>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_trigger_label")]
    pub trigger_label: String,
}

// Manual Debug impl to avoid leaking the token and webhook secret
impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("app_id", &self.app_id)
            .field("private_key_path", &self.private_key_path)
            .field("installation_id", &self.installation_id)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "[REDACTED]"))
            .field("trigger_label", &self.trigger_label)
            .finish()
    }
}

#[derive(Deserialize, Serialize, Clone)]
pub struct ClaudeConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            max_turns: default_max_turns(),
        }
    }
}

// Manual Debug impl to avoid leaking the API key
impl std::fmt::Debug for ClaudeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("max_turns", &self.max_turns)
            .finish()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ToolsConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: usize,
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size(),
            max_search_results: default_max_search_results(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AgentsConfig {
    #[serde(default = "default_primary_agent")]
    pub primary: String,
    #[serde(default = "default_review_sources")]
    pub review_sources: Vec<String>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_agent(),
            review_sources: default_review_sources(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkflowConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_validated_labels")]
    pub validated_labels: Vec<String>,
    /// Hand READY_FOR_HUMAN pull requests to the continuous monitor.
    #[serde(default)]
    pub monitor_after_finalize: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            state_dir: default_state_dir(),
            validated_labels: default_validated_labels(),
            monitor_after_finalize: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AutoFixConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl Default for AutoFixConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            max_attempts: default_max_attempts(),
            max_cycles: default_max_cycles(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_dir")]
    pub base_dir: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_dir: default_workspace_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_trigger_label() -> String {
    "devflow".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    16384
}

fn default_max_turns() -> u32 {
    50
}

fn default_max_file_size() -> usize {
    512 * 1024 // 512 KB
}

fn default_max_search_results() -> usize {
    50
}

fn default_primary_agent() -> String {
    "claude".to_string()
}

fn default_review_sources() -> Vec<String> {
    vec!["claude".to_string()]
}

fn default_max_iterations() -> u32 {
    3
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".devflow/sessions")
}

fn default_validated_labels() -> Vec<String> {
    vec!["validated".to_string(), "ready-for-implementation".to_string()]
}

fn default_check_interval() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_cycles() -> u32 {
    10
}

fn default_workspace_dir() -> PathBuf {
    PathBuf::from(".devflow/worktrees")
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

impl DevflowConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("devflow").required(false));
        }

        // Environment variable overrides with DEVFLOW_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("DEVFLOW")
                .separator("__")
                .try_parsing(true),
        );

        let config: DevflowConfig = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// A starter configuration for `devflow init`.
    pub fn template(repo_owner: &str, repo_name: &str) -> Self {
        Self {
            project: ProjectConfig {
                name: repo_name.to_string(),
                repo_owner: repo_owner.to_string(),
                repo_name: repo_name.to_string(),
                base_branch: default_base_branch(),
                repo_path: default_repo_path(),
            },
            github: GitHubConfig {
                trigger_label: default_trigger_label(),
                ..GitHubConfig::default()
            },
            claude: ClaudeConfig::default(),
            tools: ToolsConfig::default(),
            agents: AgentsConfig::default(),
            workflow: WorkflowConfig::default(),
            autofix: AutoFixConfig::default(),
            monitor: MonitorConfig::default(),
            workspace: WorkspaceConfig::default(),
            server: ServerConfig::default(),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.project.repo_owner.trim().is_empty() || self.project.repo_name.trim().is_empty() {
            problems.push("project.repo_owner and project.repo_name must be set".to_string());
        }
        if !(1..=10).contains(&self.workflow.max_iterations) {
            problems.push(format!(
                "workflow.max_iterations must be between 1 and 10, got {}",
                self.workflow.max_iterations
            ));
        }
        if self.autofix.max_iterations == 0 {
            problems.push("autofix.max_iterations must be at least 1".to_string());
        }
        if self.agents.review_sources.is_empty() {
            problems.push("agents.review_sources must name at least one agent".to_string());
        }
        if !KNOWN_AGENTS.contains(&self.agents.primary.as_str()) {
            problems.push(format!("unknown primary agent '{}'", self.agents.primary));
        }
        for source in &self.agents.review_sources {
            if !KNOWN_AGENTS.contains(&source.as_str()) {
                problems.push(format!("unknown review source '{source}'"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(problems.join("; ")))
        }
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.github.webhook_secret.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_is_valid() {
        let config = DevflowConfig::template("acme", "widgets");
        assert!(config.validate().is_ok());
        assert_eq!(config.project.repository(), "acme/widgets");
        assert_eq!(config.workflow.max_iterations, 3);
        assert_eq!(config.monitor.max_attempts, 3);
    }

    #[test]
    fn test_validate_collects_problems() {
        let mut config = DevflowConfig::template("acme", "widgets");
        config.workflow.max_iterations = 0;
        config.agents.review_sources.clear();
        config.agents.primary = "gpt".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("max_iterations"));
        assert!(err.contains("review_sources"));
        assert!(err.contains("unknown primary agent 'gpt'"));
    }

    #[test]
    fn test_load_from_file_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devflow.toml");
        std::fs::write(
            &path,
            "[project]\nrepo_owner = \"acme\"\nrepo_name = \"widgets\"\n\n[agents]\nprimary = \"mock\"\nreview_sources = [\"mock\"]\n",
        )
        .unwrap();

        let config = DevflowConfig::load(path.to_str()).unwrap();
        assert_eq!(config.project.base_branch, "main");
        assert_eq!(config.agents.primary, "mock");
        assert_eq!(
            config.workflow.validated_labels,
            vec!["validated", "ready-for-implementation"]
        );
        assert_eq!(config.project.display_name(), "widgets");
    }

    #[test]
    fn test_template_round_trips_through_toml() {
        let rendered = DevflowConfig::template("acme", "widgets").to_toml().unwrap();
        assert!(rendered.contains("repo_owner = \"acme\""));
        assert!(rendered.contains("[workflow]"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let github = GitHubConfig {
            token: Some("ghp_secret".to_string()),
            ..GitHubConfig::default()
        };
        let rendered = format!("{github:?}");
        assert!(!rendered.contains("ghp_secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
