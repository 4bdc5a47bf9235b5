pub mod claude;
pub mod claude_agent;
pub mod engine;
pub mod mock;
pub mod parse;
pub mod prompt;
pub mod selector;
pub mod tools;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::platform::types::{ChangedFile, Issue, PullRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCapability {
    IssueValidation,
    CodeImplementation,
    CodeReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationResult {
    Valid,
    NeedsClarification,
    Invalid,
    NeedsHuman,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImplementationResult {
    Success,
    Partial,
    Failed,
    NeedsHuman,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewDecision {
    Approve,
    RequestChanges,
    Comment,
    Block,
}

/// Repository facts shared by every agent call.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub name: String,
    pub repository: String,
    pub base_branch: String,
}

#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub issue: Issue,
    pub project: ProjectContext,
    pub working_directory: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ImplementationConstraints {
    pub current_iteration: u32,
    pub max_iterations: u32,
    pub max_files: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ImplementationContext {
    /// Absent for auto-fix runs, which work from feedback instead of an issue.
    pub issue: Option<Issue>,
    pub project: ProjectContext,
    pub working_directory: PathBuf,
    /// Extra task-specific guidance (fix instructions, review feedback).
    pub instructions: Option<String>,
    pub previous_transcript: String,
    pub constraints: ImplementationConstraints,
}

#[derive(Debug, Clone)]
pub struct ReviewContext {
    pub pull_request: PullRequest,
    pub changed_files: Vec<ChangedFile>,
    pub project: ProjectContext,
    pub working_directory: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ValidationResponse {
    pub success: bool,
    pub message: String,
    pub confidence: f32,
    pub result: ValidationResult,
    pub clarifications: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ImplementationResponse {
    pub success: bool,
    pub message: String,
    pub confidence: f32,
    pub result: ImplementationResult,
    pub files_changed: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ReviewResponse {
    pub reviewer: String,
    pub success: bool,
    pub message: String,
    pub confidence: f32,
    pub decision: ReviewDecision,
}

/// A pluggable AI agent.
#[async_trait]
pub trait AgentProvider: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> &[AgentCapability];

    fn has_capability(&self, capability: AgentCapability) -> bool {
        self.capabilities().contains(&capability)
    }

    async fn validate_issue(&self, context: &ValidationContext) -> Result<ValidationResponse>;

    async fn implement_changes(
        &self,
        context: &ImplementationContext,
    ) -> Result<ImplementationResponse>;

    async fn review_code(&self, context: &ReviewContext) -> Result<ReviewResponse>;
}

/// Reject responses whose confidence falls outside [0, 1].
pub fn ensure_confidence(agent: &str, confidence: f32) -> Result<()> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(AppError::Agent(format!(
            "{agent} returned confidence {confidence} outside [0, 1]"
        )))
    }
}
