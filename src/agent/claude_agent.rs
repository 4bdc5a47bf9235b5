use async_trait::async_trait;

use crate::agent::claude::ClaudeClient;
use crate::agent::engine::{AgentEngine, AgentOutcome};
use crate::agent::tools::{ChangeTracker, ToolRegistry};
use crate::agent::{
    parse, prompt, AgentCapability, AgentProvider, ImplementationContext, ImplementationResponse,
    ImplementationResult, ReviewContext, ReviewResponse, ValidationContext, ValidationResponse,
    ValidationResult,
};
use crate::config::{ClaudeConfig, ToolsConfig};
use crate::error::{AppError, Result};

const CAPABILITIES: [AgentCapability; 3] = [
    AgentCapability::IssueValidation,
    AgentCapability::CodeImplementation,
    AgentCapability::CodeReview,
];

/// Agent provider backed by Claude's tool-use loop.
pub struct ClaudeAgent {
    client: ClaudeClient,
    tools: ToolsConfig,
    max_turns: u32,
}

impl ClaudeAgent {
    pub fn new(claude: &ClaudeConfig, tools: &ToolsConfig) -> Result<Self> {
        Ok(Self {
            client: ClaudeClient::from_config(claude)?,
            tools: tools.clone(),
            max_turns: claude.max_turns,
        })
    }

    /// Run an exploration-only conversation and return the final text.
    async fn run_read_only(&self, system: &str, root: &std::path::Path, opener: &str) -> Result<String> {
        let engine = AgentEngine::new(&self.client, ToolRegistry::read_only(&self.tools), self.max_turns);
        match engine.run(system, root, opener).await {
            AgentOutcome::Completed { summary } => Ok(summary),
            AgentOutcome::TurnLimitReached { partial_summary } if !partial_summary.is_empty() => {
                Ok(partial_summary)
            }
            AgentOutcome::TurnLimitReached { .. } => {
                Err(AppError::Agent("turn limit reached without an answer".to_string()))
            }
            AgentOutcome::ClarificationNeeded { question } => Ok(question),
            AgentOutcome::RateLimited { message } => Err(AppError::AgentRateLimited(message)),
            AgentOutcome::Failed { error } => Err(AppError::Agent(error)),
        }
    }
}

#[async_trait]
impl AgentProvider for ClaudeAgent {
    fn name(&self) -> &str {
        "claude"
    }

    fn capabilities(&self) -> &[AgentCapability] {
        &CAPABILITIES
    }

    async fn validate_issue(&self, context: &ValidationContext) -> Result<ValidationResponse> {
        let system = prompt::validation_prompt(context);
        let text = self
            .run_read_only(&system, &context.working_directory, "Validate this issue.")
            .await?;

        let result = parse::validation_result(&text).ok_or_else(|| {
            AppError::Agent("validation response is missing a VALIDATION marker".to_string())
        })?;

        Ok(ValidationResponse {
            success: result == ValidationResult::Valid,
            confidence: parse::confidence(&text),
            clarifications: parse::clarifications(&text),
            message: text,
            result,
        })
    }

    async fn implement_changes(
        &self,
        context: &ImplementationContext,
    ) -> Result<ImplementationResponse> {
        let tracker = ChangeTracker::default();
        let engine = AgentEngine::new(
            &self.client,
            ToolRegistry::editing(&self.tools, tracker.clone()),
            self.max_turns,
        );

        let system = prompt::implementation_prompt(context);
        let outcome = engine
            .run(&system, &context.working_directory, "Start working on the task.")
            .await;
        let files_changed = tracker.paths();

        let (result, message) = match outcome {
            AgentOutcome::Completed { summary } => {
                let declared = parse::implementation_status(&summary);
                let result = match declared {
                    Some(r) => r,
                    None if files_changed.is_empty() => ImplementationResult::Failed,
                    None => ImplementationResult::Success,
                };
                (result, summary)
            }
            AgentOutcome::TurnLimitReached { partial_summary } => {
                let result = if files_changed.is_empty() {
                    ImplementationResult::Failed
                } else {
                    ImplementationResult::Partial
                };
                (result, partial_summary)
            }
            AgentOutcome::ClarificationNeeded { question } => (ImplementationResult::NeedsHuman, question),
            AgentOutcome::RateLimited { message } => return Err(AppError::AgentRateLimited(message)),
            AgentOutcome::Failed { error } => (ImplementationResult::Failed, error),
        };

        Ok(ImplementationResponse {
            success: matches!(result, ImplementationResult::Success | ImplementationResult::Partial),
            confidence: parse::confidence(&message),
            message,
            result,
            files_changed,
        })
    }

    async fn review_code(&self, context: &ReviewContext) -> Result<ReviewResponse> {
        let system = prompt::review_prompt(context);
        let text = self
            .run_read_only(&system, &context.working_directory, "Review this pull request.")
            .await?;

        let decision = parse::review_decision(&text).ok_or_else(|| {
            AppError::Agent("review response is missing a DECISION marker".to_string())
        })?;

        Ok(ReviewResponse {
            reviewer: self.name().to_string(),
            success: true,
            confidence: parse::confidence(&text),
            message: text,
            decision,
        })
    }
}
