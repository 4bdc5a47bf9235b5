//! Deterministic agent with canned answers.
//!
//! Registered under the name `mock` so a pipeline can be exercised end to end
//! without a model. Responses can be scripted per call; once a script runs
//! out the agent answers optimistically (VALID, SUCCESS, APPROVE).

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::agent::{
    AgentCapability, AgentProvider, ImplementationContext, ImplementationResponse,
    ImplementationResult, ReviewContext, ReviewDecision, ReviewResponse, ValidationContext,
    ValidationResponse, ValidationResult,
};
use crate::error::{AppError, Result};

const ALL_CAPABILITIES: [AgentCapability; 3] = [
    AgentCapability::IssueValidation,
    AgentCapability::CodeImplementation,
    AgentCapability::CodeReview,
];

pub struct MockAgent {
    name: String,
    capabilities: Vec<AgentCapability>,
    validations: Mutex<VecDeque<Result<ValidationResponse>>>,
    implementations: Mutex<VecDeque<Result<ImplementationResponse>>>,
    reviews: Mutex<VecDeque<Result<ReviewResponse>>>,
    implementation_calls: Mutex<Vec<ImplementationContext>>,
}

impl MockAgent {
    pub fn new(name: &str) -> Self {
        Self::with_capabilities(name, ALL_CAPABILITIES.to_vec())
    }

    pub fn with_capabilities(name: &str, capabilities: Vec<AgentCapability>) -> Self {
        Self {
            name: name.to_string(),
            capabilities,
            validations: Mutex::new(VecDeque::new()),
            implementations: Mutex::new(VecDeque::new()),
            reviews: Mutex::new(VecDeque::new()),
            implementation_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn script_validation(&self, response: Result<ValidationResponse>) -> &Self {
        lock(&self.validations).push_back(response);
        self
    }

    pub fn script_implementation(&self, response: Result<ImplementationResponse>) -> &Self {
        lock(&self.implementations).push_back(response);
        self
    }

    pub fn script_review(&self, response: Result<ReviewResponse>) -> &Self {
        lock(&self.reviews).push_back(response);
        self
    }

    /// Contexts received by `implement_changes`, oldest first.
    pub fn implementation_calls(&self) -> Vec<ImplementationContext> {
        lock(&self.implementation_calls).clone()
    }

    pub fn validation(result: ValidationResult, message: &str) -> ValidationResponse {
        ValidationResponse {
            success: result == ValidationResult::Valid,
            message: message.to_string(),
            confidence: 0.9,
            result,
            clarifications: Vec::new(),
        }
    }

    pub fn implementation(result: ImplementationResult, files: &[&str]) -> ImplementationResponse {
        ImplementationResponse {
            success: matches!(result, ImplementationResult::Success | ImplementationResult::Partial),
            message: format!("Implementation {result:?}"),
            confidence: 0.8,
            result,
            files_changed: files.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn review(&self, decision: ReviewDecision) -> ReviewResponse {
        ReviewResponse {
            reviewer: self.name.clone(),
            success: true,
            message: format!("Decision: {decision:?}"),
            confidence: 0.85,
            decision,
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl AgentProvider for MockAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[AgentCapability] {
        &self.capabilities
    }

    async fn validate_issue(&self, context: &ValidationContext) -> Result<ValidationResponse> {
        if let Some(scripted) = lock(&self.validations).pop_front() {
            return scripted;
        }
        Ok(Self::validation(
            ValidationResult::Valid,
            &format!("Issue #{} is actionable", context.issue.number),
        ))
    }

    async fn implement_changes(
        &self,
        context: &ImplementationContext,
    ) -> Result<ImplementationResponse> {
        lock(&self.implementation_calls).push(context.clone());
        if let Some(scripted) = lock(&self.implementations).pop_front() {
            return scripted;
        }
        Ok(Self::implementation(ImplementationResult::Success, &[]))
    }

    async fn review_code(&self, context: &ReviewContext) -> Result<ReviewResponse> {
        if !self.has_capability(AgentCapability::CodeReview) {
            return Err(AppError::Agent(format!("{} cannot review code", self.name)));
        }
        if let Some(scripted) = lock(&self.reviews).pop_front() {
            return scripted;
        }
        let mut response = self.review(ReviewDecision::Approve);
        response.message = format!("PR #{} looks good", context.pull_request.number);
        Ok(response)
    }
}
