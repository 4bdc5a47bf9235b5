//! One handler per [`Stage`]. Each returns the next state or an error that
//! halts the run without moving the session.

use std::path::PathBuf;
use std::sync::Arc;

use crate::agent::{
    ensure_confidence, AgentCapability, ImplementationConstraints, ImplementationContext,
    ImplementationResult, ReviewContext, ValidationContext, ValidationResponse, ValidationResult,
};
use crate::error::{AppError, Result};
use crate::platform::types::{CreatePullRequest, Issue, PullRequest};
use crate::workflow::engine::{Transition, WorkflowEngine};
use crate::workflow::review::{fan_out_reviews, merge_review_decisions, requires_fixes};
use crate::workflow::session::WorkflowSession;
use crate::workflow::state::{Stage, WorkflowState};

impl WorkflowEngine {
    fn preferences(&self) -> Vec<String> {
        vec![self.settings.primary_agent.clone()]
    }

    fn stage_error(session: &WorkflowSession, stage: Stage, message: impl Into<String>) -> AppError {
        AppError::workflow(&session.issue_id, stage.name(), message)
    }

    fn require_worktree(session: &WorkflowSession, stage: Stage) -> Result<PathBuf> {
        session
            .worktree_path
            .clone()
            .ok_or_else(|| Self::stage_error(session, stage, "session has no worktree"))
    }

    pub(super) async fn validate(&self, session: &mut WorkflowSession, issue: &Issue) -> Result<Transition> {
        let agent = self
            .agents
            .select(AgentCapability::IssueValidation, &self.preferences())?;
        let context = ValidationContext {
            issue: issue.clone(),
            project: self.settings.project.clone(),
            working_directory: self.settings.repo_path.clone(),
        };

        let response = agent.validate_issue(&context).await?;
        ensure_confidence(agent.name(), response.confidence)?;
        session.append_transcript(Stage::Validation, &response.message);
        tracing::info!(
            issue = issue.number,
            agent = agent.name(),
            result = ?response.result,
            confidence = response.confidence,
            "Validation finished"
        );

        match response.result {
            ValidationResult::Valid => {
                if !self.settings.validated_labels.is_empty() {
                    self.platform
                        .add_labels_to_issue(issue.number, &self.settings.validated_labels)
                        .await?;
                }
                Ok(Transition::to(
                    WorkflowState::Validated,
                    format!("validated by {} (confidence {:.2})", agent.name(), response.confidence),
                ))
            }
            ValidationResult::NeedsClarification => {
                self.platform
                    .add_issue_comment(issue.number, &clarification_comment(&response))
                    .await?;
                Err(Self::stage_error(session, Stage::Validation, "issue needs clarification"))
            }
            ValidationResult::Invalid => Err(Self::stage_error(
                session,
                Stage::Validation,
                format!("issue is invalid: {}", response.message.trim()),
            )),
            ValidationResult::NeedsHuman => Ok(Transition::to(
                WorkflowState::NeedsHumanIntervention,
                "validation requires a human decision",
            )),
        }
    }

    pub(super) async fn create_worktree(&self, session: &mut WorkflowSession) -> Result<Transition> {
        let branch = session.issue_id.clone();
        let path = self.worktrees.ensure_worktree(&branch).await?;
        let detail = format!("worktree {} on {branch}", path.display());
        session.branch_name = Some(branch);
        session.worktree_path = Some(path);
        Ok(Transition::to(WorkflowState::Implementing, detail))
    }

    pub(super) async fn implement(&self, session: &mut WorkflowSession, issue: &Issue) -> Result<Transition> {
        if session.iteration_count >= session.max_iterations {
            return Ok(Transition::to(
                WorkflowState::MaxIterationsReached,
                format!("iteration budget spent ({}/{})", session.iteration_count, session.max_iterations),
            ));
        }

        let worktree = Self::require_worktree(session, Stage::Implementation)?;
        let agent = self
            .agents
            .select(AgentCapability::CodeImplementation, &self.preferences())?;

        let instructions = (session.iteration_count > 0).then(|| {
            "The previous implementation did not pass review. Address every point raised in the \
             review feedback recorded in the transcript before making other changes."
                .to_string()
        });
        let context = ImplementationContext {
            issue: Some(issue.clone()),
            project: self.settings.project.clone(),
            working_directory: worktree.clone(),
            instructions,
            previous_transcript: session.transcript.clone(),
            constraints: ImplementationConstraints {
                current_iteration: session.iteration_count,
                max_iterations: session.max_iterations,
                max_files: None,
            },
        };

        let response = agent.implement_changes(&context).await?;
        ensure_confidence(agent.name(), response.confidence)?;
        session.append_transcript(Stage::Implementation, &response.message);

        match response.result {
            ImplementationResult::Success | ImplementationResult::Partial => {
                let iteration = session.iteration_count + 1;
                let message = format!("feat: implement #{} (iteration {iteration})\n\n{}", issue.number, issue.title);
                let committed = self
                    .worktrees
                    .commit(&worktree, &response.files_changed, &message)
                    .await?;
                session.iteration_count = iteration;
                tracing::info!(
                    issue = issue.number,
                    iteration,
                    result = ?response.result,
                    files = response.files_changed.len(),
                    committed,
                    "Implementation finished"
                );
                Ok(Transition::to(
                    WorkflowState::Implemented,
                    format!("{:?} with {} file(s) changed", response.result, response.files_changed.len()),
                ))
            }
            ImplementationResult::Failed => Err(Self::stage_error(
                session,
                Stage::Implementation,
                format!("implementation failed: {}", response.message.trim()),
            )),
            ImplementationResult::NeedsHuman => Ok(Transition::to(
                WorkflowState::NeedsHumanIntervention,
                "implementation requires a human decision",
            )),
        }
    }

    pub(super) async fn review(&self, session: &mut WorkflowSession, issue: &Issue) -> Result<Transition> {
        let worktree = Self::require_worktree(session, Stage::Review)?;
        self.worktrees.push(&worktree).await?;

        let pull_request = self.ensure_pull_request(session, issue).await?;
        session.pull_request_number = Some(pull_request.number);

        let changed_files = self.platform.get_pull_request_files(pull_request.number).await?;
        let reviewers = self.agents.review_agents(&self.settings.review_sources)?;
        let reviewer_count = reviewers.len();
        let context = Arc::new(ReviewContext {
            pull_request,
            changed_files,
            project: self.settings.project.clone(),
            working_directory: worktree,
        });

        let responses = fan_out_reviews(reviewers, context).await;
        for response in &responses {
            session.append_transcript(
                Stage::Review,
                &format!("{} ({:?}): {}", response.reviewer, response.decision, response.message),
            );
        }

        let Some(decision) = merge_review_decisions(&responses) else {
            return Err(Self::stage_error(
                session,
                Stage::Review,
                format!("none of {reviewer_count} reviewer(s) produced a review"),
            ));
        };
        tracing::info!(issue = issue.number, decision = ?decision, reviews = responses.len(), "Review merged");

        let detail = format!("{decision:?} from {} review(s)", responses.len());
        if requires_fixes(decision) {
            Ok(Transition::to(WorkflowState::NeedsFixes, detail))
        } else {
            Ok(Transition::to(WorkflowState::ReviewPassed, detail))
        }
    }

    /// Reuse the session's PR, then any open PR for the branch, else open one.
    async fn ensure_pull_request(&self, session: &WorkflowSession, issue: &Issue) -> Result<PullRequest> {
        if let Some(number) = session.pull_request_number {
            return self.platform.get_pull_request(number).await;
        }

        let branch = session
            .branch_name
            .clone()
            .ok_or_else(|| Self::stage_error(session, Stage::Review, "session has no branch"))?;

        if let Some(existing) = self.platform.find_open_pull_request(&branch).await? {
            tracing::info!(issue = issue.number, pr = existing.number, "Reusing open pull request");
            return Ok(existing);
        }

        let created = self
            .platform
            .create_pull_request(&CreatePullRequest {
                title: format!("Fix issue #{}: {}", issue.number, issue.title),
                body: pull_request_body(issue, session),
                head_branch: branch,
                base_branch: self.settings.project.base_branch.clone(),
            })
            .await?;
        tracing::info!(issue = issue.number, pr = created.number, "Opened pull request");
        Ok(created)
    }

    pub(super) fn gate_fix_iteration(&self, session: &WorkflowSession) -> Transition {
        if session.iteration_count >= session.max_iterations {
            Transition::to(
                WorkflowState::MaxIterationsReached,
                format!("maximum iterations reached ({}/{})", session.iteration_count, session.max_iterations),
            )
        } else {
            Transition::to(
                WorkflowState::Implementing,
                format!("fix round {} of {}", session.iteration_count + 1, session.max_iterations),
            )
        }
    }

    pub(super) async fn finalize(&self, session: &WorkflowSession) -> Transition {
        if let Some(pr) = session.pull_request_number {
            let body = format!(
                "This pull request passed automated review after {} iteration(s) and is ready for human review.",
                session.iteration_count
            );
            if let Err(e) = self.platform.add_issue_comment(pr, &body).await {
                tracing::warn!(pr, error = %e, "Failed to post ready-for-review comment");
            }
        }
        Transition::to(WorkflowState::ReadyForHuman, "ready for human review")
    }

    /// Dry run: the happy path, bounded by the same iteration gates.
    pub(super) fn simulate_stage(&self, stage: Stage, session: &mut WorkflowSession) -> Transition {
        match stage {
            Stage::Validation => Transition::to(WorkflowState::Validated, "dry run"),
            Stage::WorktreeCreation => Transition::to(WorkflowState::Implementing, "dry run"),
            Stage::Implementation if session.iteration_count >= session.max_iterations => {
                Transition::to(WorkflowState::MaxIterationsReached, "dry run")
            }
            Stage::Implementation => {
                session.iteration_count += 1;
                Transition::to(WorkflowState::Implemented, "dry run")
            }
            Stage::Review => Transition::to(WorkflowState::ReviewPassed, "dry run"),
            Stage::FixImplementation => self.gate_fix_iteration(session),
            Stage::Finalization => Transition::to(WorkflowState::ReadyForHuman, "dry run"),
        }
    }
}

fn clarification_comment(response: &ValidationResponse) -> String {
    let mut body = String::from("Before this issue can be implemented, please clarify the following:\n\n");
    if response.clarifications.is_empty() {
        body.push_str(response.message.trim());
        body.push('\n');
    } else {
        for question in &response.clarifications {
            body.push_str(&format!("- {question}\n"));
        }
    }
    body.push_str("\nUpdate the issue and re-run DevFlow once it is answered.");
    body
}

fn pull_request_body(issue: &Issue, session: &WorkflowSession) -> String {
    let summary = session
        .history
        .iter()
        .filter_map(|h| h.detail.as_ref().map(|d| format!("- {}: {d}", h.stage)))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Closes #{number}\n\n## Summary\n\nAutomated implementation of #{number}: {title}\n\n{summary}\n\n---\n*Opened by DevFlow*",
        number = issue.number,
        title = issue.title,
    )
}
