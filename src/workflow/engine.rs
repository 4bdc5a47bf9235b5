use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::agent::selector::AgentSelector;
use crate::agent::ProjectContext;
use crate::config::DevflowConfig;
use crate::error::{AppError, Result};
use crate::platform::types::Issue;
use crate::platform::Platform;
use crate::store::SessionStore;
use crate::workflow::session::{issue_id, IssueSnapshot, WorkflowSession};
use crate::workflow::state::{Stage, WorkflowState};
use crate::workspace::WorktreeProvider;

/// Knobs the engine reads on every run.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_iterations: u32,
    pub validated_labels: Vec<String>,
    pub review_sources: Vec<String>,
    pub primary_agent: String,
    pub project: ProjectContext,
    /// Main checkout, used by stages that run before a worktree exists.
    pub repo_path: PathBuf,
}

impl EngineSettings {
    pub fn from_config(config: &DevflowConfig) -> Self {
        Self {
            max_iterations: config.workflow.max_iterations,
            validated_labels: config.workflow.validated_labels.clone(),
            review_sources: config.agents.review_sources.clone(),
            primary_agent: config.agents.primary.clone(),
            project: ProjectContext {
                name: config.project.display_name().to_string(),
                repository: config.project.repository(),
                base_branch: config.project.base_branch.clone(),
            },
            repo_path: config.project.repo_path.clone(),
        }
    }
}

/// Asked between stages when the engine is not running unattended.
#[async_trait]
pub trait StageConfirmer: Send + Sync {
    /// `false` stops the run; the session stays at `next`.
    async fn confirm(&self, issue_number: u64, completed: Stage, next: WorkflowState) -> bool;
}

/// A successful stage: where the session goes next.
#[derive(Debug)]
pub(super) struct Transition {
    pub next: WorkflowState,
    pub detail: Option<String>,
}

impl Transition {
    pub fn to(next: WorkflowState, detail: impl Into<String>) -> Self {
        Self {
            next,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub issue_number: u64,
    pub success: bool,
    pub stages_completed: Vec<String>,
    pub current_state: WorkflowState,
    pub error: Option<String>,
    pub pull_request: Option<u64>,
    pub iteration_count: u32,
}

impl WorkflowResult {
    fn from_session(session: &WorkflowSession, success: bool, error: Option<String>) -> Self {
        Self {
            issue_number: session.issue_number,
            success,
            stages_completed: session.completed_stages(),
            current_state: session.current_state,
            error,
            pull_request: session.pull_request_number,
            iteration_count: session.iteration_count,
        }
    }
}

/// What a human needs to pick a session up.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStatus {
    pub issue_number: u64,
    pub title: String,
    pub state: WorkflowState,
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub pull_request: Option<u64>,
    pub branch: Option<String>,
    pub last_error: Option<String>,
    pub stages_completed: Vec<String>,
    pub transcript: String,
    pub updated_at: DateTime<Utc>,
}

impl From<&WorkflowSession> for WorkflowStatus {
    fn from(session: &WorkflowSession) -> Self {
        Self {
            issue_number: session.issue_number,
            title: session.issue.title.clone(),
            state: session.current_state,
            iteration_count: session.iteration_count,
            max_iterations: session.max_iterations,
            pull_request: session.pull_request_number,
            branch: session.branch_name.clone(),
            last_error: session.last_error().map(|e| format!("[{}] {}", e.stage, e.message)),
            stages_completed: session.completed_stages(),
            transcript: session.transcript.clone(),
            updated_at: session.updated_at,
        }
    }
}

/// Drives one issue at a time through the stage state machine.
///
/// Callers serialize `process_issue` per issue number; the engine itself
/// holds no per-issue lock.
pub struct WorkflowEngine {
    pub(super) platform: Arc<dyn Platform>,
    pub(super) agents: Arc<AgentSelector>,
    pub(super) store: Arc<dyn SessionStore>,
    pub(super) worktrees: Arc<dyn WorktreeProvider>,
    pub(super) confirmer: Option<Arc<dyn StageConfirmer>>,
    pub(super) settings: EngineSettings,
}

impl WorkflowEngine {
    pub fn new(
        platform: Arc<dyn Platform>,
        agents: Arc<AgentSelector>,
        store: Arc<dyn SessionStore>,
        worktrees: Arc<dyn WorktreeProvider>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            platform,
            agents,
            store,
            worktrees,
            confirmer: None,
            settings,
        }
    }

    pub fn with_confirmer(mut self, confirmer: Arc<dyn StageConfirmer>) -> Self {
        self.confirmer = Some(confirmer);
        self
    }

    /// Run the issue's session until it reaches a terminal state or a stage fails.
    ///
    /// A stage failure is reported in the result, not as `Err`, and leaves the
    /// session at its last successful state. `Err` means the run itself could
    /// not proceed (issue unreadable, store unwritable, illegal transition).
    pub async fn process_issue(&self, issue_number: u64, auto_mode: bool, dry_run: bool) -> Result<WorkflowResult> {
        let id = issue_id(issue_number);
        let issue = self
            .platform
            .get_issue(issue_number)
            .await
            .map_err(|e| AppError::workflow(&id, "load_issue", e.to_string()))?;

        let mut session = match self.store.load(issue_number).await? {
            Some(existing) => {
                tracing::info!(
                    issue = issue_number,
                    state = %existing.current_state,
                    iteration = existing.iteration_count,
                    "Resuming workflow session"
                );
                existing
            }
            None => {
                tracing::info!(issue = issue_number, "Starting new workflow session");
                WorkflowSession::new(issue_number, self.settings.max_iterations)
            }
        };
        session.issue = IssueSnapshot::from(&issue);
        if !dry_run {
            self.store.save(&session).await?;
        }

        while let Some(stage) = Stage::for_state(session.current_state) {
            tracing::info!(issue = issue_number, stage = %stage, state = %session.current_state, dry_run, "Running stage");

            let outcome = if dry_run {
                Ok(self.simulate_stage(stage, &mut session))
            } else {
                self.run_stage(stage, &mut session, &issue).await
            };

            let transition = match outcome {
                Ok(transition) => transition,
                Err(e) => {
                    tracing::warn!(issue = issue_number, stage = %stage, error = %e, "Stage failed");
                    session.record_error(stage, e.kind(), &e.to_string());
                    if !dry_run {
                        self.store.save(&session).await?;
                    }
                    return Ok(WorkflowResult::from_session(&session, false, Some(e.to_string())));
                }
            };

            let from = session.current_state;
            if !from.can_transition_to(transition.next) {
                return Err(AppError::workflow(
                    &session.issue_id,
                    stage.name(),
                    format!("illegal transition {from} -> {}", transition.next),
                ));
            }

            session.record_transition(stage, transition.next, transition.detail);
            if !dry_run {
                self.store.save(&session).await?;
            }
            tracing::info!(issue = issue_number, stage = %stage, from = %from, to = %session.current_state, "Stage completed");

            if !auto_mode && !dry_run && !session.current_state.is_terminal() {
                if let Some(confirmer) = &self.confirmer {
                    if !confirmer.confirm(issue_number, stage, session.current_state).await {
                        tracing::info!(issue = issue_number, state = %session.current_state, "Stopped at user request");
                        return Ok(WorkflowResult::from_session(
                            &session,
                            false,
                            Some("stopped at user request".to_string()),
                        ));
                    }
                }
            }
        }

        let success = session.current_state.is_success_terminal();
        let error = (!success).then(|| terminal_error(&session));
        Ok(WorkflowResult::from_session(&session, success, error))
    }

    async fn run_stage(&self, stage: Stage, session: &mut WorkflowSession, issue: &Issue) -> Result<Transition> {
        match stage {
            Stage::Validation => self.validate(session, issue).await,
            Stage::WorktreeCreation => self.create_worktree(session).await,
            Stage::Implementation => self.implement(session, issue).await,
            Stage::Review => self.review(session, issue).await,
            Stage::FixImplementation => Ok(self.gate_fix_iteration(session)),
            Stage::Finalization => Ok(self.finalize(session).await),
        }
    }

    pub async fn workflow_status(&self, issue_number: u64) -> Result<Option<WorkflowStatus>> {
        Ok(self
            .store
            .load(issue_number)
            .await?
            .map(|session| WorkflowStatus::from(&session)))
    }

    /// Delete the session and (best-effort) its worktree.
    pub async fn cleanup_workflow(&self, issue_number: u64) -> Result<bool> {
        if let Some(session) = self.store.load(issue_number).await? {
            if let Some(branch) = &session.branch_name {
                if let Err(e) = self.worktrees.remove_worktree(branch).await {
                    tracing::warn!(issue = issue_number, branch, error = %e, "Failed to remove worktree");
                }
            }
        }
        let removed = self.store.delete(issue_number).await?;
        if removed {
            tracing::info!(issue = issue_number, "Cleaned up workflow session");
        }
        Ok(removed)
    }
}

fn terminal_error(session: &WorkflowSession) -> String {
    let base = match session.current_state {
        WorkflowState::MaxIterationsReached => format!(
            "maximum iterations reached ({}/{})",
            session.iteration_count, session.max_iterations
        ),
        WorkflowState::NeedsHumanIntervention => "needs human intervention".to_string(),
        state => format!("workflow ended in {state}"),
    };
    match session.last_error() {
        Some(last) => format!("{base}; last error: {}", last.message),
        None => base,
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::testing::FakeWorktrees;
    use super::*;
    use crate::agent::mock::MockAgent;
    use crate::agent::{AgentProvider, ImplementationResult, ReviewDecision, ValidationResult};
    use crate::platform::fake::FakePlatform;
    use crate::store::MemorySessionStore;

    struct Harness {
        platform: Arc<FakePlatform>,
        agent: Arc<MockAgent>,
        store: Arc<MemorySessionStore>,
        worktrees: Arc<FakeWorktrees>,
    }

    impl Harness {
        fn new(issue: u64) -> Self {
            Self::with_worktrees(issue, FakeWorktrees::default())
        }

        fn with_worktrees(issue: u64, worktrees: FakeWorktrees) -> Self {
            Self {
                platform: Arc::new(FakePlatform::with_issue(issue, "Add retries", "Retry failed uploads")),
                agent: Arc::new(MockAgent::new("mock")),
                store: Arc::new(MemorySessionStore::new()),
                worktrees: Arc::new(worktrees),
            }
        }

        fn engine(&self) -> WorkflowEngine {
            let mut agents = AgentSelector::new();
            agents.register(Arc::clone(&self.agent) as Arc<dyn AgentProvider>);
            WorkflowEngine::new(
                Arc::clone(&self.platform) as Arc<dyn Platform>,
                Arc::new(agents),
                Arc::clone(&self.store) as Arc<dyn SessionStore>,
                Arc::clone(&self.worktrees) as Arc<dyn WorktreeProvider>,
                EngineSettings {
                    max_iterations: 3,
                    validated_labels: vec!["validated".to_string()],
                    review_sources: vec!["mock".to_string()],
                    primary_agent: "mock".to_string(),
                    project: ProjectContext {
                        name: "widgets".to_string(),
                        repository: "acme/widgets".to_string(),
                        base_branch: "main".to_string(),
                    },
                    repo_path: std::env::temp_dir(),
                },
            )
        }
    }

    struct CountingConfirmer {
        allow: u32,
        asked: AtomicU32,
    }

    #[async_trait]
    impl StageConfirmer for CountingConfirmer {
        async fn confirm(&self, _issue: u64, _completed: Stage, _next: WorkflowState) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst) < self.allow
        }
    }

    #[tokio::test]
    async fn test_valid_issue_is_labelled_and_advances() {
        let h = Harness::new(42);
        h.agent.script_validation(Ok(MockAgent::validation(ValidationResult::Valid, "clear scope")));
        let confirmer = Arc::new(CountingConfirmer { allow: 0, asked: AtomicU32::new(0) });
        let engine = h.engine().with_confirmer(confirmer);

        let result = engine.process_issue(42, false, false).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.current_state, WorkflowState::Validated);
        assert_eq!(result.stages_completed, vec!["validation"]);
        assert_eq!(h.platform.labels_for(42), vec!["validated"]);

        let session = h.store.load(42).await.unwrap().unwrap();
        assert_eq!(session.current_state, WorkflowState::Validated);
        assert_eq!(session.history[0].from, WorkflowState::Pending);
    }

    #[tokio::test]
    async fn test_happy_path_ends_ready_for_human() {
        let h = Harness::new(7);
        h.agent
            .script_implementation(Ok(MockAgent::implementation(ImplementationResult::Success, &["src/upload.rs"])));

        let result = h.engine().process_issue(7, true, false).await.unwrap();

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.current_state, WorkflowState::ReadyForHuman);
        assert_eq!(
            result.stages_completed,
            vec!["validation", "worktree_creation", "implementation", "review", "finalization"]
        );
        assert_eq!(result.iteration_count, 1);
        assert_eq!(result.pull_request, Some(100));
        assert_eq!(h.worktrees.created.lock().unwrap().as_slice(), ["issue-7"]);
        assert_eq!(h.worktrees.commits.lock().unwrap().len(), 1);
        assert_eq!(*h.worktrees.pushes.lock().unwrap(), 1);

        let pr = h.platform.pull_requests.lock().unwrap()[0].clone();
        assert_eq!(pr.title, "Fix issue #7: Add retries");
        assert!(pr.body.contains("Closes #7"));
    }

    #[tokio::test]
    async fn test_review_loop_stops_at_max_iterations() {
        let h = Harness::new(9);
        for _ in 0..3 {
            h.agent.script_review(Ok(h.agent.review(ReviewDecision::RequestChanges)));
        }

        let result = h.engine().process_issue(9, true, false).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.current_state, WorkflowState::MaxIterationsReached);
        assert_eq!(result.iteration_count, 3);
        assert!(result.error.unwrap().starts_with("maximum iterations reached (3/3)"));
        assert_eq!(h.agent.implementation_calls().len(), 3);
        // One PR, reused across iterations.
        assert_eq!(*h.platform.created_pull_requests.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fix_stage_at_bound_terminates() {
        let h = Harness::new(11);
        let mut session = WorkflowSession::new(11, 3);
        session.current_state = WorkflowState::NeedsFixes;
        session.iteration_count = 3;
        h.store.save(&session).await.unwrap();

        let result = h.engine().process_issue(11, true, false).await.unwrap();

        assert_eq!(result.current_state, WorkflowState::MaxIterationsReached);
        assert_eq!(result.stages_completed, vec!["fix_implementation"]);
        assert!(h.agent.implementation_calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_stage_is_resumable() {
        let h = Harness::new(12);
        h.agent
            .script_implementation(Ok(MockAgent::implementation(ImplementationResult::Failed, &[])));
        let engine = h.engine();

        let first = engine.process_issue(12, true, false).await.unwrap();
        assert!(!first.success);
        assert_eq!(first.current_state, WorkflowState::Implementing);
        assert_eq!(first.iteration_count, 0);

        let stored = h.store.load(12).await.unwrap().unwrap();
        assert_eq!(stored.last_error().unwrap().stage, "implementation");

        let second = engine.process_issue(12, true, false).await.unwrap();
        assert!(second.success);
        assert_eq!(second.current_state, WorkflowState::ReadyForHuman);
        // Validation ran once across both invocations.
        let validations = second.stages_completed.iter().filter(|s| *s == "validation").count();
        assert_eq!(validations, 1);
        assert_eq!(h.worktrees.created.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_last_iteration_ends_at_max_iterations() {
        let h = Harness::new(16);
        h.agent
            .script_implementation(Ok(MockAgent::implementation(ImplementationResult::Success, &["src/a.rs"])))
            .script_implementation(Ok(MockAgent::implementation(ImplementationResult::Success, &["src/a.rs"])))
            .script_implementation(Ok(MockAgent::implementation(ImplementationResult::Failed, &[])));
        for _ in 0..3 {
            h.agent.script_review(Ok(h.agent.review(ReviewDecision::RequestChanges)));
        }
        let engine = h.engine();

        let first = engine.process_issue(16, true, false).await.unwrap();
        assert!(!first.success);
        assert_eq!(first.current_state, WorkflowState::Implementing);
        assert_eq!(first.iteration_count, 2);
        let calls = h.agent.implementation_calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2].constraints.current_iteration, 2);
        let stored = h.store.load(16).await.unwrap().unwrap();
        assert_eq!(stored.last_error().unwrap().stage, "implementation");

        // The retry spends the last iteration, so the fix gate closes.
        let second = engine.process_issue(16, true, false).await.unwrap();
        assert!(!second.success);
        assert_eq!(second.current_state, WorkflowState::MaxIterationsReached);
        assert_eq!(second.iteration_count, 3);
        assert_eq!(second.stages_completed.last().map(String::as_str), Some("fix_implementation"));
        assert_eq!(h.agent.implementation_calls().len(), 4);

        let third = engine.process_issue(16, true, false).await.unwrap();
        assert_eq!(third.current_state, WorkflowState::MaxIterationsReached);
        assert_eq!(h.agent.implementation_calls().len(), 4);
    }

    #[tokio::test]
    async fn test_clarification_posts_questions_and_stays_pending() {
        let h = Harness::new(13);
        let mut response = MockAgent::validation(ValidationResult::NeedsClarification, "unclear");
        response.clarifications = vec!["Which endpoint?".to_string(), "What timeout?".to_string()];
        h.agent.script_validation(Ok(response));

        let result = h.engine().process_issue(13, true, false).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.current_state, WorkflowState::Pending);
        let comments = h.platform.comments_for(13);
        assert_eq!(comments.len(), 1);
        assert!(comments[0].contains("- Which endpoint?"));
        assert!(comments[0].contains("- What timeout?"));
    }

    #[tokio::test]
    async fn test_needs_human_validation_is_terminal() {
        let h = Harness::new(14);
        h.agent
            .script_validation(Ok(MockAgent::validation(ValidationResult::NeedsHuman, "architecture decision")));

        let result = h.engine().process_issue(14, true, false).await.unwrap();

        assert_eq!(result.current_state, WorkflowState::NeedsHumanIntervention);
        assert_eq!(result.error.as_deref(), Some("needs human intervention"));
    }

    #[tokio::test]
    async fn test_dry_run_persists_nothing() {
        let h = Harness::new(15);

        let result = h.engine().process_issue(15, true, true).await.unwrap();

        assert!(result.success);
        assert_eq!(result.current_state, WorkflowState::ReadyForHuman);
        assert!(h.store.load(15).await.unwrap().is_none());
        assert!(h.platform.labels_for(15).is_empty());
        assert!(h.agent.implementation_calls().is_empty());
        assert!(h.worktrees.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_existing_pull_request_is_reused() {
        let h = Harness::new(16);
        h.platform.add_pull_request(55, "issue-16", "opened earlier");

        let result = h.engine().process_issue(16, true, false).await.unwrap();

        assert_eq!(result.pull_request, Some(55));
        assert_eq!(*h.platform.created_pull_requests.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_push_failure_fails_review_stage() {
        let worktrees = FakeWorktrees {
            fail_push: true,
            ..FakeWorktrees::default()
        };
        let h = Harness::with_worktrees(17, worktrees);

        let result = h.engine().process_issue(17, true, false).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.current_state, WorkflowState::Implemented);
        assert!(result.error.unwrap().contains("remote rejected"));
    }

    #[tokio::test]
    async fn test_status_and_cleanup() {
        let h = Harness::new(18);
        let engine = h.engine();
        engine.process_issue(18, true, false).await.unwrap();

        let status = engine.workflow_status(18).await.unwrap().unwrap();
        assert_eq!(status.state, WorkflowState::ReadyForHuman);
        assert_eq!(status.branch.as_deref(), Some("issue-18"));
        assert_eq!(status.title, "Add retries");

        assert!(engine.cleanup_workflow(18).await.unwrap());
        assert!(engine.workflow_status(18).await.unwrap().is_none());
        assert_eq!(h.worktrees.removed.lock().unwrap().as_slice(), ["issue-18"]);
        assert!(!engine.cleanup_workflow(18).await.unwrap());
    }
}
