use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::selector::AgentSelector;
use crate::agent::{
    ensure_confidence, AgentCapability, ImplementationConstraints, ImplementationContext,
    ProjectContext,
};
use crate::autofix::detect::FeedbackDetector;
use crate::autofix::group::{self, FixGroup};
use crate::autofix::{prioritize, AutoFixResult, FeedbackItem};
use crate::error::{AppError, Result};
use crate::platform::Platform;

/// Files an agent may touch in a single fix group.
const MAX_FILES_PER_FIX: usize = 10;

/// The checkout a pull request's fixes are written to and committed from.
#[async_trait]
pub trait FixWorkspace: Send + Sync {
    /// Working directory holding the PR's head branch.
    async fn root_for(&self, pr_number: u64) -> Result<PathBuf>;

    /// Stage exactly `files` and commit. Returns `false` when nothing changed.
    async fn commit(&self, root: &Path, files: &[String], message: &str) -> Result<bool>;

    async fn push(&self, root: &Path) -> Result<()>;
}

/// What one pass over the detected feedback produced.
#[derive(Debug, Default)]
struct FixPass {
    fixes_applied: Vec<String>,
    files_modified: BTreeSet<String>,
    fixed_items: Vec<FeedbackItem>,
    validation_errors: Vec<String>,
}

pub struct AutoFixEngine {
    platform: Arc<dyn Platform>,
    agents: Arc<AgentSelector>,
    detectors: Vec<Arc<dyn FeedbackDetector>>,
    workspace: Arc<dyn FixWorkspace>,
    project: ProjectContext,
    preferences: Vec<String>,
}

impl AutoFixEngine {
    pub fn new(
        platform: Arc<dyn Platform>,
        agents: Arc<AgentSelector>,
        detectors: Vec<Arc<dyn FeedbackDetector>>,
        workspace: Arc<dyn FixWorkspace>,
        project: ProjectContext,
        primary_agent: &str,
    ) -> Self {
        Self {
            platform,
            agents,
            detectors,
            workspace,
            project,
            preferences: vec![primary_agent.to_string()],
        }
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    /// Detect, fix, commit; repeat until the PR is clean or `max_iterations` runs out.
    pub async fn run_auto_fix_cycle(&self, pr_number: u64, max_iterations: u32) -> Result<AutoFixResult> {
        let root = self.workspace.root_for(pr_number).await?;
        let mut total = AutoFixResult::default();
        let mut files = BTreeSet::new();

        tracing::info!(pr = pr_number, max_iterations, root = %root.display(), "Starting auto-fix cycle");

        for iteration in 1..=max_iterations {
            tracing::info!(pr = pr_number, iteration, max_iterations, "Auto-fix iteration");

            let mut feedback = self.detect_feedback(pr_number).await;
            if feedback.is_empty() {
                tracing::info!(pr = pr_number, "No feedback left, auto-fix cycle complete");
                total.success = true;
                total.validation_passed = true;
                total.files_modified = files.into_iter().collect();
                if total.commit_message.is_empty() {
                    total.commit_message = group::commit_message(&[], &[], &[]);
                }
                return Ok(total);
            }

            prioritize(&mut feedback);
            let pass = self.apply_fixes(&root, &feedback, iteration, max_iterations).await;

            let pass_files: Vec<String> = pass.files_modified.iter().cloned().collect();
            let message = group::commit_message(&pass.fixes_applied, &pass.fixed_items, &pass_files);
            let pass_ok = !pass.fixes_applied.is_empty() && pass.validation_errors.is_empty();

            total.fixes_applied.extend(pass.fixes_applied.iter().cloned());
            files.extend(pass.files_modified.iter().cloned());
            total.commit_message = message.clone();
            total.validation_passed = pass.validation_errors.is_empty();

            if !pass_ok {
                let error = if pass.validation_errors.is_empty() {
                    "no fixes could be applied".to_string()
                } else {
                    pass.validation_errors.join("; ")
                };
                tracing::error!(pr = pr_number, iteration, error = %error, "Auto-fix pass failed");
                total.files_modified = files.into_iter().collect();
                total.error = Some(error);
                return Ok(total);
            }

            if let Err(e) = self.commit_and_push(&root, &pass_files, &message).await {
                tracing::error!(pr = pr_number, error = %e, "Failed to commit fixes");
                total.files_modified = files.into_iter().collect();
                total.error = Some(format!("failed to commit fixes: {e}"));
                return Ok(total);
            }
        }

        tracing::warn!(pr = pr_number, max_iterations, "Auto-fix hit iteration limit");
        total.success = false;
        total.files_modified = files.into_iter().collect();
        total.error = Some("max iterations reached".to_string());
        Ok(total)
    }

    /// Run every detector concurrently. A failing or panicking detector is skipped.
    pub async fn detect_feedback(&self, pr_number: u64) -> Vec<FeedbackItem> {
        let handles: Vec<_> = self
            .detectors
            .iter()
            .map(|detector| {
                let detector = Arc::clone(detector);
                let platform = Arc::clone(&self.platform);
                let name = detector.name().to_string();
                let handle = tokio::spawn(async move { detector.detect(platform.as_ref(), pr_number).await });
                (name, handle)
            })
            .collect();

        let mut items = Vec::new();
        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(found)) => items.extend(found),
                Ok(Err(e)) => {
                    tracing::error!(pr = pr_number, detector = %name, error = %e, "Detector failed");
                }
                Err(e) => {
                    tracing::error!(pr = pr_number, detector = %name, error = %e, "Detector panicked");
                }
            }
        }
        items
    }

    async fn apply_fixes(&self, root: &Path, feedback: &[FeedbackItem], iteration: u32, max_iterations: u32) -> FixPass {
        let mut pass = FixPass::default();

        for (fix_group, items) in group::group_feedback(feedback) {
            tracing::info!(group = fix_group.name(), count = items.len(), "Fixing group");

            match self.fix_group(root, fix_group, &items, iteration, max_iterations).await {
                Ok(changed) => {
                    for path in &changed {
                        if !root.join(path).exists() {
                            pass.validation_errors.push(format!("modified file not found: {path}"));
                        }
                    }
                    pass.fixes_applied.extend(items.iter().map(describe_fix));
                    pass.files_modified.extend(changed);
                    pass.fixed_items.extend(items);
                }
                Err(e) => {
                    tracing::warn!(group = fix_group.name(), error = %e, "Fix group failed, skipping");
                }
            }
        }
        pass
    }

    async fn fix_group(
        &self,
        root: &Path,
        fix_group: FixGroup,
        items: &[FeedbackItem],
        iteration: u32,
        max_iterations: u32,
    ) -> Result<Vec<String>> {
        let agent = self
            .agents
            .select(AgentCapability::CodeImplementation, &self.preferences)?;

        let context = ImplementationContext {
            issue: None,
            project: self.project.clone(),
            working_directory: root.to_path_buf(),
            instructions: Some(group::fix_instructions(fix_group, items)),
            previous_transcript: String::new(),
            constraints: ImplementationConstraints {
                current_iteration: iteration - 1,
                max_iterations,
                max_files: Some(MAX_FILES_PER_FIX),
            },
        };

        let response = agent.implement_changes(&context).await?;
        ensure_confidence(agent.name(), response.confidence)?;
        if !response.success {
            return Err(AppError::Agent(format!(
                "{} could not fix {}: {}",
                agent.name(),
                fix_group.name(),
                response.message
            )));
        }
        Ok(response.files_changed)
    }

    /// A push failure is logged only; the commit already holds the work.
    async fn commit_and_push(&self, root: &Path, files: &[String], message: &str) -> Result<()> {
        if files.is_empty() {
            tracing::info!("No files to commit");
            return Ok(());
        }
        if !self.workspace.commit(root, files, message).await? {
            tracing::info!("Working tree clean after staging, skipping commit");
            return Ok(());
        }
        if let Err(e) = self.workspace.push(root).await {
            tracing::warn!(error = %e, "Push failed after commit");
        }
        Ok(())
    }
}

fn describe_fix(item: &FeedbackItem) -> String {
    match item.location() {
        Some(location) => format!("Fixed {} ({location})", item.title),
        None => format!("Fixed {}", item.title),
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::fake::FakeFixWorkspace;
    use super::*;
    use crate::agent::mock::MockAgent;
    use crate::agent::ImplementationResult;
    use crate::autofix::{FeedbackType, FixPriority};
    use crate::platform::fake::FakePlatform;

    /// Returns its items for the first `rounds` calls, then nothing.
    struct FadingDetector {
        items: Vec<FeedbackItem>,
        rounds: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl FeedbackDetector for FadingDetector {
        fn name(&self) -> &str {
            "fading"
        }

        async fn detect(&self, _platform: &dyn Platform, _pr_number: u64) -> Result<Vec<FeedbackItem>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(if call < self.rounds { self.items.clone() } else { Vec::new() })
        }
    }

    struct BrokenDetector;

    #[async_trait]
    impl FeedbackDetector for BrokenDetector {
        fn name(&self) -> &str {
            "broken"
        }

        async fn detect(&self, _platform: &dyn Platform, _pr_number: u64) -> Result<Vec<FeedbackItem>> {
            Err(AppError::Platform("boom".to_string()))
        }
    }

    struct PanickingDetector;

    #[async_trait]
    impl FeedbackDetector for PanickingDetector {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn detect(&self, _platform: &dyn Platform, _pr_number: u64) -> Result<Vec<FeedbackItem>> {
            panic!("detector bug");
        }
    }

    fn lint_item() -> FeedbackItem {
        FeedbackItem::new(FeedbackType::CiFailure, FixPriority::Medium, "Linting Error: E501", "line too long")
            .at("src/a.py", Some(10))
    }

    fn fading(items: Vec<FeedbackItem>, rounds: u32) -> Arc<dyn FeedbackDetector> {
        Arc::new(FadingDetector {
            items,
            rounds,
            calls: AtomicU32::new(0),
        })
    }

    fn project() -> ProjectContext {
        ProjectContext {
            name: "widgets".to_string(),
            repository: "acme/widgets".to_string(),
            base_branch: "main".to_string(),
        }
    }

    fn engine(
        agent: Arc<MockAgent>,
        detectors: Vec<Arc<dyn FeedbackDetector>>,
        workspace: Arc<FakeFixWorkspace>,
    ) -> AutoFixEngine {
        let mut selector = AgentSelector::default();
        selector.register(agent);
        AutoFixEngine::new(
            Arc::new(FakePlatform::default()),
            Arc::new(selector),
            detectors,
            workspace,
            project(),
            "mock",
        )
    }

    fn workspace_with_file(dir: &Path) -> Arc<FakeFixWorkspace> {
        std::fs::create_dir_all(dir.join("src")).unwrap();
        std::fs::write(dir.join("src/a.py"), "x = 1\n").unwrap();
        Arc::new(FakeFixWorkspace::new(dir))
    }

    #[tokio::test]
    async fn test_clean_pr_returns_success_without_commit() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace_with_file(dir.path());
        let agent = Arc::new(MockAgent::new("mock"));
        let engine = engine(agent.clone(), vec![fading(vec![], 0)], workspace.clone());

        let result = engine.run_auto_fix_cycle(1, 3).await.unwrap();
        assert!(result.success);
        assert!(result.fixes_applied.is_empty());
        assert!(workspace.commits.lock().unwrap().is_empty());
        assert!(agent.implementation_calls().is_empty());
    }

    #[tokio::test]
    async fn test_fixes_commit_and_accumulate_until_clean() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace_with_file(dir.path());
        let agent = Arc::new(MockAgent::new("mock"));
        agent.script_implementation(Ok(MockAgent::implementation(ImplementationResult::Success, &["src/a.py"])));

        let engine = engine(agent.clone(), vec![fading(vec![lint_item()], 1)], workspace.clone());
        let result = engine.run_auto_fix_cycle(1, 3).await.unwrap();

        assert!(result.success);
        assert_eq!(result.fixes_applied, vec!["Fixed Linting Error: E501 (src/a.py:10)"]);
        assert_eq!(result.files_modified, vec!["src/a.py"]);
        assert!(result.commit_message.starts_with("fix(style): resolve 1 style issue\n"));

        let commits = workspace.commits.lock().unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].0, vec!["src/a.py"]);
        assert_eq!(*workspace.pushes.lock().unwrap(), 1);

        let calls = agent.implementation_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].issue.is_none());
        assert!(calls[0].instructions.as_deref().unwrap().contains("linting_errors"));
    }

    #[tokio::test]
    async fn test_push_failure_does_not_fail_the_cycle() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.py"), "").unwrap();
        let workspace = Arc::new(FakeFixWorkspace {
            fail_push: true,
            ..FakeFixWorkspace::new(dir.path())
        });
        let agent = Arc::new(MockAgent::new("mock"));
        agent.script_implementation(Ok(MockAgent::implementation(ImplementationResult::Success, &["src/a.py"])));

        let engine = engine(agent, vec![fading(vec![lint_item()], 1)], workspace.clone());
        let result = engine.run_auto_fix_cycle(1, 2).await.unwrap();

        assert!(result.success);
        assert_eq!(workspace.commits.lock().unwrap().len(), 1);
        assert_eq!(*workspace.pushes.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_file_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Arc::new(FakeFixWorkspace::new(dir.path()));
        let agent = Arc::new(MockAgent::new("mock"));
        agent.script_implementation(Ok(MockAgent::implementation(ImplementationResult::Success, &["src/gone.py"])));

        let engine = engine(agent, vec![fading(vec![lint_item()], 5)], workspace.clone());
        let result = engine.run_auto_fix_cycle(1, 3).await.unwrap();

        assert!(!result.success);
        assert!(!result.validation_passed);
        assert!(result.error.unwrap().contains("modified file not found: src/gone.py"));
        assert!(workspace.commits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_group_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace_with_file(dir.path());
        let agent = Arc::new(MockAgent::new("mock"));
        agent.script_implementation(Ok(MockAgent::implementation(ImplementationResult::Failed, &[])));
        agent.script_implementation(Ok(MockAgent::implementation(ImplementationResult::Success, &["src/a.py"])));

        let security = FeedbackItem::new(FeedbackType::ReviewFeedback, FixPriority::Critical, "Security Improvement", "");
        let engine = engine(agent, vec![fading(vec![lint_item(), security], 1)], workspace);
        let result = engine.run_auto_fix_cycle(1, 3).await.unwrap();

        assert!(result.success);
        assert_eq!(result.fixes_applied, vec!["Fixed Linting Error: E501 (src/a.py:10)"]);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_bounded_failure() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace_with_file(dir.path());
        let agent = Arc::new(MockAgent::new("mock"));
        for _ in 0..2 {
            agent.script_implementation(Ok(MockAgent::implementation(ImplementationResult::Success, &["src/a.py"])));
        }

        let engine = engine(agent, vec![fading(vec![lint_item()], 10)], workspace.clone());
        let result = engine.run_auto_fix_cycle(1, 2).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("max iterations reached"));
        assert_eq!(result.fixes_applied.len(), 2);
        assert_eq!(result.files_modified, vec!["src/a.py"]);
        assert_eq!(workspace.commits.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_detector_failures_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace_with_file(dir.path());
        let detectors: Vec<Arc<dyn FeedbackDetector>> = vec![
            Arc::new(BrokenDetector),
            Arc::new(PanickingDetector),
            fading(vec![lint_item()], 1),
        ];
        let engine = engine(Arc::new(MockAgent::new("mock")), detectors, workspace);

        let items = engine.detect_feedback(1).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Linting Error: E501");
    }
}
