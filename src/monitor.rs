//! Polling loop that keeps a pull request moving until CI is green.
//!
//! Each tracked PR gets a bounded number of single-iteration auto-fix
//! attempts; after that a human is asked to take over.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::autofix::{AutoFixEngine, AutoFixResult};
use crate::config::MonitorConfig;
use crate::platform::types::{CheckConclusion, CheckRun, CheckStatus};
use crate::platform::Platform;

pub const READY_LABEL: &str = "ready-for-human-review";
pub const NEEDS_HUMAN_LABEL: &str = "needs-human-intervention";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    Passing,
    Failing,
    Pending,
    Unknown,
}

impl CiStatus {
    /// Passing needs every run completed as success, skipped or neutral.
    /// A cancelled run never finished, so it keeps the PR pending.
    pub fn from_check_runs(runs: &[CheckRun]) -> Self {
        if runs.is_empty() {
            CiStatus::Unknown
        } else if runs.iter().any(CheckRun::failed) {
            CiStatus::Failing
        } else if runs.iter().all(passed) {
            CiStatus::Passing
        } else {
            CiStatus::Pending
        }
    }
}

fn passed(run: &CheckRun) -> bool {
    run.status == CheckStatus::Completed
        && matches!(
            run.conclusion,
            Some(CheckConclusion::Success | CheckConclusion::Skipped | CheckConclusion::Neutral)
        )
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitoringStatus {
    pub pr_number: u64,
    pub last_check: Option<DateTime<Utc>>,
    pub ci_status: CiStatus,
    pub auto_fix_attempts: u32,
    pub ready_for_human: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PrOutcome {
    ReadyForHuman,
    AutoFixApplied { attempt: u32, fixes: usize },
    AutoFixFailed { attempt: u32, error: String },
    NeedsHumanIntervention { attempts: u32 },
    Waiting { ci_status: CiStatus },
    Error { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u32,
    pub outcomes: BTreeMap<u64, PrOutcome>,
}

/// Tracked PRs live behind a short-lived lock that is never held across
/// an await, so registering a PR never waits on a running cycle.
pub struct ContinuousMonitor {
    autofix: Arc<AutoFixEngine>,
    platform: Arc<dyn Platform>,
    interval: Duration,
    max_attempts: u32,
    tracked: Mutex<BTreeMap<u64, MonitoringStatus>>,
}

enum Action {
    Release,
    Escalate(u32),
    Fix(u32),
    Wait,
}

impl ContinuousMonitor {
    pub fn new(autofix: Arc<AutoFixEngine>, config: &MonitorConfig) -> Self {
        let platform = Arc::clone(autofix.platform());
        Self {
            autofix,
            platform,
            interval: Duration::from_secs(config.check_interval_secs),
            max_attempts: config.max_attempts,
            tracked: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn lock_tracked(&self) -> MutexGuard<'_, BTreeMap<u64, MonitoringStatus>> {
        self.tracked.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of every tracked PR.
    pub fn tracked(&self) -> Vec<MonitoringStatus> {
        self.lock_tracked().values().cloned().collect()
    }

    pub fn is_tracking(&self, pr_number: u64) -> bool {
        self.lock_tracked().contains_key(&pr_number)
    }

    /// Start watching `pr_number`. Re-registering keeps the existing attempt count.
    pub async fn start_monitoring(&self, pr_number: u64) {
        {
            let mut tracked = self.lock_tracked();
            if tracked.contains_key(&pr_number) {
                tracing::debug!(pr = pr_number, "Already monitoring");
                return;
            }
            tracked.insert(
                pr_number,
                MonitoringStatus {
                    pr_number,
                    last_check: None,
                    ci_status: CiStatus::Pending,
                    auto_fix_attempts: 0,
                    ready_for_human: false,
                },
            );
        }
        tracing::info!(pr = pr_number, "Starting continuous monitoring");
        let body = format!(
            "DevFlow is monitoring this pull request. Failing CI will be auto-fixed \
             (up to {} attempts) and the PR labelled `{READY_LABEL}` once every check passes.",
            self.max_attempts
        );
        self.comment(pr_number, &body).await;
    }

    /// Poll every tracked PR up to `max_cycles` times, sleeping between cycles.
    pub async fn run_monitoring_cycle(&self, max_cycles: u32) -> Vec<CycleReport> {
        let mut reports = Vec::new();

        for cycle in 1..=max_cycles {
            let prs: Vec<u64> = self.lock_tracked().keys().copied().collect();
            if prs.is_empty() {
                break;
            }
            tracing::info!(cycle, max_cycles, prs = prs.len(), "Monitoring cycle");

            let mut outcomes = BTreeMap::new();
            for pr_number in prs {
                let outcome = self.check_pull_request(pr_number).await;
                tracing::info!(pr = pr_number, outcome = ?outcome, "Checked pull request");
                outcomes.insert(pr_number, outcome);
            }
            reports.push(CycleReport { cycle, outcomes });

            if self.lock_tracked().is_empty() {
                tracing::info!("No pull requests left to monitor");
                break;
            }
            if cycle < max_cycles {
                tokio::time::sleep(self.interval).await;
            }
        }
        reports
    }

    async fn check_pull_request(&self, pr_number: u64) -> PrOutcome {
        let runs = match self.platform.list_check_runs(pr_number).await {
            Ok(runs) => runs,
            Err(e) => {
                tracing::warn!(pr = pr_number, error = %e, "Failed to read CI status");
                return PrOutcome::Error { error: e.to_string() };
            }
        };
        let ci_status = CiStatus::from_check_runs(&runs);

        let action = {
            let mut tracked = self.lock_tracked();
            let Some(status) = tracked.get_mut(&pr_number) else {
                return PrOutcome::Error {
                    error: format!("PR #{pr_number} is not monitored"),
                };
            };
            status.ci_status = ci_status;
            status.last_check = Some(Utc::now());
            let attempts = status.auto_fix_attempts;

            match ci_status {
                CiStatus::Passing => {
                    status.ready_for_human = true;
                    tracked.remove(&pr_number);
                    Action::Release
                }
                CiStatus::Failing if attempts >= self.max_attempts => {
                    tracked.remove(&pr_number);
                    Action::Escalate(attempts)
                }
                CiStatus::Failing => {
                    status.auto_fix_attempts = attempts + 1;
                    Action::Fix(attempts + 1)
                }
                CiStatus::Pending | CiStatus::Unknown => Action::Wait,
            }
        };

        match action {
            Action::Release => {
                self.comment(
                    pr_number,
                    "All CI checks pass. This pull request is ready for human review and merge.",
                )
                .await;
                self.label(pr_number, READY_LABEL).await;
                PrOutcome::ReadyForHuman
            }
            Action::Escalate(attempts) => {
                let body = format!(
                    "CI is still failing after {attempts} auto-fix attempt(s). \
                     Please review the CI logs and push a manual fix."
                );
                self.comment(pr_number, &body).await;
                self.label(pr_number, NEEDS_HUMAN_LABEL).await;
                PrOutcome::NeedsHumanIntervention { attempts }
            }
            Action::Fix(attempt) => self.auto_fix(pr_number, attempt).await,
            Action::Wait => PrOutcome::Waiting { ci_status },
        }
    }

    async fn auto_fix(&self, pr_number: u64, attempt: u32) -> PrOutcome {
        tracing::info!(pr = pr_number, attempt, "Applying auto-fix");
        match self.autofix.run_auto_fix_cycle(pr_number, 1).await {
            Ok(result) if !result.fixes_applied.is_empty() && result.validation_passed => {
                self.comment(pr_number, &fix_summary(&result, attempt, self.max_attempts))
                    .await;
                PrOutcome::AutoFixApplied {
                    attempt,
                    fixes: result.fixes_applied.len(),
                }
            }
            Ok(result) => PrOutcome::AutoFixFailed {
                attempt,
                error: result
                    .error
                    .unwrap_or_else(|| "no fixes were applied".to_string()),
            },
            Err(e) => {
                tracing::error!(pr = pr_number, attempt, error = %e, "Auto-fix cycle errored");
                PrOutcome::AutoFixFailed {
                    attempt,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn comment(&self, pr_number: u64, body: &str) {
        if let Err(e) = self.platform.add_issue_comment(pr_number, body).await {
            tracing::warn!(pr = pr_number, error = %e, "Failed to post monitoring comment");
        }
    }

    async fn label(&self, pr_number: u64, label: &str) {
        if let Err(e) = self
            .platform
            .add_labels_to_issue(pr_number, &[label.to_string()])
            .await
        {
            tracing::warn!(pr = pr_number, label, error = %e, "Failed to add label");
        }
    }
}

fn fix_summary(result: &AutoFixResult, attempt: u32, max_attempts: u32) -> String {
    let fixes = result
        .fixes_applied
        .iter()
        .map(|f| format!("- {f}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Auto-fix attempt {attempt}/{max_attempts} applied:\n\n{fixes}\n\n\
         Files modified: {}. Waiting for CI to re-run.",
        result.files_modified.len()
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::agent::mock::MockAgent;
    use crate::agent::selector::AgentSelector;
    use crate::agent::{ImplementationResult, ProjectContext};
    use crate::autofix::engine::fake::FakeFixWorkspace;
    use crate::autofix::{FeedbackDetector, FeedbackItem, FeedbackType, FixPriority};
    use crate::error::Result;
    use crate::platform::fake::FakePlatform;
    use crate::platform::types::CheckConclusion;

    struct LintDetector {
        calls: AtomicU32,
    }

    #[async_trait]
    impl FeedbackDetector for LintDetector {
        fn name(&self) -> &str {
            "lint"
        }

        async fn detect(&self, _platform: &dyn Platform, _pr_number: u64) -> Result<Vec<FeedbackItem>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![FeedbackItem::new(
                FeedbackType::CiFailure,
                FixPriority::Medium,
                "Linting Error: E501",
                "line too long",
            )
            .at("src/a.py", Some(3))])
        }
    }

    fn run(id: u64, status: CheckStatus, conclusion: Option<CheckConclusion>) -> CheckRun {
        CheckRun {
            id,
            name: format!("job-{id}"),
            status,
            conclusion,
            output: String::new(),
        }
    }

    /// Holds `detect` open until released, so a cycle can be caught mid-fix.
    #[derive(Default)]
    struct GatedDetector {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl FeedbackDetector for GatedDetector {
        fn name(&self) -> &str {
            "gated"
        }

        async fn detect(&self, _platform: &dyn Platform, _pr_number: u64) -> Result<Vec<FeedbackItem>> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(vec![])
        }
    }

    fn monitor(platform: Arc<FakePlatform>, agent: Arc<MockAgent>, root: &std::path::Path) -> ContinuousMonitor {
        let detectors: Vec<Arc<dyn FeedbackDetector>> = vec![Arc::new(LintDetector {
            calls: AtomicU32::new(0),
        })];
        monitor_with(platform, agent, detectors, root)
    }

    fn monitor_with(
        platform: Arc<FakePlatform>,
        agent: Arc<MockAgent>,
        detectors: Vec<Arc<dyn FeedbackDetector>>,
        root: &std::path::Path,
    ) -> ContinuousMonitor {
        let mut selector = AgentSelector::default();
        selector.register(agent);
        let engine = AutoFixEngine::new(
            platform,
            Arc::new(selector),
            detectors,
            Arc::new(FakeFixWorkspace::new(root)),
            ProjectContext {
                name: "widgets".to_string(),
                repository: "acme/widgets".to_string(),
                base_branch: "main".to_string(),
            },
            "mock",
        );
        ContinuousMonitor::new(Arc::new(engine), &MonitorConfig::default()).with_interval(Duration::ZERO)
    }

    fn root_with_file() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.py"), "x = 1\n").unwrap();
        dir
    }

    #[test]
    fn test_ci_status_from_check_runs() {
        use CheckStatus::*;
        assert_eq!(CiStatus::from_check_runs(&[]), CiStatus::Unknown);
        assert_eq!(
            CiStatus::from_check_runs(&[run(1, Completed, Some(CheckConclusion::Success))]),
            CiStatus::Passing
        );
        assert_eq!(
            CiStatus::from_check_runs(&[
                run(1, Completed, Some(CheckConclusion::Success)),
                run(2, InProgress, None),
            ]),
            CiStatus::Pending
        );
        assert_eq!(
            CiStatus::from_check_runs(&[
                run(1, InProgress, None),
                run(2, Completed, Some(CheckConclusion::Failure)),
            ]),
            CiStatus::Failing
        );
    }

    #[test]
    fn test_cancelled_run_keeps_ci_pending() {
        use CheckStatus::*;
        assert_eq!(
            CiStatus::from_check_runs(&[
                run(1, Completed, Some(CheckConclusion::Success)),
                run(2, Completed, Some(CheckConclusion::Cancelled)),
            ]),
            CiStatus::Pending
        );
        assert_eq!(
            CiStatus::from_check_runs(&[
                run(1, Completed, Some(CheckConclusion::Success)),
                run(2, Completed, Some(CheckConclusion::Skipped)),
                run(3, Completed, Some(CheckConclusion::Neutral)),
            ]),
            CiStatus::Passing
        );
    }

    #[tokio::test]
    async fn test_cancelled_run_does_not_release_pr() {
        let dir = root_with_file();
        let platform = Arc::new(FakePlatform::default());
        platform.set_check_runs(
            9,
            vec![
                run(1, CheckStatus::Completed, Some(CheckConclusion::Success)),
                run(2, CheckStatus::Completed, Some(CheckConclusion::Cancelled)),
            ],
        );
        let monitor = monitor(Arc::clone(&platform), Arc::new(MockAgent::new("mock")), dir.path());

        monitor.start_monitoring(9).await;
        let reports = monitor.run_monitoring_cycle(1).await;

        assert_eq!(
            reports[0].outcomes[&9],
            PrOutcome::Waiting {
                ci_status: CiStatus::Pending
            }
        );
        assert!(monitor.is_tracking(9));
        assert!(platform.labels_for(9).is_empty());
    }

    #[tokio::test]
    async fn test_passing_pr_is_released_with_label() {
        let dir = root_with_file();
        let platform = Arc::new(FakePlatform::default());
        platform.set_check_runs(5, vec![run(1, CheckStatus::Completed, Some(CheckConclusion::Success))]);
        let monitor = monitor(Arc::clone(&platform), Arc::new(MockAgent::new("mock")), dir.path());

        monitor.start_monitoring(5).await;
        let reports = monitor.run_monitoring_cycle(10).await;

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcomes[&5], PrOutcome::ReadyForHuman);
        assert!(!monitor.is_tracking(5));
        assert_eq!(platform.labels_for(5), vec![READY_LABEL]);
        // Start notice plus completion notice.
        assert_eq!(platform.comments_for(5).len(), 2);
    }

    #[tokio::test]
    async fn test_failing_pr_escalates_after_max_attempts() {
        let dir = root_with_file();
        let platform = Arc::new(FakePlatform::default());
        platform.set_check_runs(6, vec![run(1, CheckStatus::Completed, Some(CheckConclusion::Failure))]);
        let agent = Arc::new(MockAgent::new("mock"));
        for _ in 0..3 {
            agent.script_implementation(Ok(MockAgent::implementation(ImplementationResult::Success, &["src/a.py"])));
        }
        let monitor = monitor(Arc::clone(&platform), Arc::clone(&agent), dir.path());

        monitor.start_monitoring(6).await;
        let reports = monitor.run_monitoring_cycle(10).await;

        assert_eq!(reports.len(), 4);
        for (i, report) in reports.iter().take(3).enumerate() {
            assert_eq!(
                report.outcomes[&6],
                PrOutcome::AutoFixApplied {
                    attempt: i as u32 + 1,
                    fixes: 1
                }
            );
        }
        assert_eq!(reports[3].outcomes[&6], PrOutcome::NeedsHumanIntervention { attempts: 3 });
        assert!(!monitor.is_tracking(6));
        assert_eq!(platform.labels_for(6), vec![NEEDS_HUMAN_LABEL]);
        assert_eq!(agent.implementation_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_pending_pr_waits_until_cycles_run_out() {
        let dir = root_with_file();
        let platform = Arc::new(FakePlatform::default());
        platform.set_check_runs(7, vec![run(1, CheckStatus::Queued, None)]);
        let monitor = monitor(Arc::clone(&platform), Arc::new(MockAgent::new("mock")), dir.path());

        monitor.start_monitoring(7).await;
        let reports = monitor.run_monitoring_cycle(2).await;

        assert_eq!(reports.len(), 2);
        assert_eq!(
            reports[1].outcomes[&7],
            PrOutcome::Waiting {
                ci_status: CiStatus::Pending
            }
        );
        let status = monitor.tracked().pop().unwrap();
        assert_eq!(status.auto_fix_attempts, 0);
        assert!(status.last_check.is_some());
    }

    #[tokio::test]
    async fn test_start_monitoring_does_not_wait_for_running_fix() {
        let dir = root_with_file();
        let platform = Arc::new(FakePlatform::default());
        platform.set_check_runs(8, vec![run(1, CheckStatus::Completed, Some(CheckConclusion::Failure))]);
        let gate = Arc::new(GatedDetector::default());
        let monitor = Arc::new(monitor_with(
            Arc::clone(&platform),
            Arc::new(MockAgent::new("mock")),
            vec![Arc::clone(&gate) as Arc<dyn FeedbackDetector>],
            dir.path(),
        ));

        monitor.start_monitoring(8).await;
        let cycle = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            async move { monitor.run_monitoring_cycle(1).await }
        });
        gate.entered.notified().await;

        // The cycle is parked inside the auto-fix for PR 8.
        let registered = tokio::time::timeout(Duration::from_secs(1), monitor.start_monitoring(7)).await;
        assert!(registered.is_ok());
        assert!(monitor.is_tracking(7));
        assert_eq!(monitor.tracked().len(), 2);

        gate.release.notify_one();
        let reports = cycle.await.unwrap();
        assert!(matches!(reports[0].outcomes[&8], PrOutcome::AutoFixFailed { attempt: 1, .. }));
        assert!(!reports[0].outcomes.contains_key(&7));
    }

    #[tokio::test]
    async fn test_nothing_tracked_runs_no_cycles() {
        let dir = root_with_file();
        let monitor = monitor(Arc::new(FakePlatform::default()), Arc::new(MockAgent::new("mock")), dir.path());
        assert!(monitor.run_monitoring_cycle(5).await.is_empty());
    }
}
