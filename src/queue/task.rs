/// Work the serve-mode processor runs, one task at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Drive an issue's workflow session (new or resumed) unattended.
    ProcessIssue { issue_number: u64 },
    /// Start tracking a pull request in the continuous monitor.
    MonitorPullRequest { pr_number: u64 },
}

impl Task {
    pub fn description(&self) -> String {
        match self {
            Task::ProcessIssue { issue_number } => format!("Process issue #{issue_number}"),
            Task::MonitorPullRequest { pr_number } => format!("Monitor PR #{pr_number}"),
        }
    }

    /// The issue this task drives, if any.
    pub fn issue_number(&self) -> Option<u64> {
        match self {
            Task::ProcessIssue { issue_number } => Some(*issue_number),
            Task::MonitorPullRequest { .. } => None,
        }
    }
}
