use std::path::PathBuf;
use std::sync::Arc;

use crate::agent::claude_agent::ClaudeAgent;
use crate::agent::mock::MockAgent;
use crate::agent::selector::AgentSelector;
use crate::agent::AgentProvider;
use crate::autofix::{
    AutoFixEngine, CiFailureDetector, FeedbackDetector, PullRequestTodoDetector, ReviewFeedbackDetector,
};
use crate::config::DevflowConfig;
use crate::error::Result;
use crate::platform::github::GitHubPlatform;
use crate::platform::Platform;
use crate::store::{FileSessionStore, SessionStore};
use crate::workflow::{EngineSettings, WorkflowEngine};
use crate::workspace::{GitFixWorkspace, WorkspaceManager, WorktreeProvider};

/// Everything a command or the server needs, wired from one config.
pub struct Services {
    pub config: DevflowConfig,
    pub platform: Arc<dyn Platform>,
    pub agents: Arc<AgentSelector>,
    pub store: Arc<FileSessionStore>,
    pub worktrees: Arc<WorkspaceManager>,
    pub engine: WorkflowEngine,
}

impl Services {
    pub fn from_config(config: DevflowConfig) -> Result<Self> {
        let platform: Arc<dyn Platform> = Arc::new(GitHubPlatform::new(&config.github, &config.project)?);
        let agents = Arc::new(build_agents(&config)?);
        let store = Arc::new(FileSessionStore::new(&config.workflow.state_dir));
        let worktrees = Arc::new(WorkspaceManager::new(
            &config.project.repo_path,
            &config.workspace.base_dir,
            Arc::clone(&platform),
        ));
        let engine = WorkflowEngine::new(
            Arc::clone(&platform),
            Arc::clone(&agents),
            Arc::clone(&store) as Arc<dyn SessionStore>,
            Arc::clone(&worktrees) as Arc<dyn WorktreeProvider>,
            EngineSettings::from_config(&config),
        );

        tracing::info!(
            repository = %config.project.repository(),
            agents = ?agents.names(),
            state_dir = %config.workflow.state_dir.display(),
            "Services ready"
        );

        Ok(Self {
            config,
            platform,
            agents,
            store,
            worktrees,
            engine,
        })
    }

    /// An auto-fix engine with every detector. `working_dir` pins the checkout.
    pub fn autofix_engine(&self, working_dir: Option<PathBuf>) -> AutoFixEngine {
        let mut workspace = GitFixWorkspace::new(
            Arc::clone(&self.worktrees),
            Arc::clone(&self.store) as Arc<dyn SessionStore>,
        );
        if let Some(dir) = working_dir {
            workspace = workspace.pinned_to(dir);
        }
        let detectors: Vec<Arc<dyn FeedbackDetector>> = vec![
            Arc::new(CiFailureDetector),
            Arc::new(ReviewFeedbackDetector),
            Arc::new(PullRequestTodoDetector),
        ];
        AutoFixEngine::new(
            Arc::clone(&self.platform),
            Arc::clone(&self.agents),
            detectors,
            Arc::new(workspace),
            EngineSettings::from_config(&self.config).project,
            &self.config.agents.primary,
        )
    }
}

/// Register the providers the config refers to. `mock` is always available.
pub fn build_agents(config: &DevflowConfig) -> Result<AgentSelector> {
    let mut selector = AgentSelector::new();
    let wants_claude = config.agents.primary == "claude"
        || config.agents.review_sources.iter().any(|s| s == "claude");
    if wants_claude {
        selector.register(Arc::new(ClaudeAgent::new(&config.claude, &config.tools)?) as Arc<dyn AgentProvider>);
    }
    selector.register(Arc::new(MockAgent::new("mock")));
    Ok(selector)
}
