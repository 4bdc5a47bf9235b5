use std::sync::Arc;

use crate::agent::{AgentCapability, AgentProvider};
use crate::error::{AppError, Result};

/// Registered agent pool.
#[derive(Default, Clone)]
pub struct AgentSelector {
    agents: Vec<Arc<dyn AgentProvider>>,
}

impl AgentSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent: Arc<dyn AgentProvider>) {
        tracing::debug!(agent = agent.name(), "Registering agent");
        self.agents.push(agent);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentProvider>> {
        self.agents.iter().find(|a| a.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.name()).collect()
    }

    /// Pick an agent with `capability`, honouring `preferences` in order and
    /// falling back to registration order.
    pub fn select(
        &self,
        capability: AgentCapability,
        preferences: &[String],
    ) -> Result<Arc<dyn AgentProvider>> {
        preferences
            .iter()
            .filter_map(|name| self.get(name))
            .find(|agent| agent.has_capability(capability))
            .or_else(|| {
                self.agents
                    .iter()
                    .find(|agent| agent.has_capability(capability))
                    .cloned()
            })
            .ok_or_else(|| AppError::Agent(format!("No agent available with capability {capability:?}")))
    }

    /// Resolve configured review sources to review-capable agents.
    pub fn review_agents(&self, sources: &[String]) -> Result<Vec<Arc<dyn AgentProvider>>> {
        let mut reviewers: Vec<Arc<dyn AgentProvider>> = Vec::new();
        for source in sources {
            match self.get(source) {
                Some(agent) if agent.has_capability(AgentCapability::CodeReview) => {
                    if !reviewers.iter().any(|r| r.name() == agent.name()) {
                        reviewers.push(agent);
                    }
                }
                Some(_) => {
                    tracing::warn!(agent = %source, "Review source cannot review code, skipping")
                }
                None => tracing::warn!(agent = %source, "Unknown review source, skipping"),
            }
        }

        if reviewers.is_empty() {
            return Err(AppError::Agent(
                "No review-capable agents configured".to_string(),
            ));
        }
        Ok(reviewers)
    }
}
