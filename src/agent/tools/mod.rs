pub mod ask_clarification;
pub mod delete_file;
pub mod list_directory;
pub mod read_file;
pub mod search_code;
pub mod write_file;

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::agent::claude::ToolDefinition;
use crate::config::ToolsConfig;
use crate::error::Result;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn definition(&self) -> ToolDefinition;
    async fn execute(&self, workspace_root: &Path, input: serde_json::Value) -> Result<ToolOutput>;
}

pub enum ToolOutput {
    /// Normal text result returned to the model.
    Success(String),
    /// Error result returned to the model (the agent can recover).
    Error(String),
    /// The agent needs human input before it can continue.
    ClarificationNeeded(String),
}

/// Relative paths written or deleted during one agent run.
#[derive(Clone, Default)]
pub struct ChangeTracker {
    paths: Arc<Mutex<BTreeSet<String>>>,
}

impl ChangeTracker {
    pub fn record(&self, path: &str) {
        let normalized = path.trim_start_matches("./").to_string();
        match self.paths.lock() {
            Ok(mut paths) => {
                paths.insert(normalized);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(normalized);
            }
        }
    }

    pub fn paths(&self) -> Vec<String> {
        match self.paths.lock() {
            Ok(paths) => paths.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }
}

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Exploration tools only; used for validation and review.
    pub fn read_only(limits: &ToolsConfig) -> Self {
        Self {
            tools: vec![
                Box::new(read_file::ReadFileTool::new(limits.max_file_size_bytes)),
                Box::new(list_directory::ListDirectoryTool),
                Box::new(search_code::SearchCodeTool::new(limits.max_search_results)),
            ],
        }
    }

    /// Exploration plus editing; every write is recorded in `tracker`.
    pub fn editing(limits: &ToolsConfig, tracker: ChangeTracker) -> Self {
        let mut registry = Self::read_only(limits);
        registry.tools.push(Box::new(write_file::WriteFileTool::new(tracker.clone())));
        registry.tools.push(Box::new(delete_file::DeleteFileTool::new(tracker)));
        registry.tools.push(Box::new(ask_clarification::AskClarificationTool));
        registry
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }
}

/// Extract a required string parameter or produce a tool error for the model.
pub(crate) fn string_param<'a>(
    input: &'a serde_json::Value,
    key: &str,
) -> std::result::Result<&'a str, ToolOutput> {
    input[key]
        .as_str()
        .ok_or_else(|| ToolOutput::Error(format!("Missing '{key}' parameter")))
}

/// Join `requested` onto `root`, refusing anything that escapes it.
///
/// Works lexically so paths of files that do not exist yet can be checked.
pub(crate) fn resolve_in_workspace(
    root: &Path,
    requested: &str,
) -> std::result::Result<PathBuf, ToolOutput> {
    let requested_path = Path::new(requested);
    if requested_path.is_absolute() {
        return Err(ToolOutput::Error(format!(
            "Path must be relative to the repository root: {requested}"
        )));
    }

    let mut depth: usize = 0;
    for component in requested_path.components() {
        match component {
            Component::Normal(part) => {
                if part == ".git" {
                    return Err(ToolOutput::Error("The .git directory is off limits".to_string()));
                }
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    ToolOutput::Error(format!("Path escapes the workspace: {requested}"))
                })?;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ToolOutput::Error(format!("Invalid path: {requested}")));
            }
        }
    }

    Ok(root.join(requested_path))
}
