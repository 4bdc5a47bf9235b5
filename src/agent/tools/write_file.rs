use std::path::Path;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::claude::ToolDefinition;
use crate::agent::tools::{resolve_in_workspace, string_param, ChangeTracker, Tool, ToolOutput};
use crate::error::Result;

/// Creates or overwrites a file and records it as modified.
pub struct WriteFileTool {
    tracker: ChangeTracker,
}

impl WriteFileTool {
    pub fn new(tracker: ChangeTracker) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "Write the complete content of a file, creating it and its parent directories if needed.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path relative to the repository root" },
                    "content": { "type": "string", "description": "The full new file content" }
                },
                "required": ["path", "content"]
            }),
        }
    }

    async fn execute(&self, workspace_root: &Path, input: serde_json::Value) -> Result<ToolOutput> {
        let (path, content) = match (string_param(&input, "path"), string_param(&input, "content")) {
            (Ok(p), Ok(c)) => (p, c),
            (Err(e), _) | (_, Err(e)) => return Ok(e),
        };
        let full_path = match resolve_in_workspace(workspace_root, path) {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let existed = full_path.exists();

        match tokio::fs::write(&full_path, content).await {
            Ok(()) => {
                self.tracker.record(path);
                let verb = if existed { "Updated" } else { "Created" };
                Ok(ToolOutput::Success(format!("{verb} {path}")))
            }
            Err(e) => Ok(ToolOutput::Error(format!("Failed to write {path}: {e}"))),
        }
    }
}
