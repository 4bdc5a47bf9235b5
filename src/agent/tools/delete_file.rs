use std::path::Path;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::claude::ToolDefinition;
use crate::agent::tools::{resolve_in_workspace, string_param, ChangeTracker, Tool, ToolOutput};
use crate::error::Result;

pub struct DeleteFileTool {
    tracker: ChangeTracker,
}

impl DeleteFileTool {
    pub fn new(tracker: ChangeTracker) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "Delete a file from the repository.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path relative to the repository root" }
                },
                "required": ["path"]
            }),
        }
    }

    async fn execute(&self, workspace_root: &Path, input: serde_json::Value) -> Result<ToolOutput> {
        let path = match string_param(&input, "path") {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };
        let full_path = match resolve_in_workspace(workspace_root, path) {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };

        if !full_path.is_file() {
            return Ok(ToolOutput::Error(format!("File not found: {path}")));
        }

        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => {
                self.tracker.record(path);
                Ok(ToolOutput::Success(format!("Deleted {path}")))
            }
            Err(e) => Ok(ToolOutput::Error(format!("Failed to delete {path}: {e}"))),
        }
    }
}
