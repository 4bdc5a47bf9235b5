use std::path::Path;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::claude::ToolDefinition;
use crate::agent::tools::{resolve_in_workspace, string_param, Tool, ToolOutput};
use crate::error::Result;

pub struct ReadFileTool {
    max_file_size: usize,
}

impl ReadFileTool {
    pub fn new(max_file_size: usize) -> Self {
        Self { max_file_size }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "Read a text file from the repository, relative to its root.".to_string(),
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

        let metadata = match tokio::fs::metadata(&full_path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Ok(ToolOutput::Error(format!("{path} is not a file"))),
            Err(_) => return Ok(ToolOutput::Error(format!("File not found: {path}"))),
        };

        if metadata.len() as usize > self.max_file_size {
            return Ok(ToolOutput::Error(format!(
                "{path} is {} bytes; the limit is {} bytes",
                metadata.len(),
                self.max_file_size
            )));
        }

        Ok(match tokio::fs::read_to_string(&full_path).await {
            Ok(content) => ToolOutput::Success(content),
            Err(e) => ToolOutput::Error(format!("Failed to read {path}: {e}")),
        })
    }
}
