use std::path::Path;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::claude::ToolDefinition;
use crate::agent::tools::{resolve_in_workspace, Tool, ToolOutput};
use crate::error::Result;

pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "List a directory's entries, marking each as file or dir. Hidden entries are skipped.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Directory relative to the repository root; defaults to '.'" }
                }
            }),
        }
    }

    async fn execute(&self, workspace_root: &Path, input: serde_json::Value) -> Result<ToolOutput> {
        let path = input["path"].as_str().unwrap_or(".");
        let dir = match resolve_in_workspace(workspace_root, path) {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };

        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) => return Ok(ToolOutput::Error(format!("Cannot list {path}: {e}"))),
        };

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let kind = if entry.file_type().await?.is_dir() { "dir" } else { "file" };
            entries.push(format!("{name} ({kind})"));
        }
        entries.sort();

        Ok(ToolOutput::Success(if entries.is_empty() {
            "Directory is empty".to_string()
        } else {
            entries.join("\n")
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lists_sorted_entries_without_hidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();
        std::fs::write(dir.path().join(".env"), "").unwrap();

        match ListDirectoryTool.execute(dir.path(), json!({})).await.unwrap() {
            ToolOutput::Success(listing) => assert_eq!(listing, "README.md (file)\nsrc (dir)"),
            _ => panic!("expected listing"),
        }
    }
}
