use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::claude::ToolDefinition;
use crate::agent::tools::{resolve_in_workspace, string_param, Tool, ToolOutput};
use crate::error::Result;

const EXCLUDED_DIRS: &[&str] = &[".git", "node_modules", "target", ".venv", "vendor", ".devflow"];

/// grep-backed code search.
pub struct SearchCodeTool {
    max_results: usize,
}

impl SearchCodeTool {
    pub fn new(max_results: usize) -> Self {
        Self { max_results }
    }
}

#[async_trait]
impl Tool for SearchCodeTool {
    fn name(&self) -> &str {
        "search_code"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "Search the repository with a grep-compatible regex. Returns path:line:text matches.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "grep-compatible regex" },
                    "path": { "type": "string", "description": "Optional subdirectory to restrict the search to" },
                    "include": { "type": "string", "description": "Optional file glob, e.g. '*.py'" }
                },
                "required": ["pattern"]
            }),
        }
    }

    async fn execute(&self, workspace_root: &Path, input: serde_json::Value) -> Result<ToolOutput> {
        let pattern = match string_param(&input, "pattern") {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };
        let scope = input["path"].as_str().unwrap_or(".");
        let search_dir = match resolve_in_workspace(workspace_root, scope) {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };

        let mut command = tokio::process::Command::new("grep");
        command.arg("-rn").arg("-E");
        if let Some(include) = input["include"].as_str() {
            command.arg(format!("--include={include}"));
        }
        for dir in EXCLUDED_DIRS {
            command.arg(format!("--exclude-dir={dir}"));
        }
        command
            .arg("--")
            .arg(pattern)
            .arg(".")
            .current_dir(&search_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = match command.output().await {
            Ok(o) => o,
            Err(e) => return Ok(ToolOutput::Error(format!("Search failed: {e}"))),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let total = stdout.lines().count();
        if total == 0 {
            return Ok(ToolOutput::Success("No matches found".to_string()));
        }

        let mut result = stdout
            .lines()
            .take(self.max_results)
            .collect::<Vec<_>>()
            .join("\n");
        if total > self.max_results {
            result.push_str(&format!("\n\n... ({} more matches truncated)", total - self.max_results));
        }
        Ok(ToolOutput::Success(result))
    }
}
