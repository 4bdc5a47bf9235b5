use std::path::Path;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::claude::ToolDefinition;
use crate::agent::tools::{string_param, Tool, ToolOutput};
use crate::error::Result;

/// Stops the run and surfaces a question for a human.
pub struct AskClarificationTool;

#[async_trait]
impl Tool for AskClarificationTool {
    fn name(&self) -> &str {
        "ask_clarification"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "Stop and ask a human for clarification when requirements are ambiguous or the task cannot be completed as described.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "question": { "type": "string", "description": "The question to ask" }
                },
                "required": ["question"]
            }),
        }
    }

    async fn execute(&self, _workspace_root: &Path, input: serde_json::Value) -> Result<ToolOutput> {
        Ok(match string_param(&input, "question") {
            Ok(question) => ToolOutput::ClarificationNeeded(question.to_string()),
            Err(e) => e,
        })
    }
}
