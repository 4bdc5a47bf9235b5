use std::path::Path;

use crate::agent::claude::{ClaudeClient, ContentBlock, Message};
use crate::agent::tools::{ToolOutput, ToolRegistry};
use crate::error::AppError;

/// Outcome of one tool-use conversation.
#[derive(Debug)]
pub enum AgentOutcome {
    /// The model ended its turn; `summary` is its final text.
    Completed { summary: String },
    /// The model asked for human input.
    ClarificationNeeded { question: String },
    /// The turn budget ran out before the model finished.
    TurnLimitReached { partial_summary: String },
    RateLimited { message: String },
    Failed { error: String },
}

/// Drives the Messages API tool-use loop against one workspace.
pub struct AgentEngine<'a> {
    client: &'a ClaudeClient,
    tools: ToolRegistry,
    max_turns: u32,
}

impl<'a> AgentEngine<'a> {
    pub fn new(client: &'a ClaudeClient, tools: ToolRegistry, max_turns: u32) -> Self {
        Self {
            client,
            tools,
            max_turns,
        }
    }

    pub async fn run(
        &self,
        system_prompt: &str,
        workspace_root: &Path,
        initial_message: &str,
    ) -> AgentOutcome {
        let tool_definitions = self.tools.definitions();
        let mut messages = vec![Message::user_text(initial_message)];
        let mut last_text = String::new();
        let (mut input_tokens, mut output_tokens) = (0u32, 0u32);

        for turn in 0..self.max_turns {
            tracing::debug!(turn, "Agent turn");

            let request = self
                .client
                .request(system_prompt, messages.clone(), tool_definitions.clone());

            let response = match self.client.send_message(&request).await {
                Ok(r) => r,
                Err(AppError::AgentRateLimited(message)) => {
                    tracing::warn!("Claude API rate limited, stopping agent");
                    return AgentOutcome::RateLimited { message };
                }
                Err(e) => {
                    return AgentOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };

            input_tokens += response.usage.input_tokens;
            output_tokens += response.usage.output_tokens;

            let text = extract_text(&response.content);
            if !text.is_empty() {
                last_text = text.clone();
            }

            match response.stop_reason.as_deref().unwrap_or("unknown") {
                "end_turn" | "stop_sequence" => {
                    tracing::info!(input_tokens, output_tokens, turns = turn + 1, "Agent completed");
                    return AgentOutcome::Completed { summary: text };
                }
                "tool_use" => {
                    messages.push(Message::blocks("assistant", response.content.clone()));

                    let mut results = Vec::new();
                    for block in &response.content {
                        let ContentBlock::ToolUse { id, name, input } = block else {
                            continue;
                        };
                        tracing::debug!(tool = %name, "Executing tool");

                        let (content, is_error) = match self.execute_tool(workspace_root, name, input).await {
                            ToolOutput::Success(content) => (content, None),
                            ToolOutput::Error(error) => {
                                tracing::debug!(tool = %name, error = %error, "Tool error");
                                (error, Some(true))
                            }
                            ToolOutput::ClarificationNeeded(question) => {
                                tracing::info!(question = %question, "Agent requested clarification");
                                return AgentOutcome::ClarificationNeeded { question };
                            }
                        };
                        results.push(ContentBlock::ToolResult {
                            tool_use_id: id.clone(),
                            content,
                            is_error,
                        });
                    }

                    messages.push(Message::blocks("user", results));
                }
                "max_tokens" => {
                    tracing::warn!("Agent response hit max_tokens limit");
                    messages.push(Message::blocks("assistant", response.content));
                    messages.push(Message::user_text("Please continue."));
                }
                other => {
                    return AgentOutcome::Failed {
                        error: format!("Unexpected stop reason: {other}"),
                    };
                }
            }
        }

        tracing::warn!(max_turns = self.max_turns, "Agent hit turn limit");
        AgentOutcome::TurnLimitReached {
            partial_summary: last_text,
        }
    }

    async fn execute_tool(&self, workspace_root: &Path, name: &str, input: &serde_json::Value) -> ToolOutput {
        let Some(tool) = self.tools.get(name) else {
            return ToolOutput::Error(format!("Unknown tool: {name}"));
        };
        match tool.execute(workspace_root, input.clone()).await {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(tool = %name, error = %e, "Tool execution error");
                ToolOutput::Error(format!("Internal error: {e}"))
            }
        }
    }
}

fn extract_text(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}
