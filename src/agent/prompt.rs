use crate::agent::{ImplementationContext, ProjectContext, ReviewContext, ValidationContext};
use crate::platform::types::Issue;

const MAX_PATCH_CHARS: usize = 4000;

fn preamble(project: &ProjectContext) -> String {
    format!(
        "You are DevFlow, an expert software engineer working on `{}` (project {}, base branch `{}`).",
        project.repository, project.name, project.base_branch
    )
}

fn issue_section(issue: &Issue) -> String {
    let comments = issue
        .comments
        .iter()
        .map(|c| format!("- **{}**: {}", c.author, c.body))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "## Issue #{number}: {title}\n\n{body}\n{comments_section}",
        number = issue.number,
        title = issue.title,
        body = if issue.body.is_empty() { "(no description)" } else { issue.body.as_str() },
        comments_section = if comments.is_empty() {
            String::new()
        } else {
            format!("\n**Comments:**\n{comments}\n")
        }
    )
}

pub fn validation_prompt(context: &ValidationContext) -> String {
    format!(
        r#"{preamble}

Your task is to decide whether the issue below is ready to be implemented. You may explore the repository with the read-only tools.

{issue}
## Answer format
End your reply with these lines:
VALIDATION: VALID | NEEDS_CLARIFICATION | INVALID | NEEDS_HUMAN
CONFIDENCE: <number between 0 and 1>
CLARIFICATIONS:
- <one question per line, only when NEEDS_CLARIFICATION>

Use INVALID for requests that should not be implemented, and NEEDS_HUMAN when a person must make a product decision."#,
        preamble = preamble(&context.project),
        issue = issue_section(&context.issue),
    )
}

pub fn implementation_prompt(context: &ImplementationContext) -> String {
    let task = match &context.issue {
        Some(issue) => format!("Your task is to implement issue #{}.\n\n{}", issue.number, issue_section(issue)),
        None => "Your task is to fix the problems described below.".to_string(),
    };

    let instructions = context
        .instructions
        .as_deref()
        .map(|i| format!("\n## Additional instructions\n{i}\n"))
        .unwrap_or_default();

    let history = if context.previous_transcript.trim().is_empty() {
        String::new()
    } else {
        format!(
            "\n## Earlier attempts\nThis is iteration {} of {}. Notes from earlier stages:\n{}\n",
            context.constraints.current_iteration + 1,
            context.constraints.max_iterations,
            tail(&context.previous_transcript, 6000)
        )
    };

    let file_limit = context
        .constraints
        .max_files
        .map(|n| format!("- Modify at most {n} files.\n"))
        .unwrap_or_default();

    format!(
        r#"{preamble}

{task}
{instructions}{history}
## Guidelines
- Explore the codebase before changing it and follow its existing style.
- Make minimal, focused changes; do not touch unrelated files.
{file_limit}- Use ask_clarification only if the task cannot be done as described.

## Answer format
Summarize what you changed, then end with:
STATUS: SUCCESS | PARTIAL | FAILED
CONFIDENCE: <number between 0 and 1>"#,
        preamble = preamble(&context.project),
    )
}

pub fn review_prompt(context: &ReviewContext) -> String {
    let files = context
        .changed_files
        .iter()
        .map(|f| {
            let patch = f
                .patch
                .as_deref()
                .map(|p| format!("\n```diff\n{}\n```", head(p, MAX_PATCH_CHARS)))
                .unwrap_or_default();
            format!("### {} ({}, +{} -{}){patch}", f.filename, f.status, f.additions, f.deletions)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"{preamble}

Review pull request #{number}: {title}

{body}

## Changed files
{files}

## Answer format
Give concrete, actionable feedback with file:line references, then end with:
DECISION: APPROVE | REQUEST_CHANGES | COMMENT | BLOCK
CONFIDENCE: <number between 0 and 1>"#,
        preamble = preamble(&context.project),
        number = context.pull_request.number,
        title = context.pull_request.title,
        body = context.pull_request.body,
    )
}

fn head(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn tail(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    match text.char_indices().nth(count - max) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}
