use serde_json::Value;

use crate::platform::types;

/// Map octocrab Issue to our platform Issue type.
pub fn map_issue(
    issue: &octocrab::models::issues::Issue,
    comments: Vec<octocrab::models::issues::Comment>,
) -> types::Issue {
    types::Issue {
        number: issue.number,
        title: issue.title.clone(),
        body: issue.body.clone().unwrap_or_default(),
        labels: issue.labels.iter().map(|l| l.name.clone()).collect(),
        url: issue.html_url.to_string(),
        comments: comments.into_iter().map(map_comment).collect(),
    }
}

fn map_comment(comment: octocrab::models::issues::Comment) -> types::Comment {
    types::Comment {
        id: comment.id.into_inner(),
        author: comment.user.login,
        body: comment.body.unwrap_or_default(),
    }
}

pub fn map_pull_request(pr: octocrab::models::pulls::PullRequest) -> types::PullRequest {
    types::PullRequest {
        number: pr.number,
        title: pr.title.unwrap_or_default(),
        body: pr.body.unwrap_or_default(),
        head_branch: pr.head.ref_field.clone(),
        base_branch: pr.base.ref_field.clone(),
        url: pr.html_url.map(|u| u.to_string()).unwrap_or_default(),
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value[key].as_str().unwrap_or_default().to_string()
}

fn login(value: &Value) -> String {
    value["user"]["login"].as_str().unwrap_or("unknown").to_string()
}

/// Map a pull request from the REST JSON representation.
pub fn pull_request_from_json(value: &Value) -> types::PullRequest {
    types::PullRequest {
        number: value["number"].as_u64().unwrap_or(0),
        title: str_field(value, "title"),
        body: str_field(value, "body"),
        head_branch: value["head"]["ref"].as_str().unwrap_or_default().to_string(),
        base_branch: value["base"]["ref"].as_str().unwrap_or_default().to_string(),
        url: str_field(value, "html_url"),
    }
}

pub fn changed_file_from_json(value: &Value) -> types::ChangedFile {
    types::ChangedFile {
        filename: str_field(value, "filename"),
        status: str_field(value, "status"),
        additions: value["additions"].as_u64().unwrap_or(0),
        deletions: value["deletions"].as_u64().unwrap_or(0),
        patch: value["patch"].as_str().map(str::to_string),
    }
}

pub fn review_state_from_str(state: &str) -> types::ReviewState {
    match state {
        "APPROVED" => types::ReviewState::Approved,
        "CHANGES_REQUESTED" => types::ReviewState::ChangesRequested,
        "DISMISSED" => types::ReviewState::Dismissed,
        _ => types::ReviewState::Commented,
    }
}

pub fn review_from_json(value: &Value, comments: Vec<types::ReviewComment>) -> types::Review {
    types::Review {
        id: value["id"].as_u64().unwrap_or(0),
        author: login(value),
        body: str_field(value, "body"),
        state: review_state_from_str(value["state"].as_str().unwrap_or_default()),
        comments,
    }
}

pub fn review_comment_from_json(value: &Value) -> types::ReviewComment {
    types::ReviewComment {
        id: value["id"].as_u64().unwrap_or(0),
        author: login(value),
        body: str_field(value, "body"),
        path: value["path"].as_str().map(str::to_string),
        line: value["line"].as_u64().or_else(|| value["original_line"].as_u64()),
    }
}

pub fn check_run_from_json(value: &Value) -> types::CheckRun {
    let status = match value["status"].as_str().unwrap_or_default() {
        "completed" => types::CheckStatus::Completed,
        "in_progress" => types::CheckStatus::InProgress,
        _ => types::CheckStatus::Queued,
    };

    let conclusion = value["conclusion"].as_str().map(|c| match c {
        "success" => types::CheckConclusion::Success,
        "failure" => types::CheckConclusion::Failure,
        "cancelled" => types::CheckConclusion::Cancelled,
        "skipped" => types::CheckConclusion::Skipped,
        "timed_out" => types::CheckConclusion::TimedOut,
        "action_required" => types::CheckConclusion::ActionRequired,
        _ => types::CheckConclusion::Neutral,
    });

    let output = &value["output"];
    let output = ["title", "summary", "text"]
        .iter()
        .filter_map(|k| output[*k].as_str())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    types::CheckRun {
        id: value["id"].as_u64().unwrap_or(0),
        name: str_field(value, "name"),
        status,
        conclusion,
        output,
    }
}
