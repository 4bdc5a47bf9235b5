use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use crate::autofix::ci_parser;
use crate::autofix::{FeedbackItem, FeedbackType, FixPriority};
use crate::error::Result;
use crate::platform::types::{Review, ReviewComment, ReviewState};
use crate::platform::Platform;

const DESCRIPTION_CHARS: usize = 200;

/// Produces feedback items for one pull request.
#[async_trait]
pub trait FeedbackDetector: Send + Sync {
    fn name(&self) -> &str;

    async fn detect(&self, platform: &dyn Platform, pr_number: u64) -> Result<Vec<FeedbackItem>>;
}

/// Failed check runs, parsed from their job logs.
pub struct CiFailureDetector;

#[async_trait]
impl FeedbackDetector for CiFailureDetector {
    fn name(&self) -> &str {
        "ci_failure"
    }

    async fn detect(&self, platform: &dyn Platform, pr_number: u64) -> Result<Vec<FeedbackItem>> {
        let runs = platform.list_check_runs(pr_number).await?;
        let mut items = Vec::new();

        for run in runs.iter().filter(|r| r.failed()) {
            let log = match platform.get_check_run_log(run.id).await {
                Ok(log) => log,
                Err(e) => {
                    tracing::warn!(
                        pr = pr_number,
                        check = %run.name,
                        error = %e,
                        "Could not fetch job log, using check output"
                    );
                    run.output.clone()
                }
            };
            items.extend(ci_parser::parse_job_log(&run.name, &log));
        }

        tracing::debug!(pr = pr_number, count = items.len(), "CI feedback detected");
        Ok(items)
    }
}

struct ReviewPattern {
    keywords: &'static [&'static str],
    title: &'static str,
    priority: FixPriority,
    suggestion: &'static str,
}

const REVIEW_PATTERNS: &[ReviewPattern] = &[
    ReviewPattern {
        keywords: &["error handling", "try-catch", "exception handling", "unwrap", "panic"],
        title: "Add Error Handling",
        priority: FixPriority::High,
        suggestion: "Handle the failure cases explicitly instead of assuming success",
    },
    ReviewPattern {
        keywords: &["documentation", "docstring", "comment", "explain", "document"],
        title: "Improve Documentation",
        priority: FixPriority::Medium,
        suggestion: "Add documentation and brief comments where the logic is not obvious",
    },
    ReviewPattern {
        keywords: &["test", "coverage"],
        title: "Add Tests",
        priority: FixPriority::High,
        suggestion: "Add unit tests covering the new behavior",
    },
    ReviewPattern {
        keywords: &["security", "vulnerability", "sanitize", "validate input", "injection"],
        title: "Security Improvement",
        priority: FixPriority::Critical,
        suggestion: "Address the security concern and validate external input",
    },
    ReviewPattern {
        keywords: &["performance", "optimize", "efficiency", "slow"],
        title: "Performance Optimization",
        priority: FixPriority::Medium,
        suggestion: "Optimize the flagged code path",
    },
    ReviewPattern {
        keywords: &["type hint", "type annotation", "typing", "mypy"],
        title: "Add Type Annotations",
        priority: FixPriority::Medium,
        suggestion: "Add precise type annotations",
    },
    ReviewPattern {
        keywords: &["style", "format", "lint", "clean up"],
        title: "Code Style Fix",
        priority: FixPriority::Low,
        suggestion: "Fix the style and formatting issues",
    },
];

static FILE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z0-9_./-]+\.[A-Za-z0-9]+):(\d+)").expect("valid regex")
});
static QUOTED_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"`([A-Za-z0-9_./-]+\.[A-Za-z0-9]+)`").expect("valid regex")
});

/// `path:line` and `` `path` `` references in free text, first occurrence wins.
pub fn file_references(text: &str) -> Vec<(String, Option<u64>)> {
    let mut refs: Vec<(String, Option<u64>)> = Vec::new();
    for caps in FILE_LINE_RE.captures_iter(text) {
        let path = caps[1].to_string();
        if !refs.iter().any(|(p, _)| *p == path) {
            refs.push((path, caps[2].parse().ok()));
        }
    }
    for caps in QUOTED_FILE_RE.captures_iter(text) {
        let path = caps[1].to_string();
        if !refs.iter().any(|(p, _)| *p == path) {
            refs.push((path, None));
        }
    }
    refs
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(max).collect::<String>())
    }
}

fn matching_patterns(text: &str) -> impl Iterator<Item = &'static ReviewPattern> + '_ {
    let lower = text.to_lowercase();
    REVIEW_PATTERNS
        .iter()
        .filter(move |p| p.keywords.iter().any(|k| lower.contains(k)))
}

/// Items for the body of a changes-requested review.
pub fn review_body_items(review: &Review) -> Vec<FeedbackItem> {
    let body = review.body.trim();
    if body.is_empty() {
        return Vec::new();
    }
    let description = format!("{}: {}", review.author, truncate(body, DESCRIPTION_CHARS));
    let raw = json!({ "review_id": review.id, "author": review.author });
    let refs = file_references(body);

    let mut items = Vec::new();
    for pattern in matching_patterns(body) {
        let base = FeedbackItem::new(
            FeedbackType::ReviewFeedback,
            pattern.priority,
            pattern.title,
            description.clone(),
        )
        .suggest(pattern.suggestion)
        .with_raw(raw.clone());

        if refs.is_empty() {
            items.push(base);
        } else {
            for (path, line) in &refs {
                items.push(base.clone().at(path.clone(), *line));
            }
        }
    }

    if items.is_empty() {
        items.push(
            FeedbackItem::new(
                FeedbackType::ReviewFeedback,
                FixPriority::Medium,
                "Review Feedback",
                format!("{}: {}", review.author, body),
            )
            .suggest("Address the reviewer's feedback")
            .with_raw(raw),
        );
    }
    items
}

/// One item per inline comment, anchored at its path and line.
pub fn inline_comment_item(review_id: u64, comment: &ReviewComment) -> FeedbackItem {
    let (title, priority, suggestion) = match matching_patterns(&comment.body).next() {
        Some(p) => (p.title, p.priority, p.suggestion),
        None => ("Review Comment", FixPriority::Medium, "Address the reviewer's comment"),
    };
    let mut item = FeedbackItem::new(
        FeedbackType::ReviewFeedback,
        priority,
        title,
        format!("{}: {}", comment.author, truncate(comment.body.trim(), DESCRIPTION_CHARS)),
    )
    .suggest(suggestion)
    .with_raw(json!({ "review_id": review_id, "comment_id": comment.id }));
    if let Some(path) = &comment.path {
        item = item.at(path.clone(), comment.line);
    }
    item
}

/// Reviews that requested changes, including their inline comments.
pub struct ReviewFeedbackDetector;

#[async_trait]
impl FeedbackDetector for ReviewFeedbackDetector {
    fn name(&self) -> &str {
        "review_feedback"
    }

    async fn detect(&self, platform: &dyn Platform, pr_number: u64) -> Result<Vec<FeedbackItem>> {
        let reviews = platform.list_pull_request_reviews(pr_number).await?;
        let items: Vec<FeedbackItem> = reviews
            .iter()
            .filter(|r| r.state == ReviewState::ChangesRequested)
            .flat_map(|review| {
                let mut items = review_body_items(review);
                items.extend(review.comments.iter().map(|c| inline_comment_item(review.id, c)));
                items
            })
            .collect();

        tracing::debug!(pr = pr_number, count = items.len(), "Review feedback detected");
        Ok(items)
    }
}

static TODO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)\b(?:todo|fixme|hack):\s*(.+?)\s*$").expect("valid regex")
});

/// `TODO:` / `FIXME:` / `HACK:` notes left in the PR description.
pub struct PullRequestTodoDetector;

#[async_trait]
impl FeedbackDetector for PullRequestTodoDetector {
    fn name(&self) -> &str {
        "pr_todo"
    }

    async fn detect(&self, platform: &dyn Platform, pr_number: u64) -> Result<Vec<FeedbackItem>> {
        let pr = platform.get_pull_request(pr_number).await?;
        Ok(TODO_RE
            .captures_iter(&pr.body)
            .map(|caps| {
                let todo = caps[1].to_string();
                FeedbackItem::new(
                    FeedbackType::ReviewFeedback,
                    FixPriority::Medium,
                    "TODO Item",
                    format!("PR #{pr_number} TODO: {todo}"),
                )
                .suggest("Complete the TODO item before merging")
                .with_raw(json!({ "todo": todo }))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakePlatform;
    use crate::platform::types::{CheckConclusion, CheckRun, CheckStatus};

    fn review(state: ReviewState, body: &str, comments: Vec<ReviewComment>) -> Review {
        Review {
            id: 1,
            author: "alice".to_string(),
            body: body.to_string(),
            state,
            comments,
        }
    }

    fn failed_run(id: u64, name: &str, output: &str) -> CheckRun {
        CheckRun {
            id,
            name: name.to_string(),
            status: CheckStatus::Completed,
            conclusion: Some(CheckConclusion::Failure),
            output: output.to_string(),
        }
    }

    #[test]
    fn test_file_references() {
        let refs = file_references("See src/a.py:12 and `lib/b.rs`, also src/a.py:40");
        assert_eq!(
            refs,
            vec![("src/a.py".to_string(), Some(12)), ("lib/b.rs".to_string(), None)]
        );
    }

    #[test]
    fn test_review_body_keyword_table_with_refs() {
        let r = review(
            ReviewState::ChangesRequested,
            "Please add error handling in src/api.py:30 and a test for it.",
            vec![],
        );
        let items = review_body_items(&r);
        let titles: Vec<&str> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Add Error Handling", "Add Tests"]);
        assert!(items.iter().all(|i| i.file_path.as_deref() == Some("src/api.py")));
        assert_eq!(items[0].line_number, Some(30));
        assert_eq!(items[0].priority, FixPriority::High);
    }

    #[test]
    fn test_unclassified_review_still_emits_item() {
        let r = review(ReviewState::ChangesRequested, "Rename this to something clearer.", vec![]);
        let items = review_body_items(&r);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Review Feedback");
        assert_eq!(items[0].description, "alice: Rename this to something clearer.");
    }

    #[tokio::test]
    async fn test_review_detector_uses_changes_requested_and_inline_comments() {
        let platform = FakePlatform::default();
        platform.set_reviews(
            7,
            vec![
                review(ReviewState::Approved, "security looks fine", vec![]),
                review(
                    ReviewState::ChangesRequested,
                    "",
                    vec![ReviewComment {
                        id: 9,
                        author: "bob".to_string(),
                        body: "This is slow, please optimize".to_string(),
                        path: Some("src/lib.rs".to_string()),
                        line: Some(88),
                    }],
                ),
            ],
        );

        let items = ReviewFeedbackDetector.detect(&platform, 7).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Performance Optimization");
        assert_eq!(items[0].location().as_deref(), Some("src/lib.rs:88"));
    }

    #[tokio::test]
    async fn test_ci_detector_falls_back_to_check_output() {
        let platform = FakePlatform::default();
        platform.set_check_runs(
            3,
            vec![
                failed_run(1, "lint", "src/a.py:10:5: E501 line too long"),
                CheckRun {
                    conclusion: Some(CheckConclusion::Success),
                    ..failed_run(2, "tests", "")
                },
            ],
        );
        platform
            .logs
            .lock()
            .unwrap()
            .insert(5, "unused".to_string());

        let items = CiFailureDetector.detect(&platform, 3).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].file_path.as_deref(), Some("src/a.py"));
        assert_eq!(items[0].line_number, Some(10));
    }

    #[tokio::test]
    async fn test_todo_detector() {
        let platform = FakePlatform::default();
        platform.add_pull_request(4, "issue-4", "Summary\n\nTODO: add migration\n- FIXME: flaky retry\n");
        let items = PullRequestTodoDetector.detect(&platform, 4).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].description, "PR #4 TODO: add migration");
        assert_eq!(items[1].raw_data["todo"], "flaky retry");
    }
}
