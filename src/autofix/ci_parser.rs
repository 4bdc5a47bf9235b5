//! Turns failed CI job logs into feedback items.
//!
//! Each recognizer looks for one tool's fixed output format. A job whose
//! log matches none of them still yields a generic item, so a failure is
//! never silently dropped.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;

use crate::autofix::{FeedbackItem, FeedbackType, FixPriority};

const LOG_EXCERPT_CHARS: usize = 500;

/// `path:line:col: CODE message` (flake8, ruff, pycodestyle).
static LINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(\S.*?):(\d+):(\d+): ([A-Z]+\d+) (.+?)\s*$").expect("valid regex")
});
/// `path:line[:col]: error|warning: message` (mypy).
static TYPE_CHECK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(\S.*?):(\d+)(?::\d+)?: (error|warning): (.+?)\s*$").expect("valid regex")
});
/// `FAILED path::test - message` (pytest summary).
static TEST_FAILURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)FAILED (\S+?)::(\S+) - (.+?)\s*$").expect("valid regex")
});
static FORMATTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)would reformat (\S+)").expect("valid regex"));
static IMPORT_ORDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)ERROR: (\S+) Imports are incorrectly sorted").expect("valid regex")
});

/// GitHub Actions prefixes every log line with an RFC 3339 timestamp.
static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?Z ?").expect("valid regex")
});

/// Parse the log of one failed job.
pub fn parse_job_log(job_name: &str, log: &str) -> Vec<FeedbackItem> {
    let log = TIMESTAMP_RE.replace_all(log, "");
    let log = log.as_ref();
    let mut items = Vec::new();
    items.extend(lint_errors(job_name, log));
    items.extend(type_errors(job_name, log));
    items.extend(test_failures(job_name, log));
    items.extend(formatting(job_name, log));
    items.extend(import_order(job_name, log));
    items.extend(docs_build(job_name, log));

    if items.is_empty() {
        items.push(generic_failure(job_name, log));
    }
    items
}

fn clean_path(path: &str) -> String {
    path.trim().trim_start_matches("./").to_string()
}

fn lint_errors(job_name: &str, log: &str) -> Vec<FeedbackItem> {
    LINT_RE
        .captures_iter(log)
        .map(|caps| {
            let (path, line, col, code, message) = (&caps[1], &caps[2], &caps[3], &caps[4], &caps[5]);
            let priority = if code.starts_with("E9") {
                FixPriority::High
            } else if code.starts_with('W') {
                FixPriority::Low
            } else {
                FixPriority::Medium
            };
            FeedbackItem::new(
                FeedbackType::CiFailure,
                priority,
                format!("Linting Error: {code}"),
                format!("{message} (line {line}:{col})"),
            )
            .at(clean_path(path), line.parse().ok())
            .suggest(lint_suggestion(code, message))
            .with_raw(json!({ "job": job_name, "tool": "flake8", "code": code }))
        })
        .collect()
}

fn lint_suggestion(code: &str, message: &str) -> String {
    let base = match code {
        "E501" => "Break the long line using parentheses or split it into multiple statements",
        "E302" => "Add two blank lines before the class or function definition",
        "E303" => "Remove the extra blank lines",
        "E231" => "Add whitespace after comma, colon, or semicolon",
        "E225" => "Add whitespace around the operator",
        "F401" => "Remove the unused import",
        "F841" => "Use the variable or remove it",
        "W503" => "Break before the binary operator instead of after it",
        "E711" => "Compare to None with 'is' or 'is not'",
        _ => "Fix the linting issue",
    };
    if message.contains("line too long") {
        format!("{base}. The current line is too long.")
    } else if message.contains("imported but unused") {
        format!("{base}. The import is not used in this file.")
    } else {
        base.to_string()
    }
}

fn type_errors(job_name: &str, log: &str) -> Vec<FeedbackItem> {
    TYPE_CHECK_RE
        .captures_iter(log)
        .map(|caps| {
            let (path, line, severity, message) = (&caps[1], &caps[2], &caps[3], &caps[4]);
            let (priority, label) = if severity == "error" {
                (FixPriority::High, "Error")
            } else {
                (FixPriority::Medium, "Warning")
            };
            FeedbackItem::new(
                FeedbackType::CiFailure,
                priority,
                format!("Type Error: {label}"),
                message,
            )
            .at(clean_path(path), line.parse().ok())
            .suggest(type_suggestion(message))
            .with_raw(json!({ "job": job_name, "tool": "mypy", "severity": severity }))
        })
        .collect()
}

fn type_suggestion(message: &str) -> &'static str {
    if message.contains("incompatible type") {
        "Check the type annotations and make them match the actual values"
    } else if message.contains("has no attribute") {
        "Verify the object has the expected attribute or narrow its type first"
    } else if message.contains("Cannot determine type") {
        "Add an explicit type annotation"
    } else {
        "Review the type error and fix the annotation or the code"
    }
}

fn test_failures(job_name: &str, log: &str) -> Vec<FeedbackItem> {
    let mut items: Vec<FeedbackItem> = TEST_FAILURE_RE
        .captures_iter(log)
        .map(|caps| {
            let (path, test, message) = (&caps[1], &caps[2], &caps[3]);
            FeedbackItem::new(
                FeedbackType::CiFailure,
                FixPriority::High,
                format!("Test Failure: {test}"),
                message,
            )
            .at(clean_path(path), None)
            .suggest(format!("Fix the failing test: {test}"))
            .with_raw(json!({ "job": job_name, "tool": "pytest", "test": test }))
        })
        .collect();

    let lower = log.to_lowercase();
    if lower.contains("collection failed") || lower.contains("error collecting") {
        items.push(
            FeedbackItem::new(
                FeedbackType::CiFailure,
                FixPriority::Critical,
                "Test Collection Failed",
                "Tests cannot be collected because of syntax or import errors",
            )
            .suggest("Check the test files and the modules they import for syntax and import errors")
            .with_raw(json!({ "job": job_name, "tool": "pytest" })),
        );
    }
    items
}

fn formatting(job_name: &str, log: &str) -> Vec<FeedbackItem> {
    FORMATTER_RE
        .captures_iter(log)
        .map(|caps| {
            let path = clean_path(&caps[1]);
            FeedbackItem::new(
                FeedbackType::CiFailure,
                FixPriority::Low,
                "Code Formatting Issue",
                format!("File needs reformatting: {path}"),
            )
            .suggest(format!("Run the formatter on {path}"))
            .at(path, None)
            .with_raw(json!({ "job": job_name, "tool": "black" }))
        })
        .collect()
}

fn import_order(job_name: &str, log: &str) -> Vec<FeedbackItem> {
    IMPORT_ORDER_RE
        .captures_iter(log)
        .map(|caps| {
            FeedbackItem::new(
                FeedbackType::CiFailure,
                FixPriority::Low,
                "Import Sorting Issue",
                "Import statements need to be sorted",
            )
            .at(clean_path(&caps[1]), None)
            .suggest("Sort the imports")
            .with_raw(json!({ "job": job_name, "tool": "isort" }))
        })
        .collect()
}

fn docs_build(job_name: &str, log: &str) -> Option<FeedbackItem> {
    let lower = log.to_lowercase();
    let is_docs_job = job_name.to_lowercase().contains("sphinx") || lower.contains("sphinx");
    if !is_docs_job || !(lower.contains("warning") || lower.contains("error")) {
        return None;
    }
    Some(
        FeedbackItem::new(
            FeedbackType::CiFailure,
            FixPriority::Medium,
            "Documentation Build Issue",
            "The documentation build reported warnings or errors",
        )
        .suggest("Check for missing docstrings and broken documentation references")
        .with_raw(json!({ "job": job_name, "tool": "sphinx" })),
    )
}

fn generic_failure(job_name: &str, log: &str) -> FeedbackItem {
    let excerpt: String = log.chars().take(LOG_EXCERPT_CHARS).collect();
    FeedbackItem::new(
        FeedbackType::CiFailure,
        FixPriority::High,
        format!("CI Failure: {job_name}"),
        format!("Job '{job_name}' failed, inspect its logs for details"),
    )
    .suggest("Review the CI logs and fix the underlying issue")
    .with_raw(json!({ "job": job_name, "log_excerpt": excerpt }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lint_line() {
        let items = parse_job_log("lint", "src/a.py:10:5: E501 line too long\n");
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.feedback_type, FeedbackType::CiFailure);
        assert_eq!(item.priority, FixPriority::Medium);
        assert_eq!(item.file_path.as_deref(), Some("src/a.py"));
        assert_eq!(item.line_number, Some(10));
        assert_eq!(item.title, "Linting Error: E501");
        assert!(item.suggestion.as_deref().unwrap().contains("too long"));
    }

    #[test]
    fn test_actions_timestamps_are_stripped() {
        let log = "2024-05-01T12:34:56.1234567Z src/a.py:10:5: E501 line too long\n\
                   2024-05-01T12:34:57.0000000Z src/m.py:45: error: Incompatible return value\n";
        let items = parse_job_log("lint", log);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].file_path.as_deref(), Some("src/a.py"));
        assert_eq!(items[0].line_number, Some(10));
        assert_eq!(items[1].file_path.as_deref(), Some("src/m.py"));
        assert_eq!(items[1].line_number, Some(45));
    }

    #[test]
    fn test_lint_priorities_by_code() {
        let log = "./pkg/x.py:1:1: E999 SyntaxError: invalid syntax\npkg/y.py:2:1: W503 line break before binary operator\n";
        let items = parse_job_log("flake8", log);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].priority, FixPriority::High);
        assert_eq!(items[0].file_path.as_deref(), Some("pkg/x.py"));
        assert_eq!(items[1].priority, FixPriority::Low);
    }

    #[test]
    fn test_type_checker_lines() {
        let log = "src/m.py:45: error: Argument 1 has incompatible type \"int\"\nsrc/m.py:50:3: warning: unused ignore\nFound 1 error";
        let items = parse_job_log("typecheck", log);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Type Error: Error");
        assert_eq!(items[0].priority, FixPriority::High);
        assert_eq!(items[0].line_number, Some(45));
        assert_eq!(items[1].priority, FixPriority::Medium);
        assert_eq!(items[1].line_number, Some(50));
    }

    #[test]
    fn test_test_runner_failures_and_collection() {
        let log = "FAILED tests/test_api.py::test_create - AssertionError: 1 != 2\nERROR collecting tests/test_db.py\n";
        let items = parse_job_log("tests", log);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Test Failure: test_create");
        assert_eq!(items[0].description, "AssertionError: 1 != 2");
        assert_eq!(items[0].file_path.as_deref(), Some("tests/test_api.py"));
        assert_eq!(items[1].priority, FixPriority::Critical);
    }

    #[test]
    fn test_formatter_and_import_order() {
        let log = "would reformat src/b.py\nERROR: /work/src/c.py Imports are incorrectly sorted and/or formatted.\n";
        let items = parse_job_log("style", log);
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.priority == FixPriority::Low));
        assert_eq!(items[0].file_path.as_deref(), Some("src/b.py"));
        assert_eq!(items[1].title, "Import Sorting Issue");
    }

    #[test]
    fn test_docs_build() {
        let items = parse_job_log("sphinx-docs", "WARNING: autodoc: failed to import module 'x'");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Documentation Build Issue");
        assert_eq!(items[0].priority, FixPriority::Medium);
    }

    #[test]
    fn test_unrecognized_log_falls_back_to_generic() {
        let items = parse_job_log("build", "Segmentation fault (core dumped)");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "CI Failure: build");
        assert_eq!(items[0].priority, FixPriority::High);
        assert_eq!(items[0].raw_data["log_excerpt"], "Segmentation fault (core dumped)");
    }
}
