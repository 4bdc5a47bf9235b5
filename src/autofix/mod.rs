//! Feedback-driven fix loop for open pull requests.
//!
//! Detectors turn CI results and reviews into [`FeedbackItem`]s; the
//! [`engine::AutoFixEngine`] prioritizes and groups them, asks an
//! implementation agent to fix each group, then commits the result.

pub mod ci_parser;
pub mod detect;
pub mod engine;
pub mod group;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use detect::{CiFailureDetector, FeedbackDetector, PullRequestTodoDetector, ReviewFeedbackDetector};
pub use engine::{AutoFixEngine, FixWorkspace};

/// Variant order is the secondary sort key when prioritizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    CiFailure,
    MergeConflict,
    ReviewFeedback,
    SecurityAlert,
}

impl FeedbackType {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedbackType::CiFailure => "ci_failure",
            FeedbackType::MergeConflict => "merge_conflict",
            FeedbackType::ReviewFeedback => "review_feedback",
            FeedbackType::SecurityAlert => "security_alert",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl FixPriority {
    pub fn rank(self) -> u8 {
        match self {
            FixPriority::Critical => 0,
            FixPriority::High => 1,
            FixPriority::Medium => 2,
            FixPriority::Low => 3,
        }
    }
}

impl fmt::Display for FixPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FixPriority::Critical => "critical",
            FixPriority::High => "high",
            FixPriority::Medium => "medium",
            FixPriority::Low => "low",
        })
    }
}

/// One actionable problem found on a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackItem {
    pub feedback_type: FeedbackType,
    pub priority: FixPriority,
    pub title: String,
    pub description: String,
    pub file_path: Option<String>,
    pub line_number: Option<u64>,
    pub suggestion: Option<String>,
    /// Source material the item was derived from (job name, log excerpt, review id).
    pub raw_data: serde_json::Value,
}

impl FeedbackItem {
    pub fn new(
        feedback_type: FeedbackType,
        priority: FixPriority,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            feedback_type,
            priority,
            title: title.into(),
            description: description.into(),
            file_path: None,
            line_number: None,
            suggestion: None,
            raw_data: serde_json::Value::Null,
        }
    }

    pub fn at(mut self, file_path: impl Into<String>, line_number: Option<u64>) -> Self {
        self.file_path = Some(file_path.into());
        self.line_number = line_number;
        self
    }

    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_raw(mut self, raw_data: serde_json::Value) -> Self {
        self.raw_data = raw_data;
        self
    }

    /// `path:line`, `path`, or `None`.
    pub fn location(&self) -> Option<String> {
        let path = self.file_path.as_deref()?;
        Some(match self.line_number {
            Some(line) => format!("{path}:{line}"),
            None => path.to_string(),
        })
    }
}

/// Stable sort by `(priority rank, type)`.
pub fn prioritize(items: &mut [FeedbackItem]) {
    items.sort_by_key(|item| (item.priority.rank(), item.feedback_type));
}

/// Outcome of one `run_auto_fix_cycle` call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AutoFixResult {
    pub success: bool,
    pub fixes_applied: Vec<String>,
    pub files_modified: Vec<String>,
    pub commit_message: String,
    pub validation_passed: bool,
    pub error: Option<String>,
}
