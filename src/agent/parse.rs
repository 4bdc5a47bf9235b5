//! Marker extraction from free-form model output.
//!
//! Prompts ask the model to end with lines such as `VALIDATION: VALID` or
//! `DECISION: REQUEST_CHANGES`; nothing else in the text is interpreted.

use std::sync::LazyLock;

use regex::Regex;

use crate::agent::{ImplementationResult, ReviewDecision, ValidationResult};

static VALIDATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\W*VALIDATION\W*:\W*(VALID|NEEDS_CLARIFICATION|INVALID|NEEDS_HUMAN)\b")
        .expect("valid regex")
});
static STATUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\W*STATUS\W*:\W*(SUCCESS|PARTIAL|FAILED|NEEDS_HUMAN)\b").expect("valid regex")
});
static DECISION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\W*DECISION\W*:\W*(APPROVE|REQUEST_CHANGES|COMMENT|BLOCK)\b")
        .expect("valid regex")
});
static CONFIDENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\W*CONFIDENCE\W*:\W*([0-9]*\.?[0-9]+)").expect("valid regex")
});

const DEFAULT_CONFIDENCE: f32 = 0.5;

fn last_capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures_iter(text)
        .last()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

pub fn validation_result(text: &str) -> Option<ValidationResult> {
    match last_capture(&VALIDATION_RE, text)?.to_ascii_uppercase().as_str() {
        "VALID" => Some(ValidationResult::Valid),
        "NEEDS_CLARIFICATION" => Some(ValidationResult::NeedsClarification),
        "INVALID" => Some(ValidationResult::Invalid),
        "NEEDS_HUMAN" => Some(ValidationResult::NeedsHuman),
        _ => None,
    }
}

pub fn implementation_status(text: &str) -> Option<ImplementationResult> {
    match last_capture(&STATUS_RE, text)?.to_ascii_uppercase().as_str() {
        "SUCCESS" => Some(ImplementationResult::Success),
        "PARTIAL" => Some(ImplementationResult::Partial),
        "FAILED" => Some(ImplementationResult::Failed),
        "NEEDS_HUMAN" => Some(ImplementationResult::NeedsHuman),
        _ => None,
    }
}

pub fn review_decision(text: &str) -> Option<ReviewDecision> {
    match last_capture(&DECISION_RE, text)?.to_ascii_uppercase().as_str() {
        "APPROVE" => Some(ReviewDecision::Approve),
        "REQUEST_CHANGES" => Some(ReviewDecision::RequestChanges),
        "COMMENT" => Some(ReviewDecision::Comment),
        "BLOCK" => Some(ReviewDecision::Block),
        _ => None,
    }
}

/// Declared confidence, unclamped so out-of-range values can be rejected.
pub fn confidence(text: &str) -> f32 {
    last_capture(&CONFIDENCE_RE, text)
        .and_then(|c| c.parse::<f32>().ok())
        .unwrap_or(DEFAULT_CONFIDENCE)
}

/// Bullet lines following a `CLARIFICATIONS:` header.
pub fn clarifications(text: &str) -> Vec<String> {
    let mut in_section = false;
    let mut questions = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.to_ascii_uppercase().starts_with("CLARIFICATIONS") {
            in_section = true;
            continue;
        }
        if !in_section {
            continue;
        }
        match trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
            Some(q) if !q.trim().is_empty() => questions.push(q.trim().to_string()),
            _ if trimmed.is_empty() => {}
            _ => break,
        }
    }
    questions
}
