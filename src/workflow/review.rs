use std::sync::Arc;

use crate::agent::{ensure_confidence, AgentProvider, ReviewContext, ReviewDecision, ReviewResponse};

/// Reduce every reviewer's decision to one.
///
/// Precedence: BLOCK, then REQUEST_CHANGES, then APPROVE, then COMMENT.
/// `None` only when there is nothing to merge.
pub fn merge_review_decisions(responses: &[ReviewResponse]) -> Option<ReviewDecision> {
    let has = |d: ReviewDecision| responses.iter().any(|r| r.decision == d);
    if responses.is_empty() {
        None
    } else if has(ReviewDecision::Block) {
        Some(ReviewDecision::Block)
    } else if has(ReviewDecision::RequestChanges) {
        Some(ReviewDecision::RequestChanges)
    } else if has(ReviewDecision::Approve) {
        Some(ReviewDecision::Approve)
    } else {
        Some(ReviewDecision::Comment)
    }
}

/// Whether a merged decision sends the PR back for fixes.
pub fn requires_fixes(decision: ReviewDecision) -> bool {
    matches!(decision, ReviewDecision::RequestChanges | ReviewDecision::Block)
}

/// Run every reviewer in parallel and collect the responses that succeeded.
///
/// A reviewer that errors, panics, or reports an out-of-range confidence is
/// logged and left out; it never cancels the others.
pub async fn fan_out_reviews(
    reviewers: Vec<Arc<dyn AgentProvider>>,
    context: Arc<ReviewContext>,
) -> Vec<ReviewResponse> {
    let handles: Vec<_> = reviewers
        .into_iter()
        .map(|reviewer| {
            let context = Arc::clone(&context);
            let name = reviewer.name().to_string();
            let handle = tokio::spawn(async move { reviewer.review_code(&context).await });
            (name, handle)
        })
        .collect();

    let mut responses = Vec::new();
    for (name, handle) in handles {
        match handle.await {
            Ok(Ok(response)) => match ensure_confidence(&name, response.confidence) {
                Ok(()) => responses.push(response),
                Err(e) => tracing::warn!(reviewer = %name, error = %e, "Discarding review"),
            },
            Ok(Err(e)) => tracing::warn!(reviewer = %name, error = %e, "Reviewer failed"),
            Err(e) => tracing::error!(reviewer = %name, error = %e, "Reviewer task panicked"),
        }
    }
    responses
}
