//! Batching feedback into fix groups, and naming the result in commits.
//!
//! Grouping is an ordered rule table: the first rule whose predicate holds
//! decides the bucket. New categories are added as new rows.

use std::collections::BTreeMap;

use crate::autofix::{FeedbackItem, FeedbackType, FixPriority};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FixGroup {
    CriticalSecurity,
    LintingErrors,
    TypeErrors,
    TestFailures,
    Documentation,
    CodeStyle,
    Performance,
    General,
}

impl FixGroup {
    pub fn name(self) -> &'static str {
        match self {
            FixGroup::CriticalSecurity => "critical_security",
            FixGroup::LintingErrors => "linting_errors",
            FixGroup::TypeErrors => "type_errors",
            FixGroup::TestFailures => "test_failures",
            FixGroup::Documentation => "documentation",
            FixGroup::CodeStyle => "code_style",
            FixGroup::Performance => "performance",
            FixGroup::General => "general",
        }
    }

    /// Group-specific guidance handed to the fixing agent.
    pub fn guidance(self) -> &'static str {
        match self {
            FixGroup::CriticalSecurity => {
                "CRITICAL FIXES REQUIRED. Treat these as the highest priority.\n\
                 - Validate and sanitize all external input\n\
                 - Never build queries or shell commands from unchecked strings\n\
                 - Keep secrets out of logs and error messages\n\
                 - Add missing authentication or authorization checks"
            }
            FixGroup::LintingErrors => {
                "Fix every linting error reported by CI.\n\
                 - Break long lines\n\
                 - Remove unused imports and variables\n\
                 - Correct whitespace and blank-line spacing"
            }
            FixGroup::TypeErrors => {
                "Fix the type-checking errors.\n\
                 - Add missing annotations on parameters and return values\n\
                 - Resolve incompatible assignments at their source\n\
                 - Narrow optional values before use"
            }
            FixGroup::TestFailures => {
                "Make the failing tests pass.\n\
                 - Fix the implementation when the test expectation is right\n\
                 - Fix the test only when its expectation is wrong\n\
                 - Keep tests isolated from each other"
            }
            FixGroup::Documentation => {
                "Improve the documentation.\n\
                 - Document public functions, types and modules\n\
                 - Describe parameters, return values and error cases\n\
                 - Comment non-obvious logic briefly"
            }
            FixGroup::CodeStyle => {
                "Fix the style and formatting issues without changing behavior."
            }
            FixGroup::Performance => {
                "Address the performance concerns.\n\
                 - Avoid repeated work inside loops\n\
                 - Prefer the data structure that matches the access pattern\n\
                 - Keep the change behavior-preserving"
            }
            FixGroup::General => {
                "Fix the issues below with minimal, targeted changes that follow the existing code style."
            }
        }
    }
}

struct Rule {
    group: FixGroup,
    matches: fn(&FeedbackItem) -> bool,
}

fn title_has(item: &FeedbackItem, needles: &[&str]) -> bool {
    let title = item.title.to_lowercase();
    needles.iter().any(|n| title.contains(n))
}

fn raw_has(item: &FeedbackItem, needle: &str) -> bool {
    item.raw_data.to_string().to_lowercase().contains(needle)
}

fn is_ci(item: &FeedbackItem) -> bool {
    item.feedback_type == FeedbackType::CiFailure
}

const RULES: &[Rule] = &[
    Rule {
        group: FixGroup::CriticalSecurity,
        matches: |i| i.priority == FixPriority::Critical,
    },
    Rule {
        group: FixGroup::LintingErrors,
        matches: |i| is_ci(i) && (raw_has(i, "flake8") || title_has(i, &["lint"])),
    },
    Rule {
        group: FixGroup::TypeErrors,
        matches: |i| is_ci(i) && (raw_has(i, "mypy") || title_has(i, &["type"])),
    },
    Rule {
        group: FixGroup::TestFailures,
        matches: |i| is_ci(i) && (raw_has(i, "pytest") || title_has(i, &["test"])),
    },
    Rule {
        group: FixGroup::General,
        matches: is_ci,
    },
    Rule {
        group: FixGroup::Documentation,
        matches: |i| title_has(i, &["documentation", "docstring"]),
    },
    Rule {
        group: FixGroup::CodeStyle,
        matches: |i| i.priority == FixPriority::Low || title_has(i, &["style"]),
    },
    Rule {
        group: FixGroup::Performance,
        matches: |i| title_has(i, &["performance", "optimize"]),
    },
];

pub fn classify(item: &FeedbackItem) -> FixGroup {
    RULES
        .iter()
        .find(|rule| (rule.matches)(item))
        .map(|rule| rule.group)
        .unwrap_or(FixGroup::General)
}

/// Bucket items, dropping empty groups. Iteration order is the fix order.
pub fn group_feedback(items: &[FeedbackItem]) -> BTreeMap<FixGroup, Vec<FeedbackItem>> {
    let mut groups: BTreeMap<FixGroup, Vec<FeedbackItem>> = BTreeMap::new();
    for item in items {
        groups.entry(classify(item)).or_default().push(item.clone());
    }
    groups
}

/// Agent instructions for fixing one group.
pub fn fix_instructions(group: FixGroup, items: &[FeedbackItem]) -> String {
    let mut out = format!(
        "You are fixing {} issues reported on this pull request.\n\n{}\n\nIssues to fix:\n",
        group.name(),
        group.guidance()
    );
    for (i, item) in items.iter().enumerate() {
        out.push_str(&format!("\n{}. {}\n   Priority: {}\n   Description: {}\n", i + 1, item.title, item.priority, item.description));
        if let Some(location) = item.location() {
            out.push_str(&format!("   File: {location}\n"));
        }
        if let Some(suggestion) = &item.suggestion {
            out.push_str(&format!("   Suggestion: {suggestion}\n"));
        }
    }
    out.push_str(
        "\nFix all the issues listed above with minimal, targeted changes. Preserve existing behavior.",
    );
    out
}

/// Commit category for one item, by title keyword then feedback type.
pub fn commit_category(item: &FeedbackItem) -> &'static str {
    let title = item.title.to_lowercase();
    if title.contains("security") {
        "security"
    } else if title.contains("test") {
        "test"
    } else if title.contains("lint") || title.contains("style") {
        "style"
    } else if title.contains("type") || title.contains("mypy") {
        "typing"
    } else if title.contains("doc") {
        "docs"
    } else if title.contains("performance") {
        "perf"
    } else if item.feedback_type == FeedbackType::CiFailure {
        "ci"
    } else if item.feedback_type == FeedbackType::ReviewFeedback {
        "review"
    } else {
        "general"
    }
}

pub fn commit_message(fixes_applied: &[String], fixed_items: &[FeedbackItem], files_modified: &[String]) -> String {
    if fixes_applied.is_empty() {
        return "chore: automated fixes (no changes applied)".to_string();
    }

    let mut categories: BTreeMap<&str, usize> = BTreeMap::new();
    for item in fixed_items {
        *categories.entry(commit_category(item)).or_default() += 1;
    }

    let subject = match categories.iter().next() {
        Some((category, count)) if categories.len() == 1 => {
            let plural = if *count == 1 { "" } else { "s" };
            format!("fix({category}): resolve {count} {category} issue{plural}")
        }
        _ => {
            let total: usize = categories.values().sum();
            let details = categories
                .iter()
                .map(|(category, count)| format!("{count} {category}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("fix: auto-resolve {total} issues ({details})")
        }
    };

    format!(
        "{subject}\n\nAutomated fixes by DevFlow\n- {} fixes applied\n- {} files modified",
        fixes_applied.len(),
        files_modified.len()
    )
}
