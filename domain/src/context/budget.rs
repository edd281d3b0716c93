//! Size caps for the assembled context and paragraph-aware truncation.

use serde::{Deserialize, Serialize};

/// Character budgets for the context bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBudget {
    /// Cap applied to each fragment body before assembly.
    pub fragment_chars: usize,
    /// Cap on the total assembled size (fragments plus question).
    pub total_chars: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            fragment_chars: 8_000,
            total_chars: 48_000,
        }
    }
}

/// Truncate `body` to at most `cap` characters, cutting at the last
/// paragraph boundary that fits. Falls back to the last line break, then
/// to a plain character cut when the text has no usable boundary.
///
/// Returns the (possibly shortened) text and whether it was truncated.
pub fn truncate_at_paragraph(body: &str, cap: usize) -> (String, bool) {
    if body.chars().count() <= cap {
        return (body.to_string(), false);
    }

    let head: String = body.chars().take(cap).collect();
    if let Some(cut) = head.rfind("\n\n") {
        if cut > 0 {
            return (head[..cut].trim_end().to_string(), true);
        }
    }
    if let Some(cut) = head.rfind('\n') {
        if cut > 0 {
            return (head[..cut].trim_end().to_string(), true);
        }
    }
    (head.trim_end().to_string(), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        let (text, truncated) = truncate_at_paragraph("hello", 100);
        assert_eq!(text, "hello");
        assert!(!truncated);
    }

    #[test]
    fn cuts_at_paragraph_boundary() {
        let body = "first paragraph\n\nsecond paragraph\n\nthird paragraph";
        let (text, truncated) = truncate_at_paragraph(body, 40);
        assert_eq!(text, "first paragraph\n\nsecond paragraph");
        assert!(truncated);
    }

    #[test]
    fn falls_back_to_line_boundary() {
        let body = "line one\nline two\nline three that is quite long";
        let (text, truncated) = truncate_at_paragraph(body, 20);
        assert_eq!(text, "line one\nline two");
        assert!(truncated);
    }

    #[test]
    fn falls_back_to_hard_cut() {
        let body = "x".repeat(100);
        let (text, truncated) = truncate_at_paragraph(&body, 10);
        assert_eq!(text.len(), 10);
        assert!(truncated);
    }

    #[test]
    fn default_budget_is_sane() {
        let budget = ContextBudget::default();
        assert!(budget.fragment_chars < budget.total_chars);
    }
}
