//! The context bundle: ordered prompt fragments composed before stage 1.

use crate::context::budget::{truncate_at_paragraph, ContextBudget};
use crate::core::error::DomainError;
use serde::{Deserialize, Serialize};

/// Kind of a context fragment, in assembly order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    Company,
    Department,
    Role,
    Project,
    Playbook,
    PriorDecision,
}

impl FragmentKind {
    pub const ASSEMBLY_ORDER: [FragmentKind; 6] = [
        FragmentKind::Company,
        FragmentKind::Department,
        FragmentKind::Role,
        FragmentKind::Project,
        FragmentKind::Playbook,
        FragmentKind::PriorDecision,
    ];

    /// Whether fragments of this kind may be dropped to fit the total cap.
    /// Prior decisions go first, then playbooks; the rest are mandatory.
    pub fn droppable(&self) -> bool {
        matches!(self, FragmentKind::Playbook | FragmentKind::PriorDecision)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentKind::Company => "company",
            FragmentKind::Department => "department",
            FragmentKind::Role => "role",
            FragmentKind::Project => "project",
            FragmentKind::Playbook => "playbook",
            FragmentKind::PriorDecision => "prior_decision",
        }
    }
}

/// One titled piece of context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub kind: FragmentKind,
    pub title: String,
    pub body: String,
}

impl Fragment {
    pub fn new(kind: FragmentKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            body: body.into(),
        }
    }
}

/// A fragment that did not fit the total budget, kept for telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedFragment {
    pub kind: FragmentKind,
    pub title: String,
}

/// The immutable, ordered context for one session. Composed once before
/// stage 1 and shared by every worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    fragments: Vec<Fragment>,
    question: String,
    dropped: Vec<DroppedFragment>,
    truncated: usize,
}

impl ContextBundle {
    /// Compose a bundle from raw fragments.
    ///
    /// Fragments are ordered company → department → role → project →
    /// playbook → prior decision (stable within a kind), each body is
    /// truncated to the per-fragment cap at paragraph boundaries, and
    /// droppable kinds are shed lowest-precedence-first until the total
    /// fits. Deterministic for identical inputs. Fails only when the
    /// mandatory fragments alone exceed the total cap.
    pub fn compose(
        fragments: Vec<Fragment>,
        question: impl Into<String>,
        budget: &ContextBudget,
    ) -> Result<Self, DomainError> {
        let question = question.into();
        let mut truncated = 0usize;

        let mut ordered: Vec<Fragment> = Vec::with_capacity(fragments.len());
        for kind in FragmentKind::ASSEMBLY_ORDER {
            for fragment in fragments.iter().filter(|f| f.kind == kind) {
                let (body, was_cut) = truncate_at_paragraph(&fragment.body, budget.fragment_chars);
                if was_cut {
                    truncated += 1;
                }
                ordered.push(Fragment::new(kind, fragment.title.clone(), body));
            }
        }

        let mut dropped = Vec::new();
        let mut total = Self::measure(&ordered, &question);
        if total > budget.total_chars {
            // Shed prior decisions from the back, then playbooks.
            for kind in [FragmentKind::PriorDecision, FragmentKind::Playbook] {
                while total > budget.total_chars {
                    let Some(pos) = ordered.iter().rposition(|f| f.kind == kind) else {
                        break;
                    };
                    let fragment = ordered.remove(pos);
                    dropped.push(DroppedFragment {
                        kind: fragment.kind,
                        title: fragment.title,
                    });
                    total = Self::measure(&ordered, &question);
                }
            }
        }

        if total > budget.total_chars {
            return Err(DomainError::ContextTooLarge {
                needed: total,
                cap: budget.total_chars,
            });
        }

        Ok(Self {
            fragments: ordered,
            question,
            dropped,
            truncated,
        })
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn dropped(&self) -> &[DroppedFragment] {
        &self.dropped
    }

    pub fn truncated_count(&self) -> usize {
        self.truncated
    }

    /// Render the fragments into the system prompt the workers share.
    pub fn system_prompt(&self) -> String {
        let mut prompt = String::new();
        for fragment in &self.fragments {
            prompt.push_str(&format!(
                "## {}: {}\n\n{}\n\n",
                heading(fragment.kind),
                fragment.title,
                fragment.body
            ));
        }
        prompt.trim_end().to_string()
    }

    pub fn total_chars(&self) -> usize {
        Self::measure(&self.fragments, &self.question)
    }

    fn measure(fragments: &[Fragment], question: &str) -> usize {
        fragments
            .iter()
            .map(|f| f.title.chars().count() + f.body.chars().count())
            .sum::<usize>()
            + question.chars().count()
    }
}

fn heading(kind: FragmentKind) -> &'static str {
    match kind {
        FragmentKind::Company => "Company",
        FragmentKind::Department => "Department",
        FragmentKind::Role => "Role",
        FragmentKind::Project => "Project",
        FragmentKind::Playbook => "Playbook",
        FragmentKind::PriorDecision => "Prior decision",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(fragment: usize, total: usize) -> ContextBudget {
        ContextBudget {
            fragment_chars: fragment,
            total_chars: total,
        }
    }

    #[test]
    fn fragments_are_ordered_by_kind() {
        let bundle = ContextBundle::compose(
            vec![
                Fragment::new(FragmentKind::PriorDecision, "d1", "past"),
                Fragment::new(FragmentKind::Company, "acme", "who we are"),
                Fragment::new(FragmentKind::Role, "cto", "tech"),
                Fragment::new(FragmentKind::Department, "eng", "builds"),
            ],
            "q",
            &ContextBudget::default(),
        )
        .unwrap();

        let kinds: Vec<FragmentKind> = bundle.fragments().iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                FragmentKind::Company,
                FragmentKind::Department,
                FragmentKind::Role,
                FragmentKind::PriorDecision,
            ]
        );
    }

    #[test]
    fn composition_is_deterministic() {
        let fragments = vec![
            Fragment::new(FragmentKind::Company, "acme", "who we are"),
            Fragment::new(FragmentKind::Playbook, "pricing", "rules"),
        ];
        let a = ContextBundle::compose(fragments.clone(), "q", &ContextBudget::default()).unwrap();
        let b = ContextBundle::compose(fragments, "q", &ContextBudget::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn oversize_fragment_is_truncated() {
        let body = format!("{}\n\n{}", "a".repeat(30), "b".repeat(100));
        let bundle = ContextBundle::compose(
            vec![Fragment::new(FragmentKind::Company, "acme", body)],
            "q",
            &budget(50, 1_000),
        )
        .unwrap();
        assert_eq!(bundle.truncated_count(), 1);
        assert_eq!(bundle.fragments()[0].body, "a".repeat(30));
    }

    #[test]
    fn decisions_drop_before_playbooks() {
        let bundle = ContextBundle::compose(
            vec![
                Fragment::new(FragmentKind::Company, "acme", "x".repeat(40)),
                Fragment::new(FragmentKind::Playbook, "pb", "y".repeat(40)),
                Fragment::new(FragmentKind::PriorDecision, "dec", "z".repeat(40)),
            ],
            "q",
            &budget(100, 100),
        )
        .unwrap();

        let dropped: Vec<FragmentKind> = bundle.dropped().iter().map(|d| d.kind).collect();
        assert_eq!(dropped, vec![FragmentKind::PriorDecision]);
        assert!(bundle.fragments().iter().any(|f| f.kind == FragmentKind::Playbook));
    }

    #[test]
    fn mandatory_overflow_fails() {
        let err = ContextBundle::compose(
            vec![Fragment::new(FragmentKind::Company, "acme", "x".repeat(200))],
            "q",
            &budget(500, 100),
        )
        .unwrap_err();
        assert_eq!(err.code(), "context_too_large");
    }

    #[test]
    fn system_prompt_renders_headed_sections() {
        let bundle = ContextBundle::compose(
            vec![Fragment::new(FragmentKind::Company, "acme", "who we are")],
            "q",
            &ContextBudget::default(),
        )
        .unwrap();
        let prompt = bundle.system_prompt();
        assert!(prompt.contains("## Company: acme"));
        assert!(prompt.contains("who we are"));
    }
}
