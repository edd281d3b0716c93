//! Prompt templates for the three deliberation stages.

use crate::ranking::RankedEntry;

/// Templates for generating prompts at each stage.
///
/// All builders are deterministic string composition; the anonymised
/// ranking prompt is the only place Stage-1 drafts are shown to another
/// model, and it only ever shows labels.
pub struct PromptTemplate;

impl PromptTemplate {
    /// System prompt for the drafting stage, on top of the assembled
    /// company context.
    pub fn draft_system(context: &str) -> String {
        let instructions = r#"You are one advisor on a council convened to answer a business question.
Write your own independent answer. Take a clear position, justify it, and
name the strongest argument against it. Do not hedge across every option."#;

        if context.is_empty() {
            instructions.to_string()
        } else {
            format!("{}\n\n{}", context, instructions)
        }
    }

    /// User prompt for the drafting stage.
    pub fn draft_user(question: &str) -> String {
        format!(
            r#"Question for the council:

{}

Give your complete answer."#,
            question
        )
    }

    /// System prompt for the ranking stage.
    pub fn rank_system() -> &'static str {
        r#"You are judging anonymous answers to the same question. You do not know
which model wrote which answer, and you must not guess. Judge only the
content: correctness, depth of reasoning, and practical usefulness."#
    }

    /// User prompt for the ranking stage. `drafts` pairs each anonymous
    /// label with the draft text.
    pub fn rank_user(question: &str, drafts: &[(char, String)]) -> String {
        let mut prompt = format!(
            r#"Original question: {}

Answers to rank:
"#,
            question
        );

        for (label, text) in drafts {
            prompt.push_str(&format!("\n--- Response {} ---\n{}\n", label, text));
        }

        prompt.push_str(
            r#"
Rank every response from best to worst. End with exactly one line of the form:

FINAL RANKING: <label>, <label>, ...

using only the response labels above."#,
        );

        prompt
    }

    /// System prompt for the chairman synthesis, on top of the assembled
    /// company context.
    pub fn synth_system(context: &str) -> String {
        let instructions = r#"You are the chairman of an advisory council. Several advisors have
answered the question and the answers have been peer-ranked. Produce the
council's single authoritative reply: state the recommendation, the
reasoning behind it, and the main risk. Where advisors disagreed, say
which position prevailed and why."#;

        if context.is_empty() {
            instructions.to_string()
        } else {
            format!("{}\n\n{}", context, instructions)
        }
    }

    /// User prompt for the synthesis stage. The ranking section is
    /// omitted entirely when no aggregate ranking is available.
    pub fn synth_user(
        question: &str,
        drafts: &[(char, String)],
        ranking: Option<&[RankedEntry]>,
    ) -> String {
        let mut prompt = format!(
            r#"Original question: {}

Advisor answers:
"#,
            question
        );

        for (label, text) in drafts {
            prompt.push_str(&format!("\n--- Response {} ---\n{}\n", label, text));
        }

        if let Some(entries) = ranking {
            if !entries.is_empty() {
                prompt.push_str("\nPeer ranking (best first):\n");
                for entry in entries {
                    prompt.push_str(&format!(
                        "- Response {} (average rank {:.2} across {} ballots)\n",
                        entry.label, entry.average_rank, entry.rankings_count
                    ));
                }
            }
        }

        prompt.push_str("\nWrite the council's final reply.");
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_system_prepends_context() {
        let prompt = PromptTemplate::draft_system("## Company: acme\n\nwidgets");
        assert!(prompt.starts_with("## Company: acme"));
        assert!(prompt.contains("advisor on a council"));
    }

    #[test]
    fn rank_user_labels_every_draft() {
        let prompt = PromptTemplate::rank_user(
            "Should we launch in Q2?",
            &[('A', "yes".into()), ('B', "no".into())],
        );
        assert!(prompt.contains("--- Response A ---"));
        assert!(prompt.contains("--- Response B ---"));
        assert!(prompt.contains("FINAL RANKING:"));
        // Model names must never appear in the ranking prompt.
        assert!(!prompt.contains("model"));
    }

    #[test]
    fn synth_user_with_and_without_ranking() {
        let drafts = vec![('A', "yes".to_string())];
        let ranked = vec![RankedEntry {
            label: 'A',
            model: "m1".into(),
            average_rank: 1.0,
            rankings_count: 2,
        }];

        let with = PromptTemplate::synth_user("q", &drafts, Some(&ranked));
        assert!(with.contains("Peer ranking"));
        assert!(with.contains("Response A (average rank 1.00"));

        let without = PromptTemplate::synth_user("q", &drafts, None);
        assert!(!without.contains("Peer ranking"));
    }

    #[test]
    fn templates_are_deterministic() {
        let a = PromptTemplate::draft_user("q");
        let b = PromptTemplate::draft_user("q");
        assert_eq!(a, b);
    }
}
