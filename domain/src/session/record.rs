//! The persisted message record: the one artefact a session leaves behind.

use crate::core::ids::{ConversationId, MessageId, SessionId};
use crate::core::usage::Usage;
use crate::ranking::RankedEntry;
use crate::session::entities::SessionOutcome;
use crate::session::worker::FinishReason;
use serde::{Deserialize, Serialize};

/// One Stage-1 draft, with its anonymisation label revealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftOutput {
    pub role: String,
    pub model: String,
    /// The anonymous label rankers saw for this draft, when one was
    /// assigned before the draft terminated.
    pub label: Option<char>,
    pub text: String,
    pub finish: FinishReason,
    pub usage: Usage,
}

/// One Stage-2 ranker's raw output and its parsed ballot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankerOutput {
    pub role: String,
    pub model: String,
    pub text: String,
    pub ballot: Vec<char>,
    pub usage: Usage,
}

/// The final synthesis, when stage 3 produced one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    pub model: String,
    pub text: String,
    pub usage: Usage,
}

/// Written exactly once, when the session terminates. Partial results of a
/// stopped session are recorded as far as they got.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: MessageId,
    pub session_id: SessionId,
    pub conversation_id: ConversationId,
    pub question: String,
    pub drafts: Vec<DraftOutput>,
    pub rankers: Vec<RankerOutput>,
    /// Empty when stage 2 failed or produced no usable ballot.
    pub aggregate_ranking: Vec<RankedEntry>,
    pub synthesis: Option<Synthesis>,
    pub usage: Usage,
    pub outcome: SessionOutcome,
    pub created_at_ms: u64,
}

impl MessageRecord {
    /// The text a conversation shows for this message: the synthesis when
    /// one exists, otherwise the best-ranked draft, otherwise nothing.
    pub fn display_text(&self) -> Option<&str> {
        if let Some(synthesis) = &self.synthesis {
            return Some(&synthesis.text);
        }
        let best = self.aggregate_ranking.first()?;
        self.drafts
            .iter()
            .find(|d| d.label == Some(best.label))
            .map(|d| d.text.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(synthesis: Option<Synthesis>) -> MessageRecord {
        MessageRecord {
            message_id: MessageId::new("m1"),
            session_id: SessionId::new("s1"),
            conversation_id: ConversationId::new("c1"),
            question: "Should we launch in Q2?".into(),
            drafts: vec![DraftOutput {
                role: "draft-1".into(),
                model: "model-1".into(),
                label: Some('A'),
                text: "Launch.".into(),
                finish: FinishReason::Stop,
                usage: Usage::default(),
            }],
            rankers: vec![],
            aggregate_ranking: vec![RankedEntry {
                label: 'A',
                model: "model-1".into(),
                average_rank: 1.0,
                rankings_count: 1,
            }],
            synthesis,
            usage: Usage::default(),
            outcome: SessionOutcome::Complete,
            created_at_ms: 0,
        }
    }

    #[test]
    fn display_prefers_synthesis() {
        let record = record_with(Some(Synthesis {
            model: "chairman".into(),
            text: "Final answer.".into(),
            usage: Usage::default(),
        }));
        assert_eq!(record.display_text(), Some("Final answer."));
    }

    #[test]
    fn display_falls_back_to_best_draft() {
        let record = record_with(None);
        assert_eq!(record.display_text(), Some("Launch."));
    }

    #[test]
    fn record_roundtrips_through_json() {
        let record = record_with(None);
        let json = serde_json::to_string(&record).unwrap();
        let back: MessageRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
