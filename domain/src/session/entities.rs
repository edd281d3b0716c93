//! Session aggregate
//!
//! A [`Session`] is created by the orchestrator, mutated only by its owning
//! orchestrator task, and frozen once it leaves the running outcome.

use crate::core::error::DomainError;
use crate::core::ids::{CompanyId, ConversationId, SessionId, UserId};
use crate::core::question::Question;
use crate::core::usage::Usage;
use crate::session::stage::{StageId, StageState};
use serde::{Deserialize, Serialize};

/// Terminal disposition of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Running,
    Complete,
    Stopped,
    Failed,
}

impl SessionOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionOutcome::Running)
    }
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionOutcome::Running => "running",
            SessionOutcome::Complete => "complete",
            SessionOutcome::Stopped => "stopped",
            SessionOutcome::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A deliberation session (Entity).
///
/// Owns its three stage states, which own their workers. The context
/// bundle and anonymisation map live with the orchestrator, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    user: UserId,
    company: Option<CompanyId>,
    conversation: ConversationId,
    question: Question,
    attachments: Vec<String>,
    system_prompt: String,
    stages: Vec<StageState>,
    usage: Usage,
    outcome: SessionOutcome,
    created_at_ms: u64,
    updated_at_ms: u64,
}

impl Session {
    pub fn new(
        id: SessionId,
        user: UserId,
        company: Option<CompanyId>,
        conversation: ConversationId,
        question: Question,
        now_ms: u64,
    ) -> Self {
        Self {
            id,
            user,
            company,
            conversation,
            question,
            attachments: Vec::new(),
            system_prompt: String::new(),
            stages: StageId::ALL.iter().map(|id| StageState::new(*id)).collect(),
            usage: Usage::default(),
            outcome: SessionOutcome::Running,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<String>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn company(&self) -> Option<&CompanyId> {
        self.company.as_ref()
    }

    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    pub fn question(&self) -> &Question {
        &self.question
    }

    pub fn attachments(&self) -> &[String] {
        &self.attachments
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn outcome(&self) -> SessionOutcome {
        self.outcome
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    pub fn stages(&self) -> &[StageState] {
        &self.stages
    }

    pub fn stage(&self, id: StageId) -> &StageState {
        self.stages
            .iter()
            .find(|s| s.id() == id)
            .expect("session always holds all three stages")
    }

    pub fn stage_mut(&mut self, id: StageId) -> &mut StageState {
        self.stages
            .iter_mut()
            .find(|s| s.id() == id)
            .expect("session always holds all three stages")
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
    }

    pub fn add_usage(&mut self, usage: &Usage) {
        self.usage.add(usage);
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.updated_at_ms = now_ms;
    }

    /// Leave the running state. A session can terminate exactly once.
    pub fn terminate(&mut self, outcome: SessionOutcome, now_ms: u64) -> Result<(), DomainError> {
        if self.outcome.is_terminal() {
            return Err(DomainError::SessionFrozen);
        }
        self.outcome = outcome;
        self.updated_at_ms = now_ms;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            SessionId::new("s1"),
            UserId::new("u1"),
            Some(CompanyId::new("c1")),
            ConversationId::new("conv1"),
            Question::new("Should we launch in Q2?"),
            1_000,
        )
    }

    #[test]
    fn new_session_is_running_with_three_stages() {
        let s = session();
        assert_eq!(s.outcome(), SessionOutcome::Running);
        assert_eq!(s.stages().len(), 3);
        assert_eq!(s.stage(StageId::Rank).id(), StageId::Rank);
    }

    #[test]
    fn terminate_is_once() {
        let mut s = session();
        s.terminate(SessionOutcome::Complete, 2_000).unwrap();
        assert!(s.terminate(SessionOutcome::Failed, 3_000).is_err());
        assert_eq!(s.outcome(), SessionOutcome::Complete);
    }

    #[test]
    fn usage_accumulates_across_stages() {
        let mut s = session();
        s.add_usage(&Usage::new(10, 5, 1));
        s.add_usage(&Usage::new(1, 1, 0));
        assert_eq!(s.usage(), Usage::new(11, 6, 1));
    }
}
