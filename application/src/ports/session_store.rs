//! Persistence adapter port
//!
//! Typed read/write against the external store. Every write is scoped to
//! a per-session lease held by the owning orchestrator task; writes from
//! any other holder are rejected, which is what makes the session
//! single-writer even if two processes ever race on the same id.

use async_trait::async_trait;
use council_domain::{
    ConversationId, MessageRecord, Session, SessionId, SessionOutcome, StageState, Usage,
};
use thiserror::Error;

/// Proof of write ownership for one session.
///
/// Issued by [`SessionStore::create_session`]; the token is checked on
/// every subsequent write for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLease {
    session: SessionId,
    token: u64,
}

impl StoreLease {
    pub fn new(session: SessionId, token: u64) -> Self {
        Self { session, token }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn token(&self) -> u64 {
        self.token
    }
}

/// Errors surfaced by the store adapter
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("session {0} already has a writer")]
    LeaseHeld(SessionId),

    #[error("lease rejected for session {0}")]
    LeaseRejected(SessionId),

    #[error("session {0} not found")]
    NotFound(SessionId),

    #[error("store i/o error: {0}")]
    Io(String),
}

/// Typed operations against the conversation store.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create the session row and acquire its write lease.
    async fn create_session(&self, session: &Session) -> Result<StoreLease, StoreError>;

    /// Record the result of one finished stage (workers, outputs, status).
    async fn append_stage_result(
        &self,
        lease: &StoreLease,
        stage: &StageState,
    ) -> Result<(), StoreError>;

    /// Write the message record. Called exactly once, at termination.
    async fn finalize_message(
        &self,
        lease: &StoreLease,
        record: &MessageRecord,
    ) -> Result<(), StoreError>;

    /// Record the session's total usage and terminal outcome. Idempotent
    /// per session.
    async fn record_usage(
        &self,
        lease: &StoreLease,
        usage: &Usage,
        outcome: SessionOutcome,
    ) -> Result<(), StoreError>;

    /// Set the conversation title if it does not have one yet.
    async fn upsert_conversation_title(
        &self,
        lease: &StoreLease,
        conversation: &ConversationId,
        title: &str,
    ) -> Result<(), StoreError>;

    /// Release the write lease. The session is read-only afterwards.
    async fn release(&self, lease: StoreLease) -> Result<(), StoreError>;

    /// Read a finalized message record, for subscribers attaching after
    /// the session terminated.
    async fn load_message(&self, session: &SessionId)
        -> Result<Option<MessageRecord>, StoreError>;
}
