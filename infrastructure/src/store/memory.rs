//! In-memory session store with real lease semantics.
//!
//! Backs self-hosted single-process deployments and every test that needs
//! a store. Lease checking is the same contract a relational adapter
//! enforces with row-level ownership: one writer per session, stale
//! writers rejected.

use crate::store::jsonl::JsonlMessageLog;
use async_trait::async_trait;
use council_application::ports::session_store::{SessionStore, StoreError, StoreLease};
use council_domain::{
    ConversationId, MessageRecord, Session, SessionId, SessionOutcome, StageState, Usage,
};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct StoreState {
    next_token: u64,
    leases: HashMap<SessionId, u64>,
    sessions: HashMap<SessionId, Session>,
    stage_results: HashMap<SessionId, Vec<StageState>>,
    records: HashMap<SessionId, MessageRecord>,
    usages: HashMap<SessionId, (Usage, SessionOutcome)>,
    titles: HashMap<ConversationId, String>,
}

/// Session store held entirely in process memory.
#[derive(Default)]
pub struct MemorySessionStore {
    state: Mutex<StoreState>,
    audit: Option<JsonlMessageLog>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Additionally append every finalized record to a JSONL audit file.
    pub fn with_audit_log(mut self, audit: JsonlMessageLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn title(&self, conversation: &ConversationId) -> Option<String> {
        self.lock().titles.get(conversation).cloned()
    }

    pub fn usage(&self, session: &SessionId) -> Option<(Usage, SessionOutcome)> {
        self.lock().usages.get(session).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().expect("session store lock poisoned")
    }

    fn check(state: &StoreState, lease: &StoreLease) -> Result<(), StoreError> {
        match state.leases.get(lease.session()) {
            Some(token) if *token == lease.token() => Ok(()),
            Some(_) => Err(StoreError::LeaseRejected(lease.session().clone())),
            None => Err(StoreError::NotFound(lease.session().clone())),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, session: &Session) -> Result<StoreLease, StoreError> {
        let mut state = self.lock();
        if state.leases.contains_key(session.id()) {
            return Err(StoreError::LeaseHeld(session.id().clone()));
        }
        state.next_token += 1;
        let token = state.next_token;
        state.leases.insert(session.id().clone(), token);
        state.sessions.insert(session.id().clone(), session.clone());
        Ok(StoreLease::new(session.id().clone(), token))
    }

    async fn append_stage_result(
        &self,
        lease: &StoreLease,
        stage: &StageState,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check(&state, lease)?;
        state
            .stage_results
            .entry(lease.session().clone())
            .or_default()
            .push(stage.clone());
        Ok(())
    }

    async fn finalize_message(
        &self,
        lease: &StoreLease,
        record: &MessageRecord,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check(&state, lease)?;
        state
            .records
            .insert(lease.session().clone(), record.clone());
        drop(state);

        if let Some(audit) = &self.audit {
            audit.append(record);
        }
        Ok(())
    }

    async fn record_usage(
        &self,
        lease: &StoreLease,
        usage: &Usage,
        outcome: SessionOutcome,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check(&state, lease)?;
        // Idempotent: the first write for a session wins.
        state
            .usages
            .entry(lease.session().clone())
            .or_insert((*usage, outcome));
        Ok(())
    }

    async fn upsert_conversation_title(
        &self,
        lease: &StoreLease,
        conversation: &ConversationId,
        title: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check(&state, lease)?;
        state
            .titles
            .entry(conversation.clone())
            .or_insert_with(|| title.to_string());
        Ok(())
    }

    async fn release(&self, lease: StoreLease) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check(&state, &lease)?;
        state.leases.remove(lease.session());
        Ok(())
    }

    async fn load_message(
        &self,
        session: &SessionId,
    ) -> Result<Option<MessageRecord>, StoreError> {
        Ok(self.lock().records.get(session).cloned())
    }
}
