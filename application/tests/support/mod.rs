//! Scripted collaborators for driving the engine end to end without a
//! network, a store, or a billing system.

use async_trait::async_trait;
use council_application::ports::llm_gateway::{
    ChatRequest, ChatStream, GatewayError, LlmGateway, StreamChunk,
};
use council_application::ports::model_registry::{ModelRegistry, RegistryError};
use council_application::ports::quota_gate::{Admission, QuotaError, QuotaGate};
use council_application::ports::session_store::{SessionStore, StoreError, StoreLease};
use council_application::ports::context_source::{ContextError, ContextSelectors, ContextSource};
use council_domain::{
    CompanyId, ConversationId, Fragment, MessageRecord, ModelChoice, Purpose, Session, SessionId,
    SessionOutcome, StageState, Usage, UserId,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

// ==================== Gateway ====================

/// Per-model behaviour for the scripted gateway.
#[derive(Clone)]
pub enum ModelScript {
    /// Stream these tokens, one per poll, then end cleanly.
    Stream { tokens: Vec<String>, usage: Option<Usage> },
    /// Wait before the first token, then stream.
    Stall { delay: Duration, tokens: Vec<String> },
    /// Always fail with a server error.
    ServerError,
    /// Emit one token, then park until the call is dropped.
    Hang,
}

impl ModelScript {
    pub fn answer(text: &str) -> Self {
        ModelScript::Stream {
            tokens: text
                .split_inclusive(' ')
                .map(|s| s.to_string())
                .collect(),
            usage: None,
        }
    }
}

/// Gateway whose responses are keyed by model id. Deterministic byte
/// streams, as the round-trip property requires.
pub struct ScriptedGateway {
    scripts: HashMap<String, ModelScript>,
}

impl ScriptedGateway {
    pub fn new(scripts: HashMap<String, ModelScript>) -> Self {
        Self { scripts }
    }
}

#[async_trait]
impl LlmGateway for ScriptedGateway {
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, GatewayError> {
        let script = self
            .scripts
            .get(&request.model)
            .cloned()
            .unwrap_or_else(|| ModelScript::answer("unscripted model"));

        match script {
            ModelScript::Stream { tokens, usage } => {
                let mut chunks: Vec<Result<StreamChunk, GatewayError>> = tokens
                    .into_iter()
                    .map(|t| Ok(StreamChunk::Token(t)))
                    .collect();
                if let Some(usage) = usage {
                    chunks.push(Ok(StreamChunk::Usage(usage)));
                }
                Ok(futures::stream::iter(chunks).boxed())
            }
            ModelScript::Stall { delay, tokens } => {
                let stream = futures::stream::once(async move {
                    tokio::time::sleep(delay).await;
                    futures::stream::iter(
                        tokens
                            .into_iter()
                            .map(|t| Ok(StreamChunk::Token(t)))
                            .collect::<Vec<_>>(),
                    )
                })
                .flatten();
                Ok(stream.boxed())
            }
            ModelScript::ServerError => Err(GatewayError::ServerError("scripted 500".into())),
            ModelScript::Hang => {
                let stream = futures::stream::unfold(0u32, |step| async move {
                    match step {
                        0 => Some((Ok(StreamChunk::Token("partial".into())), 1)),
                        _ => {
                            futures::future::pending::<()>().await;
                            None
                        }
                    }
                });
                Ok(stream.boxed())
            }
        }
    }
}

// ==================== Registry ====================

/// Fixed model sets with the production minimum-count rule. Fallback
/// spares live outside the active sets, like lower-priority registry
/// entries would.
pub struct StaticRegistry {
    pub stage1: Vec<ModelChoice>,
    pub stage2: Vec<ModelChoice>,
    pub stage3: Vec<ModelChoice>,
    pub spares: HashMap<Purpose, Vec<ModelChoice>>,
}

impl StaticRegistry {
    pub fn panel(stage1: &[&str], stage2: &[&str], stage3: &[&str]) -> Self {
        let choices = |models: &[&str]| {
            models
                .iter()
                .enumerate()
                .map(|(i, m)| ModelChoice::new("mock", *m, i as u32))
                .collect()
        };
        Self {
            stage1: choices(stage1),
            stage2: choices(stage2),
            stage3: choices(stage3),
            spares: HashMap::new(),
        }
    }

    pub fn with_spare(mut self, purpose: Purpose, model: &str) -> Self {
        let priority = 100 + self.spares.values().map(Vec::len).sum::<usize>() as u32;
        self.spares
            .entry(purpose)
            .or_default()
            .push(ModelChoice::new("mock", model, priority));
        self
    }

    fn set(&self, purpose: Purpose) -> &[ModelChoice] {
        match purpose {
            Purpose::Stage1 => &self.stage1,
            Purpose::Stage2 => &self.stage2,
            Purpose::Stage3 => &self.stage3,
        }
    }
}

#[async_trait]
impl ModelRegistry for StaticRegistry {
    async fn resolve(
        &self,
        _company: Option<&CompanyId>,
        purpose: Purpose,
    ) -> Result<Vec<ModelChoice>, RegistryError> {
        let set = self.set(purpose);
        if set.len() < purpose.min_models() {
            return Err(RegistryError::ConfigIncomplete {
                purpose,
                found: set.len(),
                required: purpose.min_models(),
            });
        }
        Ok(set.to_vec())
    }

    async fn choose_fallback(
        &self,
        _company: Option<&CompanyId>,
        purpose: Purpose,
        tried: &[String],
    ) -> Option<ModelChoice> {
        self.spares
            .get(&purpose)?
            .iter()
            .find(|c| !tried.contains(&c.model))
            .cloned()
    }
}

// ==================== Quota ====================

/// Gate with a fixed admission answer that records every debit call.
pub struct RecordingQuota {
    admission: Admission,
    debits: Mutex<Vec<(SessionId, Usage)>>,
}

impl RecordingQuota {
    pub fn allowing() -> Self {
        Self {
            admission: Admission::Allow {
                remaining: Some(10),
            },
            debits: Mutex::new(Vec::new()),
        }
    }

    pub fn denying(admission: Admission) -> Self {
        Self {
            admission,
            debits: Mutex::new(Vec::new()),
        }
    }

    pub fn debits(&self) -> Vec<(SessionId, Usage)> {
        self.debits.lock().unwrap().clone()
    }
}

#[async_trait]
impl QuotaGate for RecordingQuota {
    async fn check(
        &self,
        _user: &UserId,
        _company: Option<&CompanyId>,
    ) -> Result<Admission, QuotaError> {
        Ok(self.admission.clone())
    }

    async fn debit(
        &self,
        _user: &UserId,
        _company: Option<&CompanyId>,
        session: &SessionId,
        usage: &Usage,
    ) -> Result<(), QuotaError> {
        self.debits.lock().unwrap().push((session.clone(), *usage));
        Ok(())
    }
}

// ==================== Store ====================

#[derive(Default)]
struct TestStoreInner {
    next_token: u64,
    leases: HashMap<SessionId, u64>,
    sessions: Vec<SessionId>,
    stage_results: Vec<(SessionId, StageState)>,
    records: HashMap<SessionId, MessageRecord>,
    usages: HashMap<SessionId, (Usage, SessionOutcome)>,
    titles: HashMap<ConversationId, String>,
}

/// In-memory store double with real lease checking.
#[derive(Default)]
pub struct TestStore {
    inner: Mutex<TestStoreInner>,
}

impl TestStore {
    pub fn record(&self, session: &SessionId) -> Option<MessageRecord> {
        self.inner.lock().unwrap().records.get(session).cloned()
    }

    pub fn title(&self, conversation: &ConversationId) -> Option<String> {
        self.inner.lock().unwrap().titles.get(conversation).cloned()
    }

    pub fn stage_result_count(&self, session: &SessionId) -> usize {
        self.inner
            .lock()
            .unwrap()
            .stage_results
            .iter()
            .filter(|(id, _)| id == session)
            .count()
    }

    fn check(&self, inner: &TestStoreInner, lease: &StoreLease) -> Result<(), StoreError> {
        match inner.leases.get(lease.session()) {
            Some(token) if *token == lease.token() => Ok(()),
            Some(_) => Err(StoreError::LeaseRejected(lease.session().clone())),
            None => Err(StoreError::NotFound(lease.session().clone())),
        }
    }
}

#[async_trait]
impl SessionStore for TestStore {
    async fn create_session(&self, session: &Session) -> Result<StoreLease, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.leases.contains_key(session.id()) {
            return Err(StoreError::LeaseHeld(session.id().clone()));
        }
        inner.next_token += 1;
        let token = inner.next_token;
        inner.leases.insert(session.id().clone(), token);
        inner.sessions.push(session.id().clone());
        Ok(StoreLease::new(session.id().clone(), token))
    }

    async fn append_stage_result(
        &self,
        lease: &StoreLease,
        stage: &StageState,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        self.check(&inner, lease)?;
        inner
            .stage_results
            .push((lease.session().clone(), stage.clone()));
        Ok(())
    }

    async fn finalize_message(
        &self,
        lease: &StoreLease,
        record: &MessageRecord,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        self.check(&inner, lease)?;
        inner
            .records
            .insert(lease.session().clone(), record.clone());
        Ok(())
    }

    async fn record_usage(
        &self,
        lease: &StoreLease,
        usage: &Usage,
        outcome: SessionOutcome,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        self.check(&inner, lease)?;
        inner
            .usages
            .insert(lease.session().clone(), (*usage, outcome));
        Ok(())
    }

    async fn upsert_conversation_title(
        &self,
        lease: &StoreLease,
        conversation: &ConversationId,
        title: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        self.check(&inner, lease)?;
        inner
            .titles
            .entry(conversation.clone())
            .or_insert_with(|| title.to_string());
        Ok(())
    }

    async fn release(&self, lease: StoreLease) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        self.check(&inner, &lease)?;
        inner.leases.remove(lease.session());
        Ok(())
    }

    async fn load_message(
        &self,
        session: &SessionId,
    ) -> Result<Option<MessageRecord>, StoreError> {
        Ok(self.inner.lock().unwrap().records.get(session).cloned())
    }
}

// ==================== Context ====================

/// Fixed fragment snapshot.
pub struct StaticContext(pub Vec<Fragment>);

#[async_trait]
impl ContextSource for StaticContext {
    async fn fetch(
        &self,
        _company: Option<&CompanyId>,
        _selectors: &ContextSelectors,
    ) -> Result<Vec<Fragment>, ContextError> {
        Ok(self.0.clone())
    }
}
