//! The session orchestrator: admission, context, three stages, persistence.
//!
//! One orchestrator instance serves the whole process; each `start` spawns
//! one driver task that owns its session exclusively until termination.
//! The driver is the only writer of the session and the only component
//! that produces session-terminating events. Worker failures are absorbed
//! by stage policy; only stage-level outcomes reach this state machine.
//!
//! States: admitting → composing → stage1 → stage2 → stage3 → persisting
//! → (complete | stopped | failed). Every terminal path passes through
//! persisting: whatever the session produced is written, then quota is
//! debited for sessions that consumed tokens (complete or stopped), then
//! the terminal event closes the stream.

use crate::config::EngineConfig;
use crate::engine::assembler::ContextAssembler;
use crate::engine::broadcast::{EventChannel, EventPublisher, EventSubscriber};
use crate::engine::client::LlmCallRunner;
use crate::engine::pool::WorkerPool;
use crate::engine::stage::{StageExecutor, StageReport, StageRequest, WorkerSpec};
use crate::ports::context_source::{ContextSelectors, ContextSource};
use crate::ports::llm_gateway::{ChatMessage, LlmGateway};
use crate::ports::model_registry::{ModelRegistry, RegistryError};
use crate::ports::quota_gate::{Admission, QuotaGate};
use crate::ports::session_store::{SessionStore, StoreError, StoreLease};
use council_domain::{
    label_for, parse_ranking, CompanyId, ConversationId, MessageId, MessageRecord, ModelChoice,
    PromptTemplate, Purpose, Question, RankedEntry, Session, SessionEvent, SessionId,
    SessionOutcome, StageId, StagePolicy, StageStatus, StopCause, UserId, WorkerRole, WorkerState,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// What a caller provides to open a session.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub user: UserId,
    pub company: Option<CompanyId>,
    /// Absent for a new conversation; the orchestrator mints one.
    pub conversation: Option<ConversationId>,
    pub question: Question,
    pub attachments: Vec<String>,
    pub selectors: ContextSelectors,
    /// BYOK gateway key, already checked as present-and-active upstream.
    /// Overrides the platform key for every call of this session.
    pub api_key: Option<String>,
}

/// Returned by `start`: the session id plus its live event stream.
pub struct SessionHandle {
    pub session_id: SessionId,
    pub events: EventSubscriber,
}

/// Session-scoped cancellation with a recorded cause. The first stop
/// wins; later causes are ignored.
struct StopSignal {
    token: CancellationToken,
    cause: Mutex<Option<StopCause>>,
}

impl StopSignal {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            cause: Mutex::new(None),
        }
    }

    fn stop(&self, cause: StopCause) {
        let mut slot = self.cause.lock().expect("stop cause lock poisoned");
        if slot.is_none() {
            *slot = Some(cause);
        }
        drop(slot);
        self.token.cancel();
    }

    fn cause(&self) -> Option<StopCause> {
        *self.cause.lock().expect("stop cause lock poisoned")
    }
}

struct RunningSession {
    channel: EventChannel,
    stop: Arc<StopSignal>,
}

/// What the deliberation accumulated for the persisted record.
#[derive(Default)]
struct RecordParts {
    labels: Vec<(WorkerRole, char)>,
    ballots: Vec<(WorkerRole, Vec<char>)>,
    aggregate: Vec<RankedEntry>,
}

/// How the deliberation ended, before persisting.
enum DriveEnd {
    Completed,
    Failed { code: String, message: String },
    Stopped,
}

/// The top-level deliberation engine.
#[derive(Clone)]
pub struct SessionOrchestrator {
    registry: Arc<dyn ModelRegistry>,
    quota: Arc<dyn QuotaGate>,
    store: Arc<dyn SessionStore>,
    assembler: Arc<ContextAssembler>,
    executor: Arc<StageExecutor>,
    config: Arc<EngineConfig>,
    running: Arc<Mutex<HashMap<SessionId, RunningSession>>>,
}

impl SessionOrchestrator {
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        registry: Arc<dyn ModelRegistry>,
        quota: Arc<dyn QuotaGate>,
        store: Arc<dyn SessionStore>,
        context: Arc<dyn ContextSource>,
        config: EngineConfig,
    ) -> Self {
        let config = Arc::new(config);
        let runner = Arc::new(LlmCallRunner::new(
            gateway,
            Arc::clone(&registry),
            Arc::clone(&config),
        ));
        let pool = WorkerPool::new(config.concurrency);
        let executor = Arc::new(StageExecutor::new(runner, pool, Arc::clone(&config)));
        let assembler = Arc::new(ContextAssembler::new(context, config.context_budget));

        Self {
            registry,
            quota,
            store,
            assembler,
            executor,
            config,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Open a session and return its event stream. All further progress,
    /// including admission failures, arrives on the stream.
    pub fn start(&self, request: StartRequest) -> SessionHandle {
        let session_id = SessionId::new(Uuid::new_v4().to_string());
        let fresh_conversation = request.conversation.is_none();
        let conversation = request
            .conversation
            .clone()
            .unwrap_or_else(|| ConversationId::new(Uuid::new_v4().to_string()));

        let channel = EventChannel::new(self.config.event_buffer);
        let heartbeat = channel.spawn_heartbeat(self.config.heartbeat_interval);
        let stop = Arc::new(StopSignal::new());
        let subscriber = channel.subscribe();

        self.running
            .lock()
            .expect("running sessions lock poisoned")
            .insert(
                session_id.clone(),
                RunningSession {
                    channel: channel.clone(),
                    stop: Arc::clone(&stop),
                },
            );

        // Session hard timeout: forces a stop, never a hang.
        let watchdog = {
            let stop = Arc::clone(&stop);
            let timeout = self.config.session_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                stop.stop(StopCause::Timeout);
            })
        };

        let this = self.clone();
        let id = session_id.clone();
        tokio::spawn(async move {
            this.drive(id.clone(), request, conversation, fresh_conversation, channel, stop)
                .await;
            watchdog.abort();
            heartbeat.abort();
            this.running
                .lock()
                .expect("running sessions lock poisoned")
                .remove(&id);
        });

        SessionHandle {
            session_id,
            events: subscriber,
        }
    }

    /// Ask a running session to cancel. Returns false when the session is
    /// not running.
    pub fn stop(&self, session_id: &SessionId) -> bool {
        let running = self.running.lock().expect("running sessions lock poisoned");
        match running.get(session_id) {
            Some(session) => {
                info!(session = %session_id, "stop requested");
                session.stop.stop(StopCause::User);
                true
            }
            None => false,
        }
    }

    /// Reattach a subscriber to a running session, resuming after
    /// `last_seq` when given. `None` when the session is not running;
    /// terminated sessions are served from the store instead.
    pub fn attach(&self, session_id: &SessionId, last_seq: Option<u64>) -> Option<EventSubscriber> {
        let running = self.running.lock().expect("running sessions lock poisoned");
        running.get(session_id).map(|session| match last_seq {
            Some(seq) => session.channel.subscribe_from(seq),
            None => session.channel.subscribe(),
        })
    }

    async fn drive(
        &self,
        session_id: SessionId,
        request: StartRequest,
        conversation: ConversationId,
        fresh_conversation: bool,
        channel: EventChannel,
        stop: Arc<StopSignal>,
    ) {
        let publisher = channel.publisher();
        let mut session = Session::new(
            session_id.clone(),
            request.user.clone(),
            request.company.clone(),
            conversation,
            request.question.clone(),
            now_ms(),
        )
        .with_attachments(request.attachments.clone());

        // The session row and its write lease exist before any work. A
        // store outage degrades to an unpersisted session, not a dead one.
        let lease = match self.store.create_session(&session).await {
            Ok(lease) => Some(lease),
            Err(err) => {
                error!(session = %session_id, error = %err, "session row could not be created");
                None
            }
        };

        let mut parts = RecordParts::default();
        let end = self
            .run_deliberation(&mut session, &request, &mut parts, &lease, &publisher, &stop)
            .await;

        let (outcome, terminal) = match end {
            DriveEnd::Completed => (
                SessionOutcome::Complete,
                SessionEvent::SessionCompleted {
                    usage: session.usage(),
                },
            ),
            DriveEnd::Failed { code, message } => {
                (SessionOutcome::Failed, SessionEvent::SessionFailed { code, message })
            }
            DriveEnd::Stopped => (
                SessionOutcome::Stopped,
                SessionEvent::SessionStopped {
                    by: stop.cause().unwrap_or(StopCause::User),
                },
            ),
        };

        if let Err(err) = session.terminate(outcome, now_ms()) {
            warn!(session = %session_id, error = %err, "session terminated twice");
        }

        // persisting: always, with whatever was produced.
        self.persist_terminal(&session, &parts, &lease, fresh_conversation)
            .await;

        // Tokens were consumed either way for complete and stopped runs.
        if matches!(outcome, SessionOutcome::Complete | SessionOutcome::Stopped) {
            if let Err(err) = self
                .quota
                .debit(session.user(), session.company(), session.id(), &session.usage())
                .await
            {
                warn!(session = %session_id, error = %err, "usage debit failed");
            }
        }

        info!(session = %session_id, outcome = %outcome, "session terminated");
        publisher.publish(terminal);
    }

    /// Admission through synthesis. Returns how to terminate; the caller
    /// owns persisting and the terminal event.
    async fn run_deliberation(
        &self,
        session: &mut Session,
        request: &StartRequest,
        parts: &mut RecordParts,
        lease: &Option<StoreLease>,
        publisher: &EventPublisher,
        stop: &StopSignal,
    ) -> DriveEnd {
        let cancel = stop.token.clone();

        // --- admitting ---
        match self.quota.check(session.user(), session.company()).await {
            Ok(Admission::Allow { remaining }) => {
                publisher.publish(SessionEvent::SessionOpened {
                    session_id: session.id().to_string(),
                    remaining,
                });
            }
            Ok(Admission::Deny { kind, message }) => {
                info!(session = %session.id(), kind = kind.code(), "admission denied");
                return DriveEnd::Failed {
                    code: "admission_denied".into(),
                    message: format!("{}: {}", kind.code(), message),
                };
            }
            Err(err) => {
                // Fail closed: an unreachable quota service admits nobody.
                warn!(session = %session.id(), error = %err, "quota check unavailable");
                return DriveEnd::Failed {
                    code: "admission_denied".into(),
                    message: format!("quota service unavailable: {}", err),
                };
            }
        }

        // --- composing ---
        let bundle = match self
            .assembler
            .assemble(session.company(), &request.selectors, session.question())
            .await
        {
            Ok(bundle) => bundle,
            Err(err) => {
                return DriveEnd::Failed {
                    code: err.code().into(),
                    message: err.to_string(),
                }
            }
        };
        session.set_system_prompt(bundle.system_prompt());

        let models = match self.resolve_model_sets(session.company()).await {
            Ok(models) => models,
            Err(err) => {
                return DriveEnd::Failed {
                    code: "config_incomplete".into(),
                    message: err.to_string(),
                }
            }
        };
        let question = session.question().content().to_string();
        let system_context = bundle.system_prompt();

        // --- stage 1: draft ---
        publisher.publish(SessionEvent::StageStarted {
            stage: StageId::Draft,
            ranking: None,
        });
        let draft_specs = models
            .stage1
            .iter()
            .enumerate()
            .map(|(i, choice)| WorkerSpec {
                role: WorkerRole::draft(i),
                choice: choice.clone(),
                messages: vec![
                    ChatMessage::system(PromptTemplate::draft_system(&system_context)),
                    ChatMessage::user(PromptTemplate::draft_user(&question)),
                ],
            })
            .collect();
        let draft_report = self
            .run_stage(
                session,
                StageId::Draft,
                Purpose::Stage1,
                draft_specs,
                StagePolicy::AllOrDegraded {
                    min: self.config.min_draft_workers,
                },
                request,
                lease,
                publisher,
                &cancel,
            )
            .await;
        publisher.publish(SessionEvent::StageFinished {
            stage: StageId::Draft,
            status: draft_report.status,
            lost: draft_report.lost(),
        });
        match draft_report.status {
            StageStatus::Cancelled => return DriveEnd::Stopped,
            StageStatus::Failed => {
                return DriveEnd::Failed {
                    code: "stage_failed".into(),
                    message: "stage draft did not meet its minimum".into(),
                }
            }
            _ => {}
        }
        if cancel.is_cancelled() {
            return DriveEnd::Stopped;
        }

        // Anonymise the surviving drafts in stage-1 order. The mapping
        // stays in here; rankers only ever see labels.
        let participants: Vec<(char, String, String)> = draft_report
            .workers
            .iter()
            .filter(|w| w.outcome.is_done())
            .enumerate()
            .filter_map(|(i, w)| {
                label_for(i).map(|label| (label, w.model.clone(), w.text.clone()))
            })
            .collect();
        parts.labels = draft_report
            .workers
            .iter()
            .filter(|w| w.outcome.is_done())
            .enumerate()
            .filter_map(|(i, w)| label_for(i).map(|label| (w.role.clone(), label)))
            .collect();
        let labelled: Vec<(char, String)> = participants
            .iter()
            .map(|(label, _, text)| (*label, text.clone()))
            .collect();

        // --- stage 2: rank ---
        publisher.publish(SessionEvent::StageStarted {
            stage: StageId::Rank,
            ranking: None,
        });
        let rank_specs = models
            .stage2
            .iter()
            .enumerate()
            .map(|(i, choice)| WorkerSpec {
                role: WorkerRole::ranker(i),
                choice: choice.clone(),
                messages: vec![
                    ChatMessage::system(PromptTemplate::rank_system()),
                    ChatMessage::user(PromptTemplate::rank_user(&question, &labelled)),
                ],
            })
            .collect();
        let rank_report = self
            .run_stage(
                session,
                StageId::Rank,
                Purpose::Stage2,
                rank_specs,
                StagePolicy::AllOrDegraded {
                    min: self.config.min_rank_workers,
                },
                request,
                lease,
                publisher,
                &cancel,
            )
            .await;
        if rank_report.status == StageStatus::Cancelled {
            publisher.publish(SessionEvent::StageFinished {
                stage: StageId::Rank,
                status: rank_report.status,
                lost: rank_report.lost(),
            });
            return DriveEnd::Stopped;
        }

        // The ranking is advisory: the session reaches synthesis no matter
        // how stage 2 ended. A stage that missed its minimum contributes
        // nothing, though: its ballots never aggregate, synthesis runs with
        // ranking unavailable, and the record stores an empty ranking.
        let alphabet: Vec<char> = participants.iter().map(|(label, _, _)| *label).collect();
        parts.ballots = rank_report
            .workers
            .iter()
            .filter(|w| w.outcome.is_done())
            .map(|w| (w.role.clone(), parse_ranking(&w.text, &alphabet)))
            .collect();
        if rank_report.status != StageStatus::Failed {
            let panel: Vec<(char, String)> = participants
                .iter()
                .map(|(label, model, _)| (*label, model.clone()))
                .collect();
            let ballots: Vec<Vec<char>> = parts.ballots.iter().map(|(_, b)| b.clone()).collect();
            parts.aggregate = council_domain::aggregate(&panel, &ballots);
        }

        publisher.publish(SessionEvent::RankingAggregated {
            entries: parts.aggregate.clone(),
        });
        publisher.publish(SessionEvent::StageFinished {
            stage: StageId::Rank,
            status: rank_report.status,
            lost: rank_report.lost(),
        });
        if cancel.is_cancelled() {
            return DriveEnd::Stopped;
        }

        // --- stage 3: synth ---
        let ranking = (!parts.aggregate.is_empty()).then(|| parts.aggregate.clone());
        publisher.publish(SessionEvent::StageStarted {
            stage: StageId::Synth,
            ranking: ranking.clone(),
        });
        let chairman = models.stage3[0].clone();
        let synth_specs = vec![WorkerSpec {
            role: WorkerRole::chairman(),
            choice: chairman,
            messages: vec![
                ChatMessage::system(PromptTemplate::synth_system(&system_context)),
                ChatMessage::user(PromptTemplate::synth_user(
                    &question,
                    &labelled,
                    ranking.as_deref(),
                )),
            ],
        }];
        let synth_report = self
            .run_stage(
                session,
                StageId::Synth,
                Purpose::Stage3,
                synth_specs,
                StagePolicy::Single,
                request,
                lease,
                publisher,
                &cancel,
            )
            .await;
        publisher.publish(SessionEvent::StageFinished {
            stage: StageId::Synth,
            status: synth_report.status,
            lost: synth_report.lost(),
        });
        match synth_report.status {
            StageStatus::Cancelled => DriveEnd::Stopped,
            StageStatus::Complete => DriveEnd::Completed,
            _ => DriveEnd::Failed {
                code: "stage_failed".into(),
                message: "stage synth failed".into(),
            },
        }
    }

    /// Run one stage and mirror its report into the session. Boundary
    /// events (`StageStarted`, `RankingAggregated`, `StageFinished`) are
    /// the deliberation loop's job, so the ranking aggregate can slot in
    /// between the last worker finish and the stage finish.
    #[allow(clippy::too_many_arguments)]
    async fn run_stage(
        &self,
        session: &mut Session,
        stage: StageId,
        purpose: Purpose,
        workers: Vec<WorkerSpec>,
        policy: StagePolicy,
        request: &StartRequest,
        lease: &Option<StoreLease>,
        publisher: &EventPublisher,
        cancel: &CancellationToken,
    ) -> StageReport {
        let stage_request = StageRequest {
            stage,
            purpose,
            company: request.company.clone(),
            workers,
            policy,
            api_key: request.api_key.clone(),
        };
        let report = self.executor.execute(stage_request, publisher, cancel).await;
        self.record_stage(session, &report);

        // Stage results are written as they land; a failed append is
        // telemetry, the session carries on.
        if let Some(lease) = lease {
            let stage_state = session.stage(report.stage).clone();
            if let Err(err) = self.store.append_stage_result(lease, &stage_state).await {
                warn!(
                    session = %session.id(),
                    stage = %report.stage,
                    error = %err,
                    "stage result could not be appended"
                );
            }
        }
        report
    }

    /// Mirror an executor report into the session aggregate.
    fn record_stage(&self, session: &mut Session, report: &StageReport) {
        let stage = session.stage_mut(report.stage);
        let mut workers = Vec::with_capacity(report.workers.len());
        for worker in &report.workers {
            let mut state = WorkerState::new(worker.role.clone(), worker.model.clone());
            let _ = state.append_text(&worker.text);
            if let Err(err) = state.finish(&worker.outcome) {
                warn!(role = %worker.role, error = %err, "worker state finish rejected");
            }
            workers.push(state);
        }
        stage.begin(workers);
        stage.set_status(report.status);
        session.add_usage(&report.usage());
        session.touch(now_ms());
    }

    async fn resolve_model_sets(
        &self,
        company: Option<&CompanyId>,
    ) -> Result<ModelSets, RegistryError> {
        Ok(ModelSets {
            stage1: self.registry.resolve(company, Purpose::Stage1).await?,
            stage2: self.registry.resolve(company, Purpose::Stage2).await?,
            stage3: self.registry.resolve(company, Purpose::Stage3).await?,
        })
    }

    /// Write the message record, usage and title, each with bounded
    /// retries. Divergence is telemetry, never a session failure.
    async fn persist_terminal(
        &self,
        session: &Session,
        parts: &RecordParts,
        lease: &Option<StoreLease>,
        fresh_conversation: bool,
    ) {
        let record = build_record(session, parts);

        let Some(lease) = lease else {
            error!(
                session = %session.id(),
                "persistence divergence: session has no store lease"
            );
            return;
        };

        let ok = persist_with_retries("finalize_message", || {
            self.store.finalize_message(lease, &record)
        })
        .await;
        let usage = session.usage();
        let outcome = session.outcome();
        let ok = persist_with_retries("record_usage", || {
            self.store.record_usage(lease, &usage, outcome)
        })
        .await
            && ok;

        if fresh_conversation {
            let title = session.question().derive_title();
            let _ = persist_with_retries("upsert_conversation_title", || {
                self.store
                    .upsert_conversation_title(lease, session.conversation(), &title)
            })
            .await;
        }

        if let Err(err) = self.store.release(lease.clone()).await {
            warn!(session = %session.id(), error = %err, "lease release failed");
        }

        if !ok {
            error!(
                session = %session.id(),
                outcome = %session.outcome(),
                "persistence divergence: record could not be saved"
            );
        }
    }
}

struct ModelSets {
    stage1: Vec<ModelChoice>,
    stage2: Vec<ModelChoice>,
    stage3: Vec<ModelChoice>,
}

/// Three attempts with a short linear backoff.
async fn persist_with_retries<F, Fut>(op: &str, mut call: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), StoreError>>,
{
    for attempt in 0u32..3 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
        }
        match call().await {
            Ok(()) => return true,
            Err(err) => warn!(op, attempt, error = %err, "persistence write failed"),
        }
    }
    false
}

fn build_record(session: &Session, parts: &RecordParts) -> MessageRecord {
    let drafts = session
        .stage(StageId::Draft)
        .workers()
        .iter()
        .map(|w| council_domain::DraftOutput {
            role: w.role().to_string(),
            model: w.model().to_string(),
            label: parts
                .labels
                .iter()
                .find(|(role, _)| role == w.role())
                .map(|(_, label)| *label),
            text: w.text().to_string(),
            finish: w
                .finish_reason()
                .unwrap_or(council_domain::FinishReason::Cancelled),
            usage: w.usage(),
        })
        .collect();

    let rankers = session
        .stage(StageId::Rank)
        .workers()
        .iter()
        .map(|w| council_domain::RankerOutput {
            role: w.role().to_string(),
            model: w.model().to_string(),
            text: w.text().to_string(),
            ballot: parts
                .ballots
                .iter()
                .find(|(role, _)| role == w.role())
                .map(|(_, ballot)| ballot.clone())
                .unwrap_or_default(),
            usage: w.usage(),
        })
        .collect();

    let synthesis = session
        .stage(StageId::Synth)
        .workers()
        .iter()
        .find(|w| w.status() == council_domain::WorkerStatus::Done)
        .map(|w| council_domain::Synthesis {
            model: w.model().to_string(),
            text: w.text().to_string(),
            usage: w.usage(),
        });

    MessageRecord {
        message_id: MessageId::new(Uuid::new_v4().to_string()),
        session_id: session.id().clone(),
        conversation_id: session.conversation().clone(),
        question: session.question().content().to_string(),
        drafts,
        rankers,
        aggregate_ranking: parts.aggregate.clone(),
        synthesis,
        usage: session.usage(),
        outcome: session.outcome(),
        created_at_ms: session.created_at_ms(),
    }
}
