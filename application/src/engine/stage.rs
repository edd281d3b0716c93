//! One stage, executed: N workers fanned out in parallel, their token
//! streams merged into the session's event channel in arrival order.
//!
//! The executor emits `WorkerStarted`, `WorkerToken` and `WorkerFinished`
//! events and returns a [`StageReport`]; the orchestrator narrates the
//! stage boundaries (`StageStarted`, `RankingAggregated`, `StageFinished`)
//! around it. Within one worker, events are causally ordered: no token for
//! a role follows its finish. Between workers, interleaving is arbitrary.
//!
//! Cancellation and the stage hard timeout are cooperative but bounded:
//! once either fires, workers get the grace window to wind down, after
//! which their tasks are aborted and `cancelled` finishes are fabricated.

use crate::config::EngineConfig;
use crate::engine::broadcast::EventPublisher;
use crate::engine::client::{CallSpec, LlmCallRunner, TokenSink};
use crate::engine::pool::WorkerPool;
use crate::ports::ChatMessage;
use council_domain::{
    CompanyId, ModelChoice, Purpose, SessionEvent, StageId, StagePolicy, StageStatus, Usage,
    WorkerOutcome, WorkerRole,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One worker to run: its role, its model, and its full prompt.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub role: WorkerRole,
    pub choice: ModelChoice,
    pub messages: Vec<ChatMessage>,
}

/// Everything the executor needs for one stage.
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub stage: StageId,
    pub purpose: Purpose,
    pub company: Option<CompanyId>,
    pub workers: Vec<WorkerSpec>,
    pub policy: StagePolicy,
    pub api_key: Option<String>,
}

/// What one worker produced, including partial text from workers that
/// errored or were cancelled mid-stream.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub role: WorkerRole,
    pub model: String,
    pub text: String,
    pub outcome: WorkerOutcome,
}

/// The executor's verdict on one stage.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: StageId,
    pub status: StageStatus,
    /// In the request's worker order.
    pub workers: Vec<WorkerReport>,
}

impl StageReport {
    pub fn done_count(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.outcome.is_done())
            .count()
    }

    /// Roles that terminated in error or cancelled.
    pub fn lost(&self) -> Vec<String> {
        self.workers
            .iter()
            .filter(|w| !w.outcome.is_done())
            .map(|w| w.role.to_string())
            .collect()
    }

    pub fn usage(&self) -> Usage {
        let mut total = Usage::default();
        for worker in &self.workers {
            total.add(&worker.outcome.usage());
        }
        total
    }
}

/// Runs stages: fan-out, token fan-in, completion policy.
pub struct StageExecutor {
    runner: Arc<LlmCallRunner>,
    pool: WorkerPool,
    config: Arc<EngineConfig>,
}

impl StageExecutor {
    pub fn new(runner: Arc<LlmCallRunner>, pool: WorkerPool, config: Arc<EngineConfig>) -> Self {
        Self {
            runner,
            pool,
            config,
        }
    }

    pub async fn execute(
        &self,
        request: StageRequest,
        events: &EventPublisher,
        cancel: &CancellationToken,
    ) -> StageReport {
        let total = request.workers.len();
        info!(stage = %request.stage, workers = total, "executing stage");

        // FIFO queueing happens here, never inside a running stage.
        let _permits = self.pool.acquire_stage(total.max(1)).await;

        let stage_cancel = cancel.child_token();
        let (agg_tx, mut agg_rx) = mpsc::unbounded_channel::<(WorkerRole, String)>();
        let mut join_set: JoinSet<(WorkerRole, WorkerOutcome)> = JoinSet::new();

        // (role, model, prompt chars) in request order, for reports and
        // fabricated finishes.
        let order: Vec<(WorkerRole, String, usize)> = request
            .workers
            .iter()
            .map(|w| {
                let prompt_chars = w.messages.iter().map(|m| m.content.chars().count()).sum();
                (w.role.clone(), w.choice.model.clone(), prompt_chars)
            })
            .collect();
        let mut texts: HashMap<WorkerRole, String> = order
            .iter()
            .map(|(role, _, _)| (role.clone(), String::new()))
            .collect();

        for spec in request.workers {
            events.publish(SessionEvent::WorkerStarted {
                role: spec.role.to_string(),
                model: spec.choice.model.clone(),
            });

            let sink: TokenSink = {
                let tx = agg_tx.clone();
                let role = spec.role.clone();
                Arc::new(move |fragment: &str| {
                    let _ = tx.send((role.clone(), fragment.to_string()));
                })
            };

            let runner = Arc::clone(&self.runner);
            let call = CallSpec {
                company: request.company.clone(),
                purpose: request.purpose,
                choice: spec.choice,
                messages: spec.messages,
                api_key: request.api_key.clone(),
            };
            let token = stage_cancel.clone();
            let role = spec.role;
            join_set.spawn(async move {
                let outcome = runner.run(call, sink, token).await;
                (role, outcome)
            });
        }
        drop(agg_tx);

        let mut outcomes: HashMap<WorkerRole, WorkerOutcome> = HashMap::new();
        let stage_deadline = tokio::time::sleep(self.config.stage_timeout);
        tokio::pin!(stage_deadline);
        // Armed only once cancellation or the stage deadline fires.
        let grace = tokio::time::sleep(Duration::from_secs(3600));
        tokio::pin!(grace);
        let mut timed_out = false;
        let mut externally_cancelled = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !externally_cancelled && !timed_out => {
                    debug!(stage = %request.stage, "cancellation observed, winding down workers");
                    externally_cancelled = true;
                    stage_cancel.cancel();
                    grace.as_mut().reset(Instant::now() + self.config.cancel_grace);
                }
                Some((role, fragment)) = agg_rx.recv() => {
                    if let Some(buffer) = texts.get_mut(&role) {
                        buffer.push_str(&fragment);
                    }
                    events.publish(SessionEvent::WorkerToken {
                        role: role.to_string(),
                        text: fragment,
                    });
                }
                result = join_set.join_next() => {
                    let Some(result) = result else { break };
                    match result {
                        Ok((role, outcome)) => {
                            events.publish(SessionEvent::WorkerFinished {
                                role: role.to_string(),
                                reason: outcome.finish_reason(),
                                usage: outcome.usage(),
                            });
                            outcomes.insert(role, outcome);
                        }
                        Err(join_err) => {
                            // Aborted or panicked task; its role gets a
                            // fabricated finish below.
                            warn!(error = %join_err, "worker task did not join cleanly");
                        }
                    }
                }
                _ = &mut stage_deadline, if !timed_out && !externally_cancelled => {
                    warn!(stage = %request.stage, "stage hard timeout, winding down workers");
                    timed_out = true;
                    stage_cancel.cancel();
                    grace.as_mut().reset(Instant::now() + self.config.cancel_grace);
                }
                _ = &mut grace, if externally_cancelled || timed_out => {
                    warn!(stage = %request.stage, "grace expired, aborting outstanding workers");
                    join_set.abort_all();
                    break;
                }
            }
        }

        // Fragments that raced the shutdown; only for still-open roles.
        while let Ok((role, fragment)) = agg_rx.try_recv() {
            if outcomes.contains_key(&role) {
                continue;
            }
            if let Some(buffer) = texts.get_mut(&role) {
                buffer.push_str(&fragment);
            }
            events.publish(SessionEvent::WorkerToken {
                role: role.to_string(),
                text: fragment,
            });
        }

        // Fabricate cancelled finishes for workers that never reported.
        for (role, _model, prompt_chars) in &order {
            if outcomes.contains_key(role) {
                continue;
            }
            let emitted = texts.get(role).map(|t| t.chars().count()).unwrap_or(0);
            let usage = Usage::estimate(*prompt_chars, emitted);
            events.publish(SessionEvent::WorkerFinished {
                role: role.to_string(),
                reason: council_domain::FinishReason::Cancelled,
                usage,
            });
            outcomes.insert(role.clone(), WorkerOutcome::Cancelled { usage });
        }

        let done = outcomes.values().filter(|o| o.is_done()).count();
        let status = if externally_cancelled {
            StageStatus::Cancelled
        } else {
            request.policy.judge(done, total)
        };
        info!(stage = %request.stage, ?status, done, total, "stage finished");

        let workers = order
            .into_iter()
            .map(|(role, model, _)| {
                let outcome = outcomes
                    .remove(&role)
                    .expect("every worker has an outcome by now");
                WorkerReport {
                    text: texts.remove(&role).unwrap_or_default(),
                    role,
                    model,
                    outcome,
                }
            })
            .collect();

        StageReport {
            stage: request.stage,
            status,
            workers,
        }
    }
}
