//! Engine parameters for deliberation loop control.
//!
//! [`EngineConfig`] groups the static knobs the orchestrator, stage
//! executor and call runner read. Loaded once at process start and passed
//! in explicitly; there is no module-level mutable state shared between
//! sessions.

use council_domain::ContextBudget;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Static parameters for the deliberation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Retries per model after a transient gateway failure (`R`).
    pub retries: u32,
    /// Base delay for exponential backoff between retries.
    pub backoff_base: Duration,
    /// Per-worker soft timeout; one attempt over this counts as a
    /// transient timeout and retries.
    pub worker_soft_timeout: Duration,
    /// Per-worker hard timeout; the whole call over this is an error.
    pub worker_hard_timeout: Duration,
    /// Stage hard timeout; forces degraded when the policy allows it,
    /// failed otherwise.
    pub stage_timeout: Duration,
    /// Session hard timeout; forces a stop.
    pub session_timeout: Duration,
    /// How long cancellation waits for workers before fabricating their
    /// cancelled finishes.
    pub cancel_grace: Duration,
    /// Global cap on concurrently executing workers across all sessions.
    pub concurrency: usize,
    /// Idle interval after which a heartbeat event is emitted (`H`).
    pub heartbeat_interval: Duration,
    /// Undelivered events buffered before token coalescing kicks in
    /// (`B_evt`).
    pub event_buffer: usize,
    /// Minimum successful drafters for a degraded stage 1.
    pub min_draft_workers: usize,
    /// Minimum successful rankers for a degraded stage 2.
    pub min_rank_workers: usize,
    /// Character budgets for the context bundle.
    pub context_budget: ContextBudget,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retries: 2,
            backoff_base: Duration::from_millis(500),
            worker_soft_timeout: Duration::from_secs(90),
            worker_hard_timeout: Duration::from_secs(150),
            stage_timeout: Duration::from_secs(240),
            session_timeout: Duration::from_secs(600),
            cancel_grace: Duration::from_secs(5),
            concurrency: 32,
            heartbeat_interval: Duration::from_secs(15),
            event_buffer: 256,
            min_draft_workers: 3,
            min_rank_workers: 3,
            context_budget: ContextBudget::default(),
        }
    }
}

impl EngineConfig {
    // ==================== Builder Methods ====================

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_event_buffer(mut self, events: usize) -> Self {
        self.event_buffer = events;
        self
    }

    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.concurrency = workers;
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }
}
