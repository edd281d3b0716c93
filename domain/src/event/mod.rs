//! The typed event protocol a session emits to its subscriber.
//!
//! Events cross the wire as one JSON object per line:
//! `{"seq": <n>, "ts": <ms>, "type": <kind>, "payload": {…}}`. `seq`
//! starts at 1 per session and increments with no gaps; the stream ends
//! after exactly one terminal event.

use crate::core::usage::Usage;
use crate::ranking::RankedEntry;
use crate::session::stage::{StageId, StageStatus};
use crate::session::worker::FinishReason;
use serde::{Deserialize, Serialize};

/// Who asked the session to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCause {
    User,
    Timeout,
}

/// Everything a subscriber can observe about a running session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionOpened {
        session_id: String,
        /// Quota remaining before this session, when the gate reports it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remaining: Option<u64>,
    },
    StageStarted {
        stage: StageId,
        /// Set only for the synthesis stage: the aggregate ranking it was
        /// handed, or `None` when ranking was unavailable.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ranking: Option<Vec<RankedEntry>>,
    },
    WorkerStarted {
        role: String,
        model: String,
    },
    WorkerToken {
        role: String,
        text: String,
    },
    WorkerFinished {
        role: String,
        reason: FinishReason,
        usage: Usage,
    },
    RankingAggregated {
        entries: Vec<RankedEntry>,
    },
    StageFinished {
        stage: StageId,
        status: StageStatus,
        /// Roles that terminated in error or cancelled.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        lost: Vec<String>,
    },
    SessionStopped {
        by: StopCause,
    },
    SessionCompleted {
        usage: Usage,
    },
    SessionFailed {
        code: String,
        message: String,
    },
    Heartbeat {
        counter: u64,
    },
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::SessionOpened { .. } => "session_opened",
            SessionEvent::StageStarted { .. } => "stage_started",
            SessionEvent::WorkerStarted { .. } => "worker_started",
            SessionEvent::WorkerToken { .. } => "worker_token",
            SessionEvent::WorkerFinished { .. } => "worker_finished",
            SessionEvent::RankingAggregated { .. } => "ranking_aggregated",
            SessionEvent::StageFinished { .. } => "stage_finished",
            SessionEvent::SessionStopped { .. } => "session_stopped",
            SessionEvent::SessionCompleted { .. } => "session_completed",
            SessionEvent::SessionFailed { .. } => "session_failed",
            SessionEvent::Heartbeat { .. } => "heartbeat",
        }
    }

    /// Terminal events end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::SessionStopped { .. }
                | SessionEvent::SessionCompleted { .. }
                | SessionEvent::SessionFailed { .. }
        )
    }

    /// Under back-pressure, a queued token event absorbs the next token
    /// for the same role by concatenating the fragments. Only tokens
    /// coalesce; heartbeats, finishes and stage events never do.
    pub fn try_coalesce(&mut self, next: &SessionEvent) -> bool {
        match (self, next) {
            (
                SessionEvent::WorkerToken { role, text },
                SessionEvent::WorkerToken {
                    role: next_role,
                    text: next_text,
                },
            ) if role == next_role => {
                text.push_str(next_text);
                true
            }
            _ => false,
        }
    }
}

/// A sequenced, timestamped event as it travels to the subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub seq: u64,
    /// Milliseconds since the Unix epoch.
    pub ts: u64,
    #[serde(flatten)]
    pub event: SessionEvent,
}

impl EventEnvelope {
    pub fn new(seq: u64, ts: u64, event: SessionEvent) -> Self {
        Self { seq, ts, event }
    }
}
