//! Worker state for one (stage, role) LLM call.
//!
//! A worker's buffered text is strictly append-only and its finish reason
//! can be set exactly once; both invariants are enforced here rather than
//! trusted to callers.

use crate::core::error::DomainError;
use crate::core::usage::Usage;
use serde::{Deserialize, Serialize};

/// Logical role of a worker inside one session, e.g. `draft-2`, `ranker-1`,
/// `chairman`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerRole(String);

impl WorkerRole {
    pub fn draft(index: usize) -> Self {
        Self(format!("draft-{}", index + 1))
    }

    pub fn ranker(index: usize) -> Self {
        Self(format!("ranker-{}", index + 1))
    }

    pub fn chairman() -> Self {
        Self("chairman".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkerRole {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Pending,
    Streaming,
    Done,
    Error,
    Cancelled,
}

impl WorkerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerStatus::Done | WorkerStatus::Error | WorkerStatus::Cancelled
        )
    }
}

/// Why a worker's token stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    Error,
    Cancelled,
}

impl FinishReason {
    pub fn as_status(&self) -> WorkerStatus {
        match self {
            FinishReason::Stop | FinishReason::Length => WorkerStatus::Done,
            FinishReason::Error => WorkerStatus::Error,
            FinishReason::Cancelled => WorkerStatus::Cancelled,
        }
    }
}

/// How one LLM call ended. Each variant carries exactly the fields it
/// needs; there are no sometimes-set optionals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    Done {
        text: String,
        reason: FinishReason,
        usage: Usage,
    },
    Error {
        cause: String,
        usage: Usage,
    },
    Cancelled {
        usage: Usage,
    },
}

impl WorkerOutcome {
    pub fn finish_reason(&self) -> FinishReason {
        match self {
            WorkerOutcome::Done { reason, .. } => *reason,
            WorkerOutcome::Error { .. } => FinishReason::Error,
            WorkerOutcome::Cancelled { .. } => FinishReason::Cancelled,
        }
    }

    pub fn usage(&self) -> Usage {
        match self {
            WorkerOutcome::Done { usage, .. }
            | WorkerOutcome::Error { usage, .. }
            | WorkerOutcome::Cancelled { usage } => *usage,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, WorkerOutcome::Done { .. })
    }
}

/// State of one (stage, role) pair over its whole life.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerState {
    role: WorkerRole,
    model: String,
    status: WorkerStatus,
    text: String,
    finish: Option<FinishReason>,
    error: Option<String>,
    usage: Usage,
}

impl WorkerState {
    pub fn new(role: WorkerRole, model: impl Into<String>) -> Self {
        Self {
            role,
            model: model.into(),
            status: WorkerStatus::Pending,
            text: String::new(),
            finish: None,
            error: None,
            usage: Usage::default(),
        }
    }

    pub fn role(&self) -> &WorkerRole {
        &self.role
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Append a token fragment to the buffered text. Rejected once the
    /// worker has finished.
    pub fn append_text(&mut self, fragment: &str) -> Result<(), DomainError> {
        if self.finish.is_some() {
            return Err(DomainError::WorkerAlreadyFinished(self.role.to_string()));
        }
        self.status = WorkerStatus::Streaming;
        self.text.push_str(fragment);
        Ok(())
    }

    /// Record the worker's terminal outcome. The finish reason may be set
    /// exactly once.
    pub fn finish(&mut self, outcome: &WorkerOutcome) -> Result<(), DomainError> {
        if self.finish.is_some() {
            return Err(DomainError::WorkerAlreadyFinished(self.role.to_string()));
        }
        let reason = outcome.finish_reason();
        self.finish = Some(reason);
        self.status = reason.as_status();
        self.usage = outcome.usage();
        match outcome {
            WorkerOutcome::Done { text, .. } => {
                // The outcome's text is authoritative; streamed fragments
                // must concatenate to exactly this value.
                debug_assert_eq!(&self.text, text);
            }
            WorkerOutcome::Error { cause, .. } => self.error = Some(cause.clone()),
            WorkerOutcome::Cancelled { .. } => {}
        }
        Ok(())
    }
}
