//! Domain error types

use thiserror::Error;

/// Domain-level errors
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("question must not be empty")]
    EmptyQuestion,

    #[error("context too large: mandatory fragments need {needed} chars, cap is {cap}")]
    ContextTooLarge { needed: usize, cap: usize },

    #[error("worker {0} already finished")]
    WorkerAlreadyFinished(String),

    #[error("session already left the running state")]
    SessionFrozen,
}

impl DomainError {
    /// Machine-stable code for the wire and for telemetry.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::EmptyQuestion => "empty_question",
            DomainError::ContextTooLarge { .. } => "context_too_large",
            DomainError::WorkerAlreadyFinished(_) => "worker_already_finished",
            DomainError::SessionFrozen => "session_frozen",
        }
    }
}
