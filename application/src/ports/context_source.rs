//! Context source port
//!
//! Snapshot reads of the org material the context assembler composes:
//! company header, departments, roles, project, playbooks, and curated
//! prior decisions. The snapshot is taken once, at composing time; later
//! mutations by other actors never reach an in-flight session.

use async_trait::async_trait;
use council_domain::{CompanyId, Fragment};
use thiserror::Error;

/// What the caller selected for this session's context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSelectors {
    pub departments: Vec<String>,
    pub roles: Vec<String>,
    pub project: Option<String>,
    pub playbooks: Vec<String>,
    pub prior_decisions: Vec<String>,
}

/// Errors reading context material
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("context source unavailable: {0}")]
    Unavailable(String),
}

/// Snapshot provider for context fragments.
#[async_trait]
pub trait ContextSource: Send + Sync {
    /// Fetch all fragments for the selectors, including playbooks marked
    /// auto-inject even when not selected. Order within the result does
    /// not matter; the assembler orders by kind.
    async fn fetch(
        &self,
        company: Option<&CompanyId>,
        selectors: &ContextSelectors,
    ) -> Result<Vec<Fragment>, ContextError>;
}
