//! Context assembly: snapshot the selected org material and compose the
//! immutable bundle every worker of the session shares.

use crate::ports::context_source::{ContextError, ContextSelectors, ContextSource};
use council_domain::{CompanyId, ContextBudget, ContextBundle, DomainError, Question};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors composing the context bundle
#[derive(Error, Debug)]
pub enum AssembleError {
    #[error("context too large: mandatory fragments need {needed} chars, cap is {cap}")]
    ContextTooLarge { needed: usize, cap: usize },

    #[error(transparent)]
    Source(#[from] ContextError),
}

impl AssembleError {
    pub fn code(&self) -> &'static str {
        match self {
            AssembleError::ContextTooLarge { .. } => "context_too_large",
            AssembleError::Source(_) => "context_unavailable",
        }
    }
}

/// Composes context bundles from a snapshot source.
pub struct ContextAssembler {
    source: Arc<dyn ContextSource>,
    budget: ContextBudget,
}

impl ContextAssembler {
    pub fn new(source: Arc<dyn ContextSource>, budget: ContextBudget) -> Self {
        Self { source, budget }
    }

    /// Deterministic given the same snapshot: fetch once, compose once.
    /// Dropped fragments are telemetry, not failures.
    pub async fn assemble(
        &self,
        company: Option<&CompanyId>,
        selectors: &ContextSelectors,
        question: &Question,
    ) -> Result<ContextBundle, AssembleError> {
        let fragments = self.source.fetch(company, selectors).await?;
        debug!(fragments = fragments.len(), "context snapshot fetched");

        let bundle = ContextBundle::compose(fragments, question.content(), &self.budget).map_err(
            |err| match err {
                DomainError::ContextTooLarge { needed, cap } => {
                    AssembleError::ContextTooLarge { needed, cap }
                }
                other => AssembleError::Source(ContextError::Unavailable(other.to_string())),
            },
        )?;

        for dropped in bundle.dropped() {
            warn!(
                kind = dropped.kind.as_str(),
                title = %dropped.title,
                "context fragment dropped to fit budget"
            );
        }
        if bundle.truncated_count() > 0 {
            debug!(
                truncated = bundle.truncated_count(),
                "context fragments truncated at paragraph boundaries"
            );
        }

        Ok(bundle)
    }
}
