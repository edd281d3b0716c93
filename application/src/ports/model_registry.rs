//! Model registry port
//!
//! Maps a stage purpose to the ordered set of concrete models serving it,
//! per company. Read-mostly; implementations may cache with a short TTL.

use async_trait::async_trait;
use council_domain::{CompanyId, ModelChoice, Purpose};
use thiserror::Error;

/// Errors resolving the model set
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry has {found} models for {purpose}, needs at least {required}")]
    ConfigIncomplete {
        purpose: Purpose,
        found: usize,
        required: usize,
    },

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// The active model set per purpose and company.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// The active set for `purpose`, sorted by priority ascending.
    /// Companies without overrides fall back to the global defaults.
    /// Fails with [`RegistryError::ConfigIncomplete`] below the purpose's
    /// minimum ([`Purpose::min_models`]).
    async fn resolve(
        &self,
        company: Option<&CompanyId>,
        purpose: Purpose,
    ) -> Result<Vec<ModelChoice>, RegistryError>;

    /// The next-priority entry for `purpose` whose model id is not in
    /// `tried`, for one worker's fallback after a permanent failure.
    async fn choose_fallback(
        &self,
        company: Option<&CompanyId>,
        purpose: Purpose,
        tried: &[String],
    ) -> Option<ModelChoice>;
}
