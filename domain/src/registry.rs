//! Model registry value objects: which concrete models serve which stage.

use crate::session::stage::StageId;
use serde::{Deserialize, Serialize};

/// What a resolved model set is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Stage1,
    Stage2,
    Stage3,
}

impl Purpose {
    pub const ALL: [Purpose; 3] = [Purpose::Stage1, Purpose::Stage2, Purpose::Stage3];

    /// Fewest models a resolution may return for this purpose.
    pub fn min_models(&self) -> usize {
        match self {
            Purpose::Stage1 | Purpose::Stage2 => 3,
            Purpose::Stage3 => 1,
        }
    }

    pub fn stage(&self) -> StageId {
        match self {
            Purpose::Stage1 => StageId::Draft,
            Purpose::Stage2 => StageId::Rank,
            Purpose::Stage3 => StageId::Synth,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Stage1 => "stage1",
            Purpose::Stage2 => "stage2",
            Purpose::Stage3 => "stage3",
        }
    }
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One registry entry: a concrete model behind a provider, with its
/// fallback priority (lower runs first).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelChoice {
    pub provider: String,
    pub model: String,
    pub priority: u32,
}

impl ModelChoice {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, priority: u32) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            priority,
        }
    }
}

impl std::fmt::Display for ModelChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}
