//! Configuration file schema (`council.toml`).

use crate::registry::{ConfigModelRegistry, RegistrySets};
use council_application::EngineConfig;
use council_domain::ContextBudget;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration file.
///
/// # Example
///
/// ```toml
/// [gateway]
/// base_url = "https://openrouter.ai/api"
/// platform_key = "sk-or-..."
///
/// [models]
/// stage1 = ["openai/gpt-5.1", "anthropic/claude-sonnet-4.5", "google/gemini-3-pro-preview"]
/// stage2 = ["openai/gpt-5.1", "anthropic/claude-sonnet-4.5", "google/gemini-3-pro-preview"]
/// stage3 = ["anthropic/claude-opus-4.5"]
///
/// [limits]
/// retries = 2
/// session_timeout_secs = 600
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub gateway: GatewayConfig,
    pub quota: QuotaConfig,
    pub models: ModelsConfig,
    pub limits: LimitsConfig,
    pub context: ContextConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub platform_key: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api".to_string(),
            platform_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaMode {
    /// In-process monthly counter.
    Local,
    /// Remote billing service.
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub mode: QuotaMode,
    /// Base URL of the quota service, for `mode = "remote"`.
    pub url: Option<String>,
    /// Per-user monthly session cap, for `mode = "local"`. Absent means
    /// unlimited.
    pub monthly_sessions: Option<u64>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            mode: QuotaMode::Local,
            url: None,
            monthly_sessions: None,
        }
    }
}

/// Per-purpose model lists as `provider/model` strings, position = priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub stage1: Vec<String>,
    pub stage2: Vec<String>,
    pub stage3: Vec<String>,
    /// Spare models tried when an active model fails permanently.
    pub fallbacks: Vec<String>,
    /// Per-company overrides, keyed by company id.
    pub companies: HashMap<String, CompanyModels>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            stage1: vec![
                "openai/gpt-5.1".into(),
                "anthropic/claude-sonnet-4.5".into(),
                "google/gemini-3-pro-preview".into(),
                "x-ai/grok-4".into(),
                "deepseek/deepseek-chat-v3.1".into(),
            ],
            stage2: vec![
                "openai/gpt-5.1".into(),
                "anthropic/claude-sonnet-4.5".into(),
                "google/gemini-3-pro-preview".into(),
            ],
            stage3: vec!["anthropic/claude-opus-4.5".into()],
            fallbacks: vec!["openai/gpt-5-mini".into()],
            companies: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanyModels {
    pub stage1: Vec<String>,
    pub stage2: Vec<String>,
    pub stage3: Vec<String>,
    pub fallbacks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub retries: u32,
    pub backoff_ms: u64,
    pub worker_soft_timeout_secs: u64,
    pub worker_hard_timeout_secs: u64,
    pub stage_timeout_secs: u64,
    pub session_timeout_secs: u64,
    pub grace_secs: u64,
    pub concurrency: usize,
    pub heartbeat_secs: u64,
    pub event_buffer: usize,
    pub min_draft_workers: usize,
    pub min_rank_workers: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            retries: engine.retries,
            backoff_ms: engine.backoff_base.as_millis() as u64,
            worker_soft_timeout_secs: engine.worker_soft_timeout.as_secs(),
            worker_hard_timeout_secs: engine.worker_hard_timeout.as_secs(),
            stage_timeout_secs: engine.stage_timeout.as_secs(),
            session_timeout_secs: engine.session_timeout.as_secs(),
            grace_secs: engine.cancel_grace.as_secs(),
            concurrency: engine.concurrency,
            heartbeat_secs: engine.heartbeat_interval.as_secs(),
            event_buffer: engine.event_buffer,
            min_draft_workers: engine.min_draft_workers,
            min_rank_workers: engine.min_rank_workers,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Root directory of the org content library. Absent means an empty
    /// context (questions run bare).
    pub root: Option<PathBuf>,
    pub fragment_chars: usize,
    pub total_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        let budget = ContextBudget::default();
        Self {
            root: None,
            fragment_chars: budget.fragment_chars,
            total_chars: budget.total_chars,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// JSONL audit log for finalized message records.
    pub message_log: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            message_log: None,
        }
    }
}

impl FileConfig {
    /// Lower the `[limits]` and `[context]` sections into the engine's
    /// runtime parameters.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            retries: self.limits.retries,
            backoff_base: Duration::from_millis(self.limits.backoff_ms),
            worker_soft_timeout: Duration::from_secs(self.limits.worker_soft_timeout_secs),
            worker_hard_timeout: Duration::from_secs(self.limits.worker_hard_timeout_secs),
            stage_timeout: Duration::from_secs(self.limits.stage_timeout_secs),
            session_timeout: Duration::from_secs(self.limits.session_timeout_secs),
            cancel_grace: Duration::from_secs(self.limits.grace_secs),
            concurrency: self.limits.concurrency,
            heartbeat_interval: Duration::from_secs(self.limits.heartbeat_secs),
            event_buffer: self.limits.event_buffer,
            min_draft_workers: self.limits.min_draft_workers,
            min_rank_workers: self.limits.min_rank_workers,
            context_budget: ContextBudget {
                fragment_chars: self.context.fragment_chars,
                total_chars: self.context.total_chars,
            },
        }
    }

    /// Build the model registry from the `[models]` tables.
    pub fn model_registry(&self) -> ConfigModelRegistry {
        let defaults = RegistrySets::from_lists(
            &self.models.stage1,
            &self.models.stage2,
            &self.models.stage3,
            &self.models.fallbacks,
        );
        let companies = self
            .models
            .companies
            .iter()
            .map(|(id, models)| {
                (
                    id.clone(),
                    RegistrySets::from_lists(
                        &models.stage1,
                        &models.stage2,
                        &models.stage3,
                        &models.fallbacks,
                    ),
                )
            })
            .collect();
        ConfigModelRegistry::new(defaults, companies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_satisfy_the_stage_minimums() {
        let config = FileConfig::default();
        assert!(config.models.stage1.len() >= 3);
        assert!(config.models.stage2.len() >= 3);
        assert!(!config.models.stage3.is_empty());
    }

    #[test]
    fn toml_overrides_merge_over_defaults() {
        let toml_str = r#"
[gateway]
base_url = "https://gw.internal"

[quota]
mode = "remote"
url = "https://billing.internal"

[models]
stage3 = ["anthropic/claude-opus-4.6"]

[limits]
retries = 5
heartbeat_secs = 30
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.gateway.base_url, "https://gw.internal");
        assert_eq!(config.quota.mode, QuotaMode::Remote);
        assert_eq!(config.models.stage3, vec!["anthropic/claude-opus-4.6"]);
        // Untouched sections keep their defaults.
        assert_eq!(config.models.stage1.len(), 5);
        assert_eq!(config.limits.retries, 5);

        let engine = config.engine_config();
        assert_eq!(engine.retries, 5);
        assert_eq!(engine.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(engine.stage_timeout, Duration::from_secs(240));
    }

    #[test]
    fn company_override_tables_parse() {
        let toml_str = r#"
[models.companies.c1]
stage1 = ["x/a", "x/b", "x/c"]
stage2 = ["x/d", "x/e", "x/f"]
stage3 = ["x/g"]
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.models.companies["c1"].stage3, vec!["x/g"]);
    }
}
