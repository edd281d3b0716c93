//! Registry adapter over the `[models]` configuration tables.
//!
//! Global defaults plus optional per-company overrides. Entries are
//! `provider/model` strings; list position is priority. Fallback pools
//! are separate from the active sets: a worker's fallback never widens
//! the panel, it replaces one seat.

use async_trait::async_trait;
use council_application::ports::model_registry::{ModelRegistry, RegistryError};
use council_domain::{CompanyId, ModelChoice, Purpose};
use std::collections::HashMap;

/// Parse a `provider/model` string; a bare model id gets the `openai`
/// provider.
pub fn parse_choice(entry: &str, priority: u32) -> ModelChoice {
    match entry.split_once('/') {
        Some((provider, model)) => ModelChoice::new(provider, model, priority),
        None => ModelChoice::new("openai", entry, priority),
    }
}

fn parse_list(entries: &[String]) -> Vec<ModelChoice> {
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| parse_choice(entry, i as u32))
        .collect()
}

/// One scope's model sets: the three active panels plus fallback pools.
#[derive(Debug, Clone, Default)]
pub struct RegistrySets {
    pub stage1: Vec<ModelChoice>,
    pub stage2: Vec<ModelChoice>,
    pub stage3: Vec<ModelChoice>,
    pub fallbacks: HashMap<Purpose, Vec<ModelChoice>>,
}

impl RegistrySets {
    pub fn from_lists(
        stage1: &[String],
        stage2: &[String],
        stage3: &[String],
        fallbacks: &[String],
    ) -> Self {
        let shared_fallbacks = parse_list(fallbacks);
        let mut pools = HashMap::new();
        for purpose in Purpose::ALL {
            pools.insert(purpose, shared_fallbacks.clone());
        }
        Self {
            stage1: parse_list(stage1),
            stage2: parse_list(stage2),
            stage3: parse_list(stage3),
            fallbacks: pools,
        }
    }

    fn active(&self, purpose: Purpose) -> &[ModelChoice] {
        match purpose {
            Purpose::Stage1 => &self.stage1,
            Purpose::Stage2 => &self.stage2,
            Purpose::Stage3 => &self.stage3,
        }
    }

    fn is_empty(&self) -> bool {
        self.stage1.is_empty() && self.stage2.is_empty() && self.stage3.is_empty()
    }
}

/// Registry with global defaults and per-company overrides.
pub struct ConfigModelRegistry {
    defaults: RegistrySets,
    companies: HashMap<String, RegistrySets>,
}

impl ConfigModelRegistry {
    pub fn new(defaults: RegistrySets, companies: HashMap<String, RegistrySets>) -> Self {
        Self {
            defaults,
            companies,
        }
    }

    fn sets_for(&self, company: Option<&CompanyId>) -> &RegistrySets {
        company
            .and_then(|c| self.companies.get(c.as_str()))
            .filter(|sets| !sets.is_empty())
            .unwrap_or(&self.defaults)
    }
}

#[async_trait]
impl ModelRegistry for ConfigModelRegistry {
    async fn resolve(
        &self,
        company: Option<&CompanyId>,
        purpose: Purpose,
    ) -> Result<Vec<ModelChoice>, RegistryError> {
        let mut set = self.sets_for(company).active(purpose).to_vec();
        set.sort_by_key(|c| c.priority);

        if set.len() < purpose.min_models() {
            return Err(RegistryError::ConfigIncomplete {
                purpose,
                found: set.len(),
                required: purpose.min_models(),
            });
        }
        Ok(set)
    }

    async fn choose_fallback(
        &self,
        company: Option<&CompanyId>,
        purpose: Purpose,
        tried: &[String],
    ) -> Option<ModelChoice> {
        let pool = self.sets_for(company).fallbacks.get(&purpose)?;
        let mut pool: Vec<&ModelChoice> = pool.iter().collect();
        pool.sort_by_key(|c| c.priority);
        pool.into_iter()
            .find(|c| !tried.contains(&c.model))
            .cloned()
    }
}
