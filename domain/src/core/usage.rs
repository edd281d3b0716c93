//! Token and cost accounting for LLM calls.

use serde::{Deserialize, Serialize};

/// Characters of text that count as one token when a provider does not
/// report usage. The estimate errs high for dense prose and low for code,
/// which is acceptable for quota accounting.
pub const CHARS_PER_TOKEN: usize = 4;

/// Usage counters for one LLM call, one worker, one stage, or a whole
/// session; the same shape aggregates at every level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_cents: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64, cost_cents: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cost_cents,
        }
    }

    /// Estimate usage from character counts when the provider omits a
    /// usage record, at [`CHARS_PER_TOKEN`] characters per token. Cost is
    /// left at zero; billing only trusts provider-reported cost.
    pub fn estimate(prompt_chars: usize, output_chars: usize) -> Self {
        Self {
            input_tokens: prompt_chars.div_ceil(CHARS_PER_TOKEN) as u64,
            output_tokens: output_chars.div_ceil(CHARS_PER_TOKEN) as u64,
            cost_cents: 0,
        }
    }

    /// Accumulate another usage record into this one.
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.cost_cents = self.cost_cents.saturating_add(other.cost_cents);
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    pub fn is_zero(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0 && self.cost_cents == 0
    }
}
