//! Usage counters for LLM calls, keyed by the service/model that consumed them.
//!
//! Counters always add on merge; a later record never replaces an earlier one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Token counters for one metering key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_write_input_tokens: u64,
}

impl TokenUsage {
    /// Usage with `total_tokens` derived from input + output.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            ..Self::default()
        }
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        self.cache_read_input_tokens += other.cache_read_input_tokens;
        self.cache_write_input_tokens += other.cache_write_input_tokens;
    }
}

/// Metering map, e.g. `{"granular_assessment/ollama/llama3.2": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metering {
    entries: BTreeMap<String, TokenUsage>,
}

impl Metering {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metering holding a single key.
    pub fn single(key: impl Into<String>, usage: TokenUsage) -> Self {
        let mut metering = Self::new();
        metering.record(key, usage);
        metering
    }

    /// Add `usage` to the counters under `key`.
    pub fn record(&mut self, key: impl Into<String>, usage: TokenUsage) {
        self.entries.entry(key.into()).or_default().add(&usage);
    }

    /// Merge every key of `other` into `self`, summing counters.
    pub fn merge(&mut self, other: &Metering) {
        for (key, usage) in &other.entries {
            self.entries.entry(key.clone()).or_default().add(usage);
        }
    }

    pub fn get(&self, key: &str) -> Option<&TokenUsage> {
        self.entries.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TokenUsage)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Sum of `total_tokens` across all keys.
    pub fn total_tokens(&self) -> u64 {
        self.entries.values().map(|u| u.total_tokens).sum()
    }
}
