use std::env;
use std::str::FromStr;

use crate::error::{AnalysisError, Result};

/// Limits and knobs of one analysis run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisConfig {
    /// Worklist steps allowed for one function context before giving up.
    pub max_iterations: usize,
    /// Nesting of calls analysed in their caller's context. Deeper calls
    /// fall back to the callee's summary.
    pub max_call_depth: usize,
    /// k-limit on nested field/element/incoming locations.
    pub max_location_depth: usize,
    /// Re-runs allowed while recursive summaries keep growing.
    pub max_summary_rounds: usize,
    /// The program entry. Only the entry observes globals at their initial
    /// values.
    pub entry: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100_000,
            max_call_depth: 32,
            max_location_depth: 8,
            max_summary_rounds: 16,
            entry: "main".to_owned(),
        }
    }
}

impl AnalysisConfig {
    /// Default config with overrides taken from `ALIAS_*` environment
    /// variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(value) = read_var("ALIAS_MAX_ITERATIONS")? {
            config.max_iterations = value;
        }
        if let Some(value) = read_var("ALIAS_MAX_CALL_DEPTH")? {
            config.max_call_depth = value;
        }
        if let Some(value) = read_var("ALIAS_MAX_LOCATION_DEPTH")? {
            config.max_location_depth = value;
        }
        if let Some(value) = read_var("ALIAS_MAX_SUMMARY_ROUNDS")? {
            config.max_summary_rounds = value;
        }
        if let Ok(entry) = env::var("ALIAS_ENTRY") {
            if entry.is_empty() {
                return Err(AnalysisError::Config("ALIAS_ENTRY is empty".to_owned()));
            }
            config.entry = entry;
        }
        Ok(config)
    }

    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }
}

fn read_var<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AnalysisError::Config(format!("{} has invalid value `{}`", key, value))),
        Err(_) => Ok(None),
    }
}
