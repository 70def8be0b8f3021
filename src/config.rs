// ⚙️ Engine configuration - thresholds as data
//
// Defaults match production behaviour; a JSON file may override any subset.

use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// A statement entry may trail its movement by at most this many days
    pub date_window_days: i64,

    /// Score awarded when the transfer id appears in the entry description
    pub description_bonus: i64,

    /// Action tags that block internal hill/valley detection
    pub non_internal_actions: Vec<String>,

    /// Let statement matching complete a Reco that holds a lone movement
    pub reuse_incomplete_recos: bool,
}

impl EngineConfig {
    pub fn new() -> Self {
        EngineConfig {
            date_window_days: 7,
            description_bonus: 100,
            non_internal_actions: vec!["move".to_string()],
            reuse_incomplete_recos: true,
        }
    }

    pub fn with_date_window_days(mut self, days: i64) -> Self {
        self.date_window_days = days;
        self
    }

    pub fn with_non_internal_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.non_internal_actions = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_reuse_incomplete_recos(mut self, reuse: bool) -> Self {
        self.reuse_incomplete_recos = reuse;
        self
    }

    /// Load configuration from a JSON file; omitted fields keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: EngineConfig =
            serde_json::from_str(&content).context("Failed to parse engine config JSON")?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {:?}", path.as_ref()))?;

        Ok(config)
    }

    /// The date window must be a non-negative number of days chrono can represent
    pub fn validate(&self) -> Result<()> {
        if self.date_window_days < 0 {
            bail!("date_window_days must not be negative (got {})", self.date_window_days);
        }
        if Duration::try_days(self.date_window_days).is_none() {
            bail!("date_window_days is out of range (got {})", self.date_window_days);
        }
        Ok(())
    }

    pub fn is_non_internal_action(&self, action: &str) -> bool {
        self.non_internal_actions.iter().any(|a| a == action)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
