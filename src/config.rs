//! Lending policy and runtime configuration.
//!
//! Every section is `#[serde(default)]`, so an empty JSON object yields the
//! stock policy: 14-day loans, a 10.0/day fallback fine, and loan caps of 2
//! (BASIC) and 5 (PREMIUM).

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    core::store::StoreResult,
    engine::traits::FinePolicyStore,
    runtime::handle::RuntimeConfig,
};

/// Fine charged per late day when no category policy matches.
pub const DEFAULT_FINE_PER_DAY: f64 = 10.0;
/// Days between borrow date and due date.
pub const DEFAULT_LOAN_PERIOD_DAYS: u32 = 14;

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Loan rules applied by the engine and membership service.
    pub policy: LoanPolicy,
    /// Runtime batching and snapshot tuning.
    pub runtime: RuntimeConfig,
    /// Category fine rates seeded into the fine policy store.
    pub fine_policies: Vec<FinePolicySeed>,
}

/// Loan rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoanPolicy {
    /// Days between borrow date and due date.
    pub loan_period_days: u32,
    /// Fallback fine per late day.
    pub default_fine_per_day: f64,
    /// Open-loan cap for BASIC members.
    pub basic_loan_limit: u32,
    /// Open-loan cap for PREMIUM members.
    pub premium_loan_limit: u32,
}

impl LoanPolicy {
    /// Rejects rates and limits the engine cannot apply.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.default_fine_per_day.is_finite() || self.default_fine_per_day < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "default_fine_per_day must be a non-negative number, got {}",
                self.default_fine_per_day
            )));
        }
        if self.loan_period_days == 0 {
            return Err(ConfigError::Invalid("loan_period_days must be at least 1".into()));
        }
        if self.basic_loan_limit == 0 || self.premium_loan_limit == 0 {
            return Err(ConfigError::Invalid("loan limits must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for LoanPolicy {
    fn default() -> Self {
        Self {
            loan_period_days: DEFAULT_LOAN_PERIOD_DAYS,
            default_fine_per_day: DEFAULT_FINE_PER_DAY,
            basic_loan_limit: 2,
            premium_loan_limit: 5,
        }
    }
}

/// One configured category rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinePolicySeed {
    /// Category name.
    pub category: String,
    /// Fine per late day.
    pub fine_per_day: f64,
}

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Offending path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The document is not valid configuration JSON.
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
    /// A value parsed but is out of range.
    #[error("invalid config value: {0}")]
    Invalid(String),
}

impl LibraryConfig {
    /// Parses a JSON configuration document.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.policy.validate()?;
        if let Some(seed) = cfg
            .fine_policies
            .iter()
            .find(|seed| !seed.fine_per_day.is_finite() || seed.fine_per_day < 0.0)
        {
            return Err(ConfigError::Invalid(format!(
                "fine_per_day for {} must be a non-negative number",
                seed.category
            )));
        }
        Ok(cfg)
    }

    /// Reads and parses the JSON configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "loaded library config");
        Self::from_json_str(&raw)
    }

    /// Writes every configured fine policy into `store`.
    pub fn seed_fine_policies<S: FinePolicyStore>(&self, store: &mut S) -> StoreResult<()> {
        for seed in &self.fine_policies {
            store.put_fine_policy(&seed.category, seed.fine_per_day)?;
        }
        Ok(())
    }
}
