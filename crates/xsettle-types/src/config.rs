//! Configuration types for the coordinator and its submitter.
//!
//! Every field has a default from [`constants`], so a partial JSON document
//! is enough to override a single knob.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Result, SettlementError, constants};

/// Retry and finality timing for the reliable submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitterConfig {
    /// Total submission attempts for one blob, first try included.
    pub max_submit_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Add up to 50% random jitter to each backoff.
    pub backoff_jitter: bool,
    pub poll_interval_ms: u64,
    pub finality_timeout_ms: u64,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            max_submit_attempts: constants::DEFAULT_MAX_SUBMIT_ATTEMPTS,
            initial_backoff_ms: constants::DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: constants::DEFAULT_MAX_BACKOFF_MS,
            backoff_jitter: true,
            poll_interval_ms: constants::DEFAULT_POLL_INTERVAL_MS,
            finality_timeout_ms: constants::DEFAULT_FINALITY_TIMEOUT_MS,
        }
    }
}

impl SubmitterConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn finality_timeout(&self) -> Duration {
        Duration::from_millis(self.finality_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_submit_attempts == 0 {
            return Err(SettlementError::Configuration(
                "max_submit_attempts must be at least 1".into(),
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(SettlementError::Configuration(format!(
                "max_backoff_ms ({}) is below initial_backoff_ms ({})",
                self.max_backoff_ms, self.initial_backoff_ms
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(SettlementError::Configuration(
                "poll_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// JSON lines instead of human-readable output.
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: constants::DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
        }
    }
}

/// Top-level coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub submitter: SubmitterConfig,
    /// Overall deadline for the settlement leg of one `confirm`.
    pub settlement_deadline_ms: u64,
    /// Freshly signed delivery transactions tried per `confirm` after a
    /// previous one provably never entered the ledger.
    pub max_settlement_rounds: u32,
    pub telemetry: TelemetryConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            submitter: SubmitterConfig::default(),
            settlement_deadline_ms: constants::DEFAULT_SETTLEMENT_DEADLINE_MS,
            max_settlement_rounds: constants::DEFAULT_MAX_SETTLEMENT_ROUNDS,
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| SettlementError::Configuration(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn settlement_deadline(&self) -> Duration {
        Duration::from_millis(self.settlement_deadline_ms)
    }

    pub fn validate(&self) -> Result<()> {
        self.submitter.validate()?;
        if self.max_settlement_rounds == 0 {
            return Err(SettlementError::Configuration(
                "max_settlement_rounds must be at least 1".into(),
            ));
        }
        if self.settlement_deadline_ms < self.submitter.poll_interval_ms {
            return Err(SettlementError::Configuration(format!(
                "settlement_deadline_ms ({}) is shorter than one poll interval ({})",
                self.settlement_deadline_ms, self.submitter.poll_interval_ms
            )));
        }
        Ok(())
    }
}
