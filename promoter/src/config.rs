//! Engine configuration.
//!
//! Every field has a serde default, so an empty JSON object yields the same
//! configuration as [`EngineConfig::default`].

use crate::errors::{PromoterError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound for any `*_seconds` setting: ten years.
const MAX_SECONDS: f64 = 315_360_000.0;

/// Converts seconds to a duration, clamping out-of-range values.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.clamp(0.0, MAX_SECONDS)).unwrap_or_default()
}

fn check_seconds(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && (0.0..=MAX_SECONDS).contains(&value) {
        Ok(())
    } else {
        Err(PromoterError::Config {
            field: field.to_string(),
            message: format!("{value} is not between 0 and {MAX_SECONDS} seconds"),
        })
    }
}

fn default_min_age() -> f64 {
    60.0
}

fn default_batch_size() -> usize {
    1
}

fn default_check_timeout() -> f64 {
    120.0
}

fn default_frequency() -> f64 {
    1.0
}

fn default_agent_frequency() -> f64 {
    60.0
}

fn default_lease_staleness() -> f64 {
    300.0
}

fn default_max_diff_count() -> u64 {
    5
}

fn default_unhappy_waiting_time() -> f64 {
    600.0
}

fn default_max_concurrency() -> usize {
    16
}

/// Cadence and batching for one category of scheduled checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Minimum seconds since an item's last check before it is due again.
    #[serde(default = "default_min_age")]
    pub min_age_seconds: f64,
    /// Maximum items fetched per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Per-item deadline in seconds.
    #[serde(default = "default_check_timeout")]
    pub timeout_seconds: f64,
    /// Delay between the end of one tick and the start of the next, in seconds.
    #[serde(default = "default_frequency")]
    pub frequency_seconds: f64,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            min_age_seconds: default_min_age(),
            batch_size: default_batch_size(),
            timeout_seconds: default_check_timeout(),
            frequency_seconds: default_frequency(),
        }
    }
}

impl CheckConfig {
    /// Sets the minimum age.
    #[must_use]
    pub fn with_min_age(mut self, seconds: f64) -> Self {
        self.min_age_seconds = seconds;
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the per-item timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Sets the tick frequency.
    #[must_use]
    pub fn with_frequency(mut self, seconds: f64) -> Self {
        self.frequency_seconds = seconds;
        self
    }

    fn validate(&self, section: &str) -> Result<()> {
        check_seconds(&format!("{section}.min_age_seconds"), self.min_age_seconds)?;
        check_seconds(&format!("{section}.timeout_seconds"), self.timeout_seconds)?;
        check_seconds(&format!("{section}.frequency_seconds"), self.frequency_seconds)
    }

    /// Gets the minimum age as Duration.
    #[must_use]
    pub fn min_age(&self) -> Duration {
        seconds(self.min_age_seconds)
    }

    /// Gets the timeout as Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        seconds(self.timeout_seconds)
    }

    /// Gets the frequency as Duration.
    #[must_use]
    pub fn frequency(&self) -> Duration {
        seconds(self.frequency_seconds)
    }
}

/// Environment checks add lease handling on top of the common settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentCheckConfig {
    /// Common settings; the timeout is per environment.
    #[serde(flatten)]
    pub check: CheckConfig,
    /// Seconds after which another instance may reclaim a lease.
    #[serde(default = "default_lease_staleness")]
    pub lease_staleness_seconds: f64,
}

impl Default for EnvironmentCheckConfig {
    fn default() -> Self {
        Self {
            check: CheckConfig::default(),
            lease_staleness_seconds: default_lease_staleness(),
        }
    }
}

impl EnvironmentCheckConfig {
    /// Gets the lease staleness window as Duration.
    #[must_use]
    pub fn lease_staleness(&self) -> Duration {
        seconds(self.lease_staleness_seconds)
    }
}

/// Scheduled agent settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Delay between agent rounds in seconds.
    #[serde(default = "default_agent_frequency")]
    pub frequency_seconds: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            frequency_seconds: default_agent_frequency(),
        }
    }
}

impl AgentConfig {
    /// Gets the frequency as Duration.
    #[must_use]
    pub fn frequency(&self) -> Duration {
        seconds(self.frequency_seconds)
    }
}

/// Settings for the veto that stops flapping resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnhappyVetoConfig {
    /// Corrective actions allowed against the same diff.
    #[serde(default = "default_max_diff_count")]
    pub max_diff_count: u64,
    /// Seconds to wait before rechecking; zero waits until the diff changes.
    #[serde(default = "default_unhappy_waiting_time")]
    pub waiting_time_seconds: f64,
}

impl Default for UnhappyVetoConfig {
    fn default() -> Self {
        Self {
            max_diff_count: default_max_diff_count(),
            waiting_time_seconds: default_unhappy_waiting_time(),
        }
    }
}

impl UnhappyVetoConfig {
    /// Gets the waiting time as Duration.
    #[must_use]
    pub fn waiting_time(&self) -> Duration {
        seconds(self.waiting_time_seconds)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Resource reconciliation.
    #[serde(default)]
    pub resource_check: CheckConfig,
    /// Environment promotion checks.
    #[serde(default)]
    pub environment_check: EnvironmentCheckConfig,
    /// Artifact version discovery.
    #[serde(default)]
    pub artifact_check: CheckConfig,
    /// Post-deployment verifications.
    #[serde(default)]
    pub environment_verification: CheckConfig,
    /// Scheduled agents.
    #[serde(default)]
    pub agents: AgentConfig,
    /// Flapping-resource veto.
    #[serde(default)]
    pub unhappy_veto: UnhappyVetoConfig,
    /// Maximum concurrently running checks per batch.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resource_check: CheckConfig::default(),
            environment_check: EnvironmentCheckConfig::default(),
            artifact_check: CheckConfig::default(),
            environment_verification: CheckConfig::default(),
            agents: AgentConfig::default(),
            unhappy_veto: UnhappyVetoConfig::default(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document and validates it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects durations that are negative, non-finite or longer than ten
    /// years, and a zero worker-pool bound.
    pub fn validate(&self) -> Result<()> {
        self.resource_check.validate("resource_check")?;
        self.environment_check.check.validate("environment_check")?;
        check_seconds(
            "environment_check.lease_staleness_seconds",
            self.environment_check.lease_staleness_seconds,
        )?;
        self.artifact_check.validate("artifact_check")?;
        self.environment_verification.validate("environment_verification")?;
        check_seconds("agents.frequency_seconds", self.agents.frequency_seconds)?;
        check_seconds("unhappy_veto.waiting_time_seconds", self.unhappy_veto.waiting_time_seconds)?;
        if self.max_concurrency == 0 {
            return Err(PromoterError::Config {
                field: "max_concurrency".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Reads and parses a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Replaces the resource check settings.
    #[must_use]
    pub fn with_resource_check(mut self, check: CheckConfig) -> Self {
        self.resource_check = check;
        self
    }

    /// Replaces the environment check settings.
    #[must_use]
    pub fn with_environment_check(mut self, check: CheckConfig) -> Self {
        self.environment_check.check = check;
        self
    }

    /// Replaces the artifact check settings.
    #[must_use]
    pub fn with_artifact_check(mut self, check: CheckConfig) -> Self {
        self.artifact_check = check;
        self
    }

    /// Replaces the verification settings.
    #[must_use]
    pub fn with_environment_verification(mut self, check: CheckConfig) -> Self {
        self.environment_verification = check;
        self
    }

    /// Sets the worker-pool bound.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.resource_check.min_age(), Duration::from_secs(60));
        assert_eq!(config.resource_check.batch_size, 1);
        assert_eq!(config.resource_check.timeout(), Duration::from_secs(120));
        assert_eq!(config.resource_check.frequency(), Duration::from_secs(1));
        assert_eq!(config.agents.frequency(), Duration::from_secs(60));
        assert_eq!(config.unhappy_veto.max_diff_count, 5);
        assert_eq!(config.unhappy_veto.waiting_time(), Duration::from_secs(600));
        assert_eq!(config.environment_check.lease_staleness(), Duration::from_secs(300));
    }

    #[test]
    fn test_empty_json_matches_default() {
        let parsed = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(parsed, EngineConfig::default());
    }

    #[test]
    fn test_partial_json_overrides() {
        let parsed = EngineConfig::from_json_str(
            r#"{
                "resource_check": {"batch_size": 10, "timeout_seconds": 5},
                "environment_check": {"min_age_seconds": 30, "lease_staleness_seconds": 45},
                "unhappy_veto": {"max_diff_count": 2}
            }"#,
        )
        .unwrap();

        assert_eq!(parsed.resource_check.batch_size, 10);
        assert_eq!(parsed.resource_check.timeout(), Duration::from_secs(5));
        assert_eq!(parsed.resource_check.min_age(), Duration::from_secs(60));
        assert_eq!(parsed.environment_check.check.min_age(), Duration::from_secs(30));
        assert_eq!(parsed.environment_check.lease_staleness(), Duration::from_secs(45));
        assert_eq!(parsed.unhappy_veto.max_diff_count, 2);
        assert_eq!(parsed.unhappy_veto.waiting_time(), Duration::from_secs(600));
    }

    #[test]
    fn test_invalid_json_is_serialization_error() {
        let err = EngineConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, crate::errors::PromoterError::Serialization(_)));
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::new()
            .with_resource_check(CheckConfig::default().with_batch_size(5).with_timeout(0.5))
            .with_max_concurrency(0);
        assert_eq!(config.resource_check.batch_size, 5);
        assert_eq!(config.resource_check.timeout(), Duration::from_millis(500));
        assert_eq!(config.max_concurrency, 1);
    }

    #[test]
    fn test_out_of_range_seconds_are_rejected() {
        for json in [
            r#"{"resource_check": {"min_age_seconds": -1}}"#,
            r#"{"environment_check": {"lease_staleness_seconds": 1e300}}"#,
            r#"{"unhappy_veto": {"waiting_time_seconds": -0.5}}"#,
            r#"{"agents": {"frequency_seconds": 1e20}}"#,
            r#"{"max_concurrency": 0}"#,
        ] {
            let err = EngineConfig::from_json_str(json).unwrap_err();
            assert!(matches!(err, PromoterError::Config { .. }), "{json}: {err}");
        }
    }

    #[test]
    fn test_config_error_names_the_field() {
        let err = EngineConfig::from_json_str(r#"{"artifact_check": {"timeout_seconds": -3}}"#).unwrap_err();
        assert!(err.to_string().contains("artifact_check.timeout_seconds"));
    }

    #[test]
    fn test_accessors_clamp_unvalidated_values() {
        let check = CheckConfig::default()
            .with_min_age(-1.0)
            .with_timeout(f64::NAN)
            .with_frequency(f64::INFINITY);
        assert!(EngineConfig::new().with_resource_check(check.clone()).validate().is_err());
        assert_eq!(check.min_age(), Duration::ZERO);
        assert_eq!(check.timeout(), Duration::ZERO);
        assert_eq!(check.frequency(), Duration::from_secs(315_360_000));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = EngineConfig::from_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, crate::errors::PromoterError::Io(_)));
    }
}
