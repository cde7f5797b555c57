//! Engine configuration
//!
//! Loaded from TOML with every field defaulted, then overridden from the
//! environment. Environment keys follow `PIPELINE_VERIFY_{SECTION}_{FIELD}`,
//! e.g. `PIPELINE_VERIFY_POLL_TIMEOUT_MS=120000`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::{Result, VerifyError};
use crate::policy::{ExponentialBackoff, FixedBackoff, PollPolicy};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub poll: PollConfig,
    pub trace: TraceConfig,
    pub verification: VerificationConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub timeout_ms: u64,
    pub interval_ms: u64,
    pub max_attempts: Option<u32>,
    pub backoff: BackoffKind,
    pub multiplier: f64,
    pub max_interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            interval_ms: 2_000,
            max_attempts: None,
            backoff: BackoffKind::Fixed,
            multiplier: 2.0,
            max_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// How far back the tracer searches for stage events.
    pub lookback_secs: u64,
    /// Tolerated provider clock drift past "now".
    pub clock_skew_ms: u64,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            lookback_secs: 900,
            clock_skew_ms: 5_000,
        }
    }
}

impl TraceConfig {
    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_secs)
    }

    pub fn clock_skew(&self) -> Duration {
        Duration::from_millis(self.clock_skew_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Window used by "was invoked" style checks.
    pub recent_window_secs: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            recent_window_secs: 300,
        }
    }
}

impl VerificationConfig {
    pub fn recent_window(&self) -> Duration {
        Duration::from_secs(self.recent_window_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file, apply environment overrides and validate.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VerifyError::Config {
                    field: "path".to_string(),
                    reason: format!("config file not found: {}", path.display()),
                }
            } else {
                VerifyError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    pub fn parse(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| VerifyError::Config {
            field: "toml".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn apply_env_overrides(&mut self) {
        override_u64(&mut self.poll.timeout_ms, "PIPELINE_VERIFY_POLL_TIMEOUT_MS");
        override_u64(&mut self.poll.interval_ms, "PIPELINE_VERIFY_POLL_INTERVAL_MS");
        if let Ok(val) = std::env::var("PIPELINE_VERIFY_POLL_MAX_ATTEMPTS") {
            match val.parse::<u32>() {
                Ok(parsed) => self.poll.max_attempts = Some(parsed),
                Err(_) => warn!(
                    env_key = "PIPELINE_VERIFY_POLL_MAX_ATTEMPTS",
                    value = val.as_str(),
                    "failed to parse u32 from env var, ignoring"
                ),
            }
        }
        if let Ok(val) = std::env::var("PIPELINE_VERIFY_POLL_BACKOFF") {
            match val.to_ascii_lowercase().as_str() {
                "fixed" => self.poll.backoff = BackoffKind::Fixed,
                "exponential" => self.poll.backoff = BackoffKind::Exponential,
                _ => warn!(
                    env_key = "PIPELINE_VERIFY_POLL_BACKOFF",
                    value = val.as_str(),
                    "unknown backoff kind in env var, ignoring"
                ),
            }
        }
        override_u64(
            &mut self.trace.lookback_secs,
            "PIPELINE_VERIFY_TRACE_LOOKBACK_SECS",
        );
        override_u64(
            &mut self.trace.clock_skew_ms,
            "PIPELINE_VERIFY_TRACE_CLOCK_SKEW_MS",
        );
        override_u64(
            &mut self.verification.recent_window_secs,
            "PIPELINE_VERIFY_VERIFICATION_RECENT_WINDOW_SECS",
        );
        override_string(&mut self.log.level, "PIPELINE_VERIFY_LOG_LEVEL");
        override_string(&mut self.log.format, "PIPELINE_VERIFY_LOG_FORMAT");
    }

    pub fn validate(&self) -> Result<()> {
        self.poll_policy()?;
        if self.poll.multiplier < 1.0 {
            return Err(VerifyError::Config {
                field: "poll.multiplier".to_string(),
                reason: format!("must be >= 1.0, got {}", self.poll.multiplier),
            });
        }
        if self.trace.lookback_secs == 0 {
            return Err(VerifyError::Config {
                field: "trace.lookback_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if !matches!(self.log.format.as_str(), "pretty" | "json") {
            return Err(VerifyError::Config {
                field: "log.format".to_string(),
                reason: format!("expected 'pretty' or 'json', got '{}'", self.log.format),
            });
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> Result<PollPolicy> {
        let mut policy = PollPolicy::from_millis(self.poll.timeout_ms, self.poll.interval_ms)
            .map_err(|e| VerifyError::Config {
                field: "poll".to_string(),
                reason: e.to_string(),
            })?;
        if let Some(max_attempts) = self.poll.max_attempts {
            policy = policy.with_max_attempts(max_attempts)?;
        }
        policy = match self.poll.backoff {
            BackoffKind::Fixed => policy.with_backoff(Arc::new(FixedBackoff)),
            BackoffKind::Exponential => policy.with_backoff(Arc::new(ExponentialBackoff::new(
                self.poll.multiplier,
                Duration::from_millis(self.poll.max_interval_ms),
            ))),
        };
        Ok(policy)
    }
}

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes_validation() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        let policy = config.poll_policy().unwrap();
        assert_eq!(policy.timeout(), Duration::from_secs(60));
        assert_eq!(policy.interval(), Duration::from_secs(2));
    }

    #[test]
    fn empty_toml_uses_defaults() {
        assert_eq!(EngineConfig::parse("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn partial_toml_merges_with_defaults() {
        let config = EngineConfig::parse(
            r#"
            [poll]
            timeout_ms = 5000
            interval_ms = 250
            backoff = "exponential"

            [trace]
            lookback_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.poll.timeout_ms, 5000);
        assert_eq!(config.poll.backoff, BackoffKind::Exponential);
        assert_eq!(config.trace.lookback_secs, 60);
        assert_eq!(config.trace.clock_skew_ms, 5_000);
        assert_eq!(config.log.format, "pretty");
        let policy = config.poll_policy().unwrap();
        assert_eq!(policy.next_delay(3), Duration::from_millis(1000));
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = EngineConfig::parse("[poll\ntimeout_ms = ").unwrap_err();
        assert!(matches!(err, VerifyError::Config { .. }));
    }

    #[test]
    fn validate_rejects_interval_longer_than_timeout() {
        let config = EngineConfig::parse("[poll]\ntimeout_ms = 100\ninterval_ms = 1000").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("poll"));
    }

    #[test]
    fn validate_rejects_unknown_log_format() {
        let mut config = EngineConfig::default();
        config.log.format = "xml".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("log.format"));
    }

    #[test]
    fn env_override_u64_valid_and_invalid() {
        let mut val = 10;
        std::env::set_var("TEST_PIPELINE_VERIFY_U64", "42");
        override_u64(&mut val, "TEST_PIPELINE_VERIFY_U64");
        assert_eq!(val, 42);
        std::env::set_var("TEST_PIPELINE_VERIFY_U64", "forty");
        override_u64(&mut val, "TEST_PIPELINE_VERIFY_U64");
        assert_eq!(val, 42);
        std::env::remove_var("TEST_PIPELINE_VERIFY_U64");
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = tokio_test::block_on(EngineConfig::from_file("/nonexistent/pipeline-verify.toml"))
            .unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }
}
