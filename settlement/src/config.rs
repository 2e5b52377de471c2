//! Configuration for the settlement engine

use crate::catalog::RailOverride;
use crate::reconciliation::ToleranceConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settlement engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Router settings
    pub router: RouterConfig,

    /// Window manager settings
    pub window: WindowSettings,

    /// Hard-coded reconciliation tolerance (last fallback layer)
    pub reconciliation: ToleranceConfig,

    /// Sweep scheduler settings
    pub scheduler: SchedulerConfig,

    /// Rail catalog overrides
    pub rails: Vec<RailOverride>,
}

/// Router configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Retry ceiling when the request does not carry one
    pub default_max_retries: u32,

    /// Floor for the exponential backoff delay
    pub min_backoff_seconds: u64,

    /// Ceiling for the exponential backoff delay
    pub max_backoff_seconds: u64,

    /// Time bound on a single rail adapter call
    pub adapter_timeout_seconds: u64,

    /// Due retries claimed per sweep
    pub retry_batch_size: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            min_backoff_seconds: 1,
            max_backoff_seconds: 3600,
            adapter_timeout_seconds: 30,
            retry_batch_size: 100,
        }
    }
}

/// Window manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    /// Local hour at which hourly rails open, also the post-holiday restart hour
    pub business_day_start_hour: u32,

    /// Cutoff hour used by hourly/daily rails without an explicit cutoff
    pub default_cutoff_hour: u32,

    /// How long a scheduled window stays open after its start time
    pub scheduled_window_minutes: i64,

    /// Batch time for daily rails without scheduled times
    pub default_daily_time: String,

    /// Queued items claimed per drain sweep
    pub drain_batch_size: usize,

    /// Days scanned past consecutive holidays before giving up
    pub holiday_lookahead_days: u32,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            business_day_start_hour: 8,
            default_cutoff_hour: 17,
            scheduled_window_minutes: 30,
            default_daily_time: "09:00".to_string(),
            drain_batch_size: 500,
            holiday_lookahead_days: 14,
        }
    }
}

/// Sweep scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between retry/drain sweeps
    pub sweep_interval_seconds: u64,

    /// Reconcile every rail once per closed period
    pub reconciliation_enabled: bool,

    /// Length of a reconciliation period, aligned to the Unix epoch
    pub reconciliation_period_minutes: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 30,
            reconciliation_enabled: true,
            reconciliation_period_minutes: 60,
        }
    }
}

impl EngineConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse TOML
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load from environment variables
    ///
    /// `SETTLEMENT_CONFIG` points at a TOML file; individual `SETTLEMENT_*`
    /// variables override it.
    pub fn from_env() -> crate::Result<Self> {
        let mut config = match std::env::var("SETTLEMENT_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        if let Some(v) = env_parse("SETTLEMENT_MAX_RETRIES")? {
            config.router.default_max_retries = v;
        }
        if let Some(v) = env_parse("SETTLEMENT_ADAPTER_TIMEOUT_SECS")? {
            config.router.adapter_timeout_seconds = v;
        }
        if let Some(v) = env_parse("SETTLEMENT_SWEEP_INTERVAL_SECS")? {
            config.scheduler.sweep_interval_seconds = v;
        }
        if let Some(v) = env_parse("SETTLEMENT_DEFAULT_CUTOFF_HOUR")? {
            config.window.default_cutoff_hour = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.window.business_day_start_hour > 23 || self.window.default_cutoff_hour > 23 {
            return Err(crate::Error::Config(
                "window hours must be within a day".to_string(),
            ));
        }
        if self.window.scheduled_window_minutes <= 0 {
            return Err(crate::Error::Config(
                "scheduled_window_minutes must be positive".to_string(),
            ));
        }
        if self.router.adapter_timeout_seconds == 0 {
            return Err(crate::Error::Config(
                "adapter_timeout_seconds must be positive".to_string(),
            ));
        }
        if self.scheduler.sweep_interval_seconds == 0 {
            return Err(crate::Error::Config(
                "sweep_interval_seconds must be positive".to_string(),
            ));
        }
        if self.scheduler.reconciliation_period_minutes <= 0 {
            return Err(crate::Error::Config(
                "reconciliation_period_minutes must be positive".to_string(),
            ));
        }
        crate::window::parse_hhmm(&self.window.default_daily_time)?;
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> crate::Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| crate::Error::Config(format!("{} has invalid value '{}'", key, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rail;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.router.default_max_retries, 3);
        assert_eq!(config.window.business_day_start_hour, 8);
        assert_eq!(config.window.scheduled_window_minutes, 30);
        assert!(!config.reconciliation.auto_resolve_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_with_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[router]
default_max_retries = 5

[window]
default_cutoff_hour = 16

[[rails]]
rail = "pix"
fee_percentage = "0.006"

[[rails]]
settings = {{ rail = "sepa", instant = true }}
"#
        )
        .unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.router.default_max_retries, 5);
        assert_eq!(config.router.adapter_timeout_seconds, 30);
        assert_eq!(config.window.default_cutoff_hour, 16);
        assert_eq!(config.rails.len(), 2);
        assert_eq!(config.rails[0].rail, Some(Rail::Pix));
        assert_eq!(config.rails[0].fee_percentage, Some(dec!(0.006)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.window.default_daily_time = "9am".to_string();
        assert!(config.validate().is_err());

        assert!(EngineConfig::from_toml("router = 3").is_err());
    }
}
