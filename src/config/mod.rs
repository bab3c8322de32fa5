//! Configuration management for margin sentinel.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// LP margin data gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Monitoring loop parameters
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Reminder cadence parameters
    #[serde(default)]
    pub notification: NotificationConfig,
    /// External analysis service settings
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the LP data API
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,
    /// Login email for the data API
    #[serde(default)]
    pub email: String,
    /// Login password for the data API
    #[serde(default)]
    pub password: String,
    /// Broker identifier (pre-hashed value expected by the API)
    #[serde(default)]
    pub broker: String,
    /// Request timeout in seconds
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between monitoring cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Utilization ratio at/above which an alert episode begins (0.0-1.0)
    #[serde(default = "default_trigger_threshold")]
    pub trigger_threshold: Decimal,
    /// Utilization ratio at/below which an active episode auto-closes (0.0-1.0)
    #[serde(default = "default_resolve_threshold")]
    pub resolve_threshold: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Length of the initial burst window after card creation, in seconds
    #[serde(default = "default_initial_window")]
    pub initial_window_secs: u64,
    /// Minimum reminder spacing inside the burst window, in seconds
    #[serde(default = "default_initial_frequency")]
    pub initial_frequency_secs: u64,
    /// Minimum reminder spacing once past the burst window, in seconds
    #[serde(default = "default_cooldown_frequency")]
    pub cooldown_frequency_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Endpoint for requesting an initial risk report
    #[serde(default = "default_initial_url")]
    pub initial_url: String,
    /// Endpoint for requesting a recheck after human feedback
    #[serde(default = "default_recheck_url")]
    pub recheck_url: String,
    /// Hard timeout for analysis calls, in seconds
    #[serde(default = "default_analysis_timeout")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_gateway_base_url() -> String {
    "https://api-anshin.sigmarisk.com.au/api/v1".to_string()
}

fn default_gateway_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    60
}

fn default_trigger_threshold() -> Decimal {
    Decimal::new(80, 2) // 0.80 - standard margin utilization alert line
}

fn default_resolve_threshold() -> Decimal {
    Decimal::new(70, 2) // 0.70 - hysteresis gap below the trigger
}

fn default_initial_window() -> u64 {
    300
}

fn default_initial_frequency() -> u64 {
    60
}

fn default_cooldown_frequency() -> u64 {
    900
}

fn default_initial_url() -> String {
    "http://localhost:8123/report/initial".to_string()
}

fn default_recheck_url() -> String {
    "http://localhost:8123/report/recheck".to_string()
}

fn default_analysis_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("MS"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.monitor.trigger_threshold > Decimal::ZERO
                && self.monitor.trigger_threshold <= Decimal::ONE,
            "trigger_threshold must be between 0 and 1"
        );

        anyhow::ensure!(
            self.monitor.resolve_threshold > Decimal::ZERO
                && self.monitor.resolve_threshold < self.monitor.trigger_threshold,
            "resolve_threshold must be positive and below trigger_threshold"
        );

        anyhow::ensure!(
            self.monitor.poll_interval_secs > 0,
            "poll_interval_secs must be positive"
        );

        anyhow::ensure!(
            self.notification.initial_frequency_secs > 0
                && self.notification.cooldown_frequency_secs > 0,
            "notification frequencies must be positive"
        );

        anyhow::ensure!(
            self.notification.cooldown_frequency_secs >= self.notification.initial_frequency_secs,
            "cooldown_frequency_secs must not be shorter than initial_frequency_secs"
        );

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            monitor: MonitorConfig::default(),
            notification: NotificationConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_base_url(),
            email: String::new(),
            password: String::new(),
            broker: String::new(),
            timeout_secs: default_gateway_timeout(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            trigger_threshold: default_trigger_threshold(),
            resolve_threshold: default_resolve_threshold(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            initial_window_secs: default_initial_window(),
            initial_frequency_secs: default_initial_frequency(),
            cooldown_frequency_secs: default_cooldown_frequency(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            initial_url: default_initial_url(),
            recheck_url: default_recheck_url(),
            timeout_secs: default_analysis_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_must_be_below_trigger() {
        let mut config = Config::default();
        config.monitor.resolve_threshold = dec!(0.90);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = Config::default();
        config.monitor.poll_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cooldown_shorter_than_burst_rejected() {
        let mut config = Config::default();
        config.notification.initial_frequency_secs = 120;
        config.notification.cooldown_frequency_secs = 60;
        assert!(config.validate().is_err());
    }
}
