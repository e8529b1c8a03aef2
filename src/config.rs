use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;

use crate::analyzer::threshold::ThresholdSet;
use crate::analyzer::trend::TrendBasis;
use crate::storage::Horizon;
use crate::types::MetricId;

/// Top-level configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// Name stamped on every alert
    #[serde(default = "default_station")]
    pub station: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Location tag applied to readings that arrive without one
    pub location: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            station: default_station(),
            log_level: default_log_level(),
            location: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// One JSON reading per line from a file or stdin
    #[default]
    Jsonl,
    /// Synthetic readings for demos and soak tests
    Simulate,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,
    /// File to read for `jsonl`; stdin when absent
    pub path: Option<String>,
    #[serde(default = "default_simulate_interval")]
    pub interval_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Jsonl,
            path: None,
            interval_secs: default_simulate_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u32,
    /// Treat zero and negative values as missing samples
    #[serde(default = "default_true")]
    pub exclude_non_positive: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_samples: default_max_samples(),
            retention_hours: default_retention_hours(),
            exclude_non_positive: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyzerConfig {
    #[serde(default = "default_zscore_threshold")]
    pub zscore_threshold: f64,
    #[serde(default = "default_zscore_min_samples")]
    pub zscore_min_samples: usize,
    #[serde(default)]
    pub trend_basis: TrendBasis,
    #[serde(default = "default_forecast_window")]
    pub forecast_window: usize,
    #[serde(default = "default_forecast_ma_window")]
    pub forecast_ma_window: usize,
    #[serde(default = "default_forecast_horizon_steps")]
    pub forecast_horizon_steps: usize,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    #[serde(default = "default_horizon")]
    pub default_horizon: String,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            zscore_threshold: default_zscore_threshold(),
            zscore_min_samples: default_zscore_min_samples(),
            trend_basis: TrendBasis::Index,
            forecast_window: default_forecast_window(),
            forecast_ma_window: default_forecast_ma_window(),
            forecast_horizon_steps: default_forecast_horizon_steps(),
            report_interval_secs: default_report_interval(),
            default_horizon: default_horizon(),
        }
    }
}

impl AnalyzerConfig {
    pub fn horizon(&self) -> Result<Horizon> {
        self.default_horizon
            .parse()
            .with_context(|| format!("Invalid analyzer.default_horizon: {}", self.default_horizon))
    }
}

/// `[thresholds]` table of `metric = limit`. When present it replaces the
/// built-in defaults entirely; when empty the defaults apply.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(transparent)]
pub struct ThresholdConfig(pub HashMap<String, f64>);

impl ThresholdConfig {
    /// Build the set in canonical metric order. Unknown keys are skipped.
    pub fn to_set(&self) -> ThresholdSet {
        if self.0.is_empty() {
            return ThresholdSet::default();
        }
        for key in self.0.keys() {
            if MetricId::from_key(key).is_none() {
                tracing::warn!(key = %key, "Ignoring threshold for unknown metric");
            }
        }
        ThresholdSet::from_pairs(
            MetricId::ALL
                .iter()
                .filter_map(|m| self.0.get(m.key()).map(|limit| (*m, *limit))),
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SettingsConfig {
    /// TOML file of `metric = limit` pairs, re-read periodically
    pub thresholds_file: Option<String>,
    #[serde(default = "default_settings_poll")]
    pub poll_interval_secs: u64,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            thresholds_file: None,
            poll_interval_secs: default_settings_poll(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertingConfig {
    /// 0 disables rate limiting
    #[serde(default)]
    pub rate_limit_per_minute: u32,
    /// 0 disables deduplication
    #[serde(default)]
    pub dedup_window_secs: u64,
    #[serde(default = "default_true")]
    pub recovery_enabled: bool,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
    #[serde(default)]
    pub slack: Option<SlackConfig>,
    #[serde(default)]
    pub discord: Option<DiscordConfig>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 0,
            dedup_window_secs: 0,
            recovery_enabled: true,
            webhook: None,
            slack: None,
            discord: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub severity_filter: Vec<String>,
    /// Also POST every ingested reading
    #[serde(default)]
    pub broadcast_readings: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SlackConfig {
    #[serde(default)]
    pub enabled: bool,
    pub webhook_url: String,
    pub channel: Option<String>,
    #[serde(default)]
    pub severity_filter: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscordConfig {
    #[serde(default)]
    pub enabled: bool,
    pub webhook_url: String,
    pub username: Option<String>,
    #[serde(default)]
    pub severity_filter: Vec<String>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        // Expand environment variables
        let expanded = expand_env_vars(content)?;

        let config: Config = toml::from_str(&expanded)
            .with_context(|| "Failed to parse configuration")?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.analyzer.horizon()?;
        if !(self.analyzer.zscore_threshold.is_finite() && self.analyzer.zscore_threshold > 0.0) {
            bail!("analyzer.zscore_threshold must be a positive number");
        }
        if self.storage.retention_hours == 0 {
            bail!("storage.retention_hours must be positive");
        }
        if self.storage.max_samples == 0 {
            bail!("storage.max_samples must be positive");
        }
        if self.source.kind == SourceKind::Simulate && self.source.interval_secs == 0 {
            bail!("source.interval_secs must be positive for the simulator");
        }
        Ok(())
    }
}

/// Expand ${ENV_VAR} references in config string
fn expand_env_vars(input: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .to_string())
}

// Default value functions
fn default_station() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }
fn default_simulate_interval() -> u64 { 5 }
fn default_max_samples() -> usize { 100_000 }
fn default_retention_hours() -> u32 { 720 }
fn default_zscore_threshold() -> f64 { 2.0 }
fn default_zscore_min_samples() -> usize { 3 }
fn default_forecast_window() -> usize { 5 }
fn default_forecast_ma_window() -> usize { 20 }
fn default_forecast_horizon_steps() -> usize { 12 }
fn default_report_interval() -> u64 { 60 }
fn default_horizon() -> String { "24h".to_string() }
fn default_settings_poll() -> u64 { 30 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.source.kind, SourceKind::Jsonl);
        assert_eq!(config.storage.retention_hours, 720);
        assert!(config.storage.exclude_non_positive);
        assert_eq!(config.analyzer.horizon().unwrap(), Horizon::hours(24));
        assert_eq!(config.thresholds.to_set(), ThresholdSet::default());
        assert_eq!(config.alerting.rate_limit_per_minute, 0);
    }

    #[test]
    fn full_file_parses() {
        let config = Config::from_toml(
            r#"
            [agent]
            station = "rooftop-1"
            location = "Nairobi"

            [source]
            kind = "simulate"
            interval_secs = 2

            [analyzer]
            trend_basis = "time"
            default_horizon = "7d"

            [thresholds]
            co = 10
            pm25 = 150.0

            [alerting]
            dedup_window_secs = 300

            [alerting.webhook]
            enabled = true
            url = "http://localhost:9000/alerts"
            severity_filter = ["bad", "hazardous"]
            "#,
        )
        .unwrap();

        assert_eq!(config.agent.station, "rooftop-1");
        assert_eq!(config.source.kind, SourceKind::Simulate);
        assert_eq!(config.analyzer.trend_basis, TrendBasis::Time);
        let set = config.thresholds.to_set();
        let order: Vec<MetricId> = set.iter().map(|(m, _)| m).collect();
        assert_eq!(order, vec![MetricId::Pm25, MetricId::Co]);
        assert_eq!(set.get(MetricId::Pm10), None);
        assert!(config.alerting.webhook.unwrap().enabled);
    }

    #[test]
    fn env_vars_are_expanded() {
        std::env::set_var("AIRSENSE_TEST_STATION", "from-env");
        let config = Config::from_toml("[agent]\nstation = \"${AIRSENSE_TEST_STATION}\"\n").unwrap();
        assert_eq!(config.agent.station, "from-env");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Config::from_toml("[analyzer]\ndefault_horizon = \"soon\"\n").is_err());
        assert!(Config::from_toml("[analyzer]\ndefault_horizon = \"9999999999999d\"\n").is_err());
        assert!(Config::from_toml("[analyzer]\nzscore_threshold = 0\n").is_err());
        assert!(Config::from_toml("[storage]\nretention_hours = 0\n").is_err());
    }
}
