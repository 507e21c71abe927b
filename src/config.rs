//! Daemon configuration, loaded from a TOML file with sane defaults.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between analysis ticks (aggregate -> score -> record -> notify).
    pub analysis_interval_secs: u64,
    /// Max feature vectors pulled per training run.
    pub batch_size: usize,
    /// Anomaly records older than this are purged.
    pub anomaly_retention_days: i64,
    /// Seconds between training cycles.
    pub training_interval_secs: u64,
    /// Minimum accumulated feature vectors before a training run is attempted.
    pub min_training_samples: usize,
    /// Percentile of training scores used as the anomaly threshold (0..1).
    pub score_percentile: f64,
    /// Severity band width multipliers, in training-score standard deviations.
    pub severity_low_sigma: f64,
    pub severity_high_sigma: f64,
    /// Trailing window sizes, in seconds, smallest first.
    pub window_sizes_secs: Vec<u64>,
    pub notify: NotifyConfig,
    pub model_store: ModelStoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub url: String,
    pub token: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelStoreConfig {
    /// Local registry root: one subtree per model version.
    pub dir: String,
    /// Publication target the scorer's models are served from.
    pub serving_dir: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            analysis_interval_secs: 300,
            batch_size: 1000,
            anomaly_retention_days: 30,
            training_interval_secs: 86_400,
            min_training_samples: 50,
            score_percentile: 0.90,
            severity_low_sigma: 1.0,
            severity_high_sigma: 2.0,
            window_sizes_secs: vec![300, 900, 3600],
            notify: NotifyConfig::default(),
            model_store: ModelStoreConfig::default(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            token: String::new(),
            timeout_secs: 10,
            max_retries: 3,
            retry_delay_secs: 5,
        }
    }
}

impl Default for ModelStoreConfig {
    fn default() -> Self {
        Self {
            dir: "data/models".to_string(),
            serving_dir: "data/serving".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            retry_delay_secs: 5,
        }
    }
}

impl Config {
    /// Load config from a TOML file, falling back to defaults if missing.
    pub fn load(path: &str) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config = toml::from_str(&content)?;
                info!(%path, "Loaded configuration");
                Ok(cfg)
            }
            Err(_) => {
                warn!(%path, "Config file not found, using defaults");
                Ok(Config::default())
            }
        }
    }

    pub fn analysis_interval(&self) -> Duration {
        Duration::from_secs(self.analysis_interval_secs)
    }

    pub fn training_interval(&self) -> Duration {
        Duration::from_secs(self.training_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_file_missing() {
        let cfg = Config::load("/nonexistent/logwarden.toml").unwrap();
        assert_eq!(cfg.analysis_interval_secs, 300);
        assert_eq!(cfg.window_sizes_secs, vec![300, 900, 3600]);
        assert!(!cfg.notify.enabled);
    }

    #[test]
    fn test_partial_toml_overlays_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            analysis_interval_secs = 60

            [notify]
            enabled = true
            url = "https://alerts.example/hook"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.analysis_interval_secs, 60);
        assert_eq!(cfg.anomaly_retention_days, 30);
        assert!(cfg.notify.enabled);
        assert_eq!(cfg.notify.max_retries, 3);
    }
}
