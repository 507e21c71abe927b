//! Anomaly alert delivery to an external webhook.

pub mod retry;

pub use retry::{Exhausted, RetryPolicy};

use crate::config::NotifyConfig;
use crate::storage::AnomalyRecord;
use anyhow::Result;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification delivery exhausted: {0}")]
    DeliveryExhausted(#[from] Exhausted),
}

/// Dispatches anomaly alerts with bounded retries and a fixed backoff delay.
///
/// Delivery is decoupled from persistence: the anomaly record is already
/// stored before `notify` runs, and a delivery failure never loses it. The
/// dispatcher does not deduplicate across restarts; the store's dedup window
/// and the receiver cover redelivery.
pub struct Notifier {
    client: Client,
    url: String,
    token: String,
    enabled: bool,
    policy: RetryPolicy,
}

impl Notifier {
    pub fn new(cfg: &NotifyConfig) -> Result<Self> {
        let policy = RetryPolicy::new(
            cfg.max_retries,
            Duration::from_secs(cfg.retry_delay_secs),
            Duration::from_secs(cfg.timeout_secs),
        );
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: cfg.url.clone(),
            token: cfg.token.clone(),
            enabled: cfg.enabled,
            policy,
        })
    }

    /// Deliver one alert. Exhaustion is surfaced as a non-fatal typed error;
    /// the caller logs it and moves on.
    pub async fn notify(&self, record: &AnomalyRecord) -> Result<(), NotifyError> {
        if !self.enabled {
            debug!(anomaly = %record.id, "Notifications disabled, skipping");
            return Ok(());
        }

        let body = serde_json::json!({
            "timestamp": record.timestamp,
            "severity": record.severity,
            "description": record.description,
            "score": record.score,
        });

        let body = &body;
        self.policy
            .run("notify", move || async move {
                let resp = self
                    .client
                    .post(&self.url)
                    .bearer_auth(&self.token)
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| e.to_string())?;
                if resp.status().is_success() {
                    Ok(())
                } else {
                    Err(format!("endpoint returned {}", resp.status()))
                }
            })
            .await?;

        info!(anomaly = %record.id, severity = %record.severity, "Alert delivered");
        Ok(())
    }
}
