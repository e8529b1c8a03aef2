use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use crate::config::WebhookConfig;
use crate::types::{Alert, Reading, Severity};
use super::{parse_severity_filter, AlertChannel};

/// Custom webhook alert channel
pub struct WebhookChannel {
    url: String,
    headers: std::collections::HashMap<String, String>,
    severity_filter: Vec<Severity>,
    broadcast_readings: bool,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        Ok(Self {
            url: config.url.clone(),
            headers: config.headers.clone(),
            severity_filter: parse_severity_filter(&config.severity_filter),
            broadcast_readings: config.broadcast_readings,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(5))
                .build()?,
        })
    }

    async fn post(&self, payload: &serde_json::Value) -> Result<()> {
        let mut req = self.client.post(&self.url).json(payload);
        for (k, v) in &self.headers {
            req = req.header(k, v);
        }
        req.send().await?.error_for_status()?;
        Ok(())
    }
}

/// Event envelope for alerts, matching `{ "event": "alert", ... }`
pub fn alert_payload(alert: &Alert) -> serde_json::Value {
    json!({
        "event": "alert",
        "station": &alert.station,
        "kind": alert.kind,
        "metric": alert.metric,
        "value": alert.value,
        "threshold": alert.threshold,
        "severity": alert.severity,
        "message": &alert.message,
        "location": &alert.location,
        "timestamp": alert.timestamp.to_rfc3339(),
    })
}

pub fn reading_payload(reading: &Reading) -> serde_json::Value {
    json!({
        "event": "reading",
        "timestamp": reading.timestamp.to_rfc3339(),
        "location": &reading.location,
        "metrics": &reading.metrics,
    })
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str { "webhook" }

    fn accepts_severity(&self, severity: &Severity) -> bool {
        self.severity_filter.is_empty() || self.severity_filter.contains(severity)
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        self.post(&alert_payload(alert)).await
    }

    async fn broadcast(&self, reading: &Reading) -> Result<()> {
        if !self.broadcast_readings {
            return Ok(());
        }
        self.post(&reading_payload(reading)).await
    }
}
