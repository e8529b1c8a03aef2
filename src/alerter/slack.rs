use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use crate::config::SlackConfig;
use crate::types::{Alert, Severity};
use super::{parse_severity_filter, AlertChannel};

/// Slack webhook alert channel
pub struct SlackChannel {
    webhook_url: String,
    channel: Option<String>,
    severity_filter: Vec<Severity>,
    client: reqwest::Client,
}

impl SlackChannel {
    pub fn new(config: &SlackConfig) -> Result<Self> {
        Ok(Self {
            webhook_url: config.webhook_url.clone(),
            channel: config.channel.clone(),
            severity_filter: parse_severity_filter(&config.severity_filter),
            client: reqwest::Client::new(),
        })
    }

    fn severity_color(severity: &Severity) -> &'static str {
        match severity {
            Severity::Good => "#4caf50",
            Severity::Moderate => "#ffeb3b",
            Severity::Bad => "#ff9800",
            Severity::Hazardous => "#c62828",
        }
    }

    fn payload(&self, alert: &Alert) -> serde_json::Value {
        let metric = alert.metric.map(|m| m.to_string()).unwrap_or_else(|| "overall".into());
        let mut payload = json!({
            "attachments": [{
                "color": Self::severity_color(&alert.severity),
                "title": format!("[{}] {}", alert.severity, alert.message),
                "fields": [
                    { "title": "Station", "value": &alert.station, "short": true },
                    { "title": "Location", "value": alert.location.as_deref().unwrap_or("unknown"), "short": true },
                    { "title": "Metric", "value": metric, "short": true },
                    { "title": "Value", "value": format!("{:.2}", alert.value), "short": true },
                ],
                "ts": alert.timestamp.timestamp(),
            }]
        });

        if let Some(ref ch) = self.channel {
            payload["channel"] = json!(ch);
        }
        payload
    }
}

#[async_trait]
impl AlertChannel for SlackChannel {
    fn name(&self) -> &str { "slack" }

    fn accepts_severity(&self, severity: &Severity) -> bool {
        self.severity_filter.is_empty() || self.severity_filter.contains(severity)
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        self.client.post(&self.webhook_url)
            .json(&self.payload(alert))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
