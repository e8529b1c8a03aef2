use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use crate::config::DiscordConfig;
use crate::types::{Alert, Severity};
use super::{parse_severity_filter, AlertChannel};

/// Discord webhook alert channel
pub struct DiscordChannel {
    webhook_url: String,
    username: String,
    severity_filter: Vec<Severity>,
    client: reqwest::Client,
}

impl DiscordChannel {
    pub fn new(config: &DiscordConfig) -> Result<Self> {
        Ok(Self {
            webhook_url: config.webhook_url.clone(),
            username: config.username.clone().unwrap_or_else(|| "AirSense".into()),
            severity_filter: parse_severity_filter(&config.severity_filter),
            client: reqwest::Client::new(),
        })
    }

    fn severity_color(severity: &Severity) -> u32 {
        match severity {
            Severity::Good => 0x4CAF50,
            Severity::Moderate => 0xFFEB3B,
            Severity::Bad => 0xFF9800,
            Severity::Hazardous => 0xC62828,
        }
    }

    fn payload(&self, alert: &Alert) -> serde_json::Value {
        let metric = alert.metric.map(|m| m.to_string()).unwrap_or_else(|| "overall".into());
        json!({
            "username": self.username,
            "embeds": [{
                "title": format!("[{}] {}", alert.severity, alert.message),
                "color": Self::severity_color(&alert.severity),
                "fields": [
                    { "name": "Station", "value": &alert.station, "inline": true },
                    { "name": "Metric", "value": metric, "inline": true },
                    { "name": "Value", "value": format!("{:.2}", alert.value), "inline": true },
                ],
                "timestamp": alert.timestamp.to_rfc3339(),
            }]
        })
    }
}

#[async_trait]
impl AlertChannel for DiscordChannel {
    fn name(&self) -> &str { "discord" }

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
