use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Alert, Severity};
use super::AlertChannel;

/// Writes alerts to the structured log. Always enabled.
pub struct LogChannel;

#[async_trait]
impl AlertChannel for LogChannel {
    fn name(&self) -> &str { "log" }

    fn accepts_severity(&self, _severity: &Severity) -> bool { true }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let metric = alert.metric.map(|m| m.key()).unwrap_or("-");
        if alert.severity >= Severity::Bad {
            tracing::warn!(
                kind = %alert.kind,
                severity = %alert.severity,
                metric,
                value = alert.value,
                "{}", alert.message
            );
        } else {
            tracing::info!(
                kind = %alert.kind,
                severity = %alert.severity,
                metric,
                value = alert.value,
                "{}", alert.message
            );
        }
        Ok(())
    }
}
