pub mod discord;
pub mod log;
pub mod slack;
pub mod webhook;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Instant;

use crate::config::AlertingConfig;
use crate::types::{Alert, AlertKind, Event, MetricId, Reading, Severity};

/// Trait for alert delivery channels
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Channel name
    fn name(&self) -> &str;

    /// Send a single alert
    async fn send(&self, alert: &Alert) -> Result<()>;

    /// Check if this channel accepts the given severity
    fn accepts_severity(&self, severity: &Severity) -> bool;

    /// Forward a freshly ingested reading. Most channels ignore these.
    async fn broadcast(&self, _reading: &Reading) -> Result<()> {
        Ok(())
    }
}

/// Parse a configured severity filter, dropping unknown names.
pub(crate) fn parse_severity_filter(names: &[String]) -> Vec<Severity> {
    names
        .iter()
        .filter_map(|s| {
            let parsed = Severity::from_name(s);
            if parsed.is_none() {
                tracing::warn!(severity = %s, "Unknown severity in filter");
            }
            parsed
        })
        .collect()
}

/// Manages alert dispatch and the optional debounce policy.
///
/// Deduplication and rate limiting are both off unless configured, so every
/// crossing reported by the engine reaches the channels. HAZARDOUS alerts
/// bypass both.
pub struct AlertManager {
    channels: Vec<Box<dyn AlertChannel>>,
    dedup_map: HashMap<DeduplicationKey, DedupEntry>,
    dedup_window_secs: u64,
    rate_limiter: Option<RateLimiter>,
    recovery_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DeduplicationKey {
    kind: AlertKind,
    metric: Option<MetricId>,
    severity: Severity,
}

struct DedupEntry {
    last_sent: Instant,
    count: u32,
}

struct RateLimiter {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl RateLimiter {
    fn new(per_minute: u32) -> Self {
        Self {
            tokens: per_minute as f64,
            max_tokens: per_minute as f64,
            refill_rate: per_minute as f64 / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

impl AlertManager {
    pub fn new(config: &AlertingConfig) -> Result<Self> {
        let mut channels: Vec<Box<dyn AlertChannel>> = vec![Box::new(log::LogChannel)];

        if let Some(ref wc) = config.webhook {
            if wc.enabled {
                channels.push(Box::new(webhook::WebhookChannel::new(wc)?));
            }
        }

        if let Some(ref sc) = config.slack {
            if sc.enabled {
                channels.push(Box::new(slack::SlackChannel::new(sc)?));
            }
        }

        if let Some(ref dc) = config.discord {
            if dc.enabled {
                channels.push(Box::new(discord::DiscordChannel::new(dc)?));
            }
        }

        tracing::info!(channels = channels.len(), "Initialized alert channels");

        Ok(Self::with_channels(channels, config))
    }

    pub fn with_channels(channels: Vec<Box<dyn AlertChannel>>, config: &AlertingConfig) -> Self {
        Self {
            channels,
            dedup_map: HashMap::new(),
            dedup_window_secs: config.dedup_window_secs,
            rate_limiter: (config.rate_limit_per_minute > 0)
                .then(|| RateLimiter::new(config.rate_limit_per_minute)),
            recovery_enabled: config.recovery_enabled,
        }
    }

    pub async fn dispatch(&mut self, alert: Alert) -> Result<()> {
        if !self.recovery_enabled && alert.kind == AlertKind::OverallChange && alert.severity == Severity::Good {
            tracing::debug!("Recovery alert suppressed");
            return Ok(());
        }

        // Check deduplication
        let key = DeduplicationKey {
            kind: alert.kind,
            metric: alert.metric,
            severity: alert.severity,
        };

        if self.dedup_window_secs > 0 && alert.severity < Severity::Hazardous {
            if let Some(entry) = self.dedup_map.get_mut(&key) {
                if entry.last_sent.elapsed().as_secs() < self.dedup_window_secs {
                    entry.count += 1;
                    tracing::debug!(kind = %alert.kind, count = entry.count, "Alert deduplicated");
                    return Ok(());
                }
            }
        }

        // Check rate limit (bypass for Hazardous)
        if let Some(ref mut limiter) = self.rate_limiter {
            if alert.severity < Severity::Hazardous && !limiter.try_acquire() {
                tracing::warn!(kind = %alert.kind, "Alert rate limited");
                return Ok(());
            }
        }

        // Dispatch to all matching channels
        for channel in &self.channels {
            if channel.accepts_severity(&alert.severity) {
                if let Err(e) = channel.send(&alert).await {
                    tracing::error!(
                        channel = channel.name(),
                        error = %e,
                        "Failed to send alert"
                    );
                }
            }
        }

        if self.dedup_window_secs > 0 {
            self.dedup_map.insert(key, DedupEntry {
                last_sent: Instant::now(),
                count: 1,
            });
        }

        Ok(())
    }

    /// Deliver events until every sender is gone, draining what is queued.
    pub async fn run(mut self, mut events: tokio::sync::mpsc::Receiver<Event>) {
        while let Some(event) = events.recv().await {
            match event {
                Event::Alert(alert) => {
                    if let Err(e) = self.dispatch(alert).await {
                        tracing::error!(error = %e, "Alert dispatch failed");
                    }
                }
                Event::Reading(reading) => self.broadcast(&reading).await,
            }
        }
        tracing::debug!("Event channel closed");
    }

    /// Best-effort fan-out of an ingested reading.
    pub async fn broadcast(&self, reading: &Reading) {
        for channel in &self.channels {
            if let Err(e) = channel.broadcast(reading).await {
                tracing::warn!(channel = channel.name(), error = %e, "Reading broadcast failed");
            }
        }
    }
}
