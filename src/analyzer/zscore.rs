use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::AnalyzerConfig;
use crate::storage::Sample;
use crate::types::{Alert, AlertKind, MetricId, Severity};
use super::stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum AnomalyTier {
    Medium,
    High,
    Critical,
}

impl AnomalyTier {
    pub fn from_zscore(z: f64) -> Self {
        let z = z.abs();
        if z > 3.0 {
            AnomalyTier::Critical
        } else if z > 2.0 {
            AnomalyTier::High
        } else {
            AnomalyTier::Medium
        }
    }

    /// Severity used when the anomaly is dispatched as an alert.
    pub fn severity(self) -> Severity {
        match self {
            AnomalyTier::Medium => Severity::Moderate,
            AnomalyTier::High => Severity::Bad,
            AnomalyTier::Critical => Severity::Hazardous,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnomalyRecord {
    pub metric: MetricId,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub mean: f64,
    pub stddev: f64,
    pub zscore: f64,
    pub tier: AnomalyTier,
}

impl AnomalyRecord {
    pub fn to_alert(&self, station: &str, location: Option<String>) -> Alert {
        Alert {
            timestamp: self.timestamp,
            kind: AlertKind::Anomaly,
            severity: self.tier.severity(),
            metric: Some(self.metric),
            value: self.value,
            threshold: None,
            message: format!(
                "{} anomaly detected: z-score={:.2} (value={:.1}, mean={:.1}, stddev={:.1})",
                self.metric, self.zscore, self.value, self.mean, self.stddev
            ),
            location,
            station: station.to_string(),
        }
    }
}

/// Z-Score based anomaly detection.
/// Flags the latest sample of a window when it deviates from the window mean
/// by more than `threshold` population standard deviations.
#[derive(Debug, Clone)]
pub struct ZScoreDetector {
    threshold: f64,
    min_samples: usize,
}

impl ZScoreDetector {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            threshold: config.zscore_threshold,
            min_samples: config.zscore_min_samples.max(2),
        }
    }

    pub fn check(&self, metric: MetricId, samples: &[Sample]) -> Option<AnomalyRecord> {
        if samples.len() < self.min_samples {
            return None; // Not enough data
        }

        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        let mean = stats::mean(&values);
        let stddev = stats::stddev(&values);

        if stddev < 1e-10 {
            return None; // No variation
        }

        let latest = samples.last()?;
        let z = (latest.value - mean) / stddev;

        if z.abs() <= self.threshold {
            return None;
        }

        Some(AnomalyRecord {
            metric,
            timestamp: latest.timestamp,
            value: latest.value,
            mean,
            stddev,
            zscore: z,
            tier: AnomalyTier::from_zscore(z),
        })
    }
}

/// Remembers the newest sample already reported per metric, so repeated
/// scans over an unchanged window report each outlier once.
#[derive(Debug, Clone, Default)]
pub struct AnomalyLatch {
    last: [Option<DateTime<Utc>>; MetricId::COUNT],
}

impl AnomalyLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `record` sits on a sample newer than the last one reported
    /// for its metric. Admitting it moves the mark forward.
    pub fn admit(&mut self, record: &AnomalyRecord) -> bool {
        let slot = &mut self.last[record.metric.index()];
        if slot.is_some_and(|seen| record.timestamp <= seen) {
            return false;
        }
        *slot = Some(record.timestamp);
        true
    }
}
