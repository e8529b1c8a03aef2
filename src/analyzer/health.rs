use serde::Serialize;

use crate::types::MetricId;
use super::threshold::ThresholdSet;

/// Maximum points a single metric can take off the score.
pub const MAX_PENALTY: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthLabel {
    Excellent,
    Good,
    Moderate,
    Poor,
    Hazardous,
}

impl HealthLabel {
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => HealthLabel::Excellent,
            60..=79 => HealthLabel::Good,
            40..=59 => HealthLabel::Moderate,
            20..=39 => HealthLabel::Poor,
            _ => HealthLabel::Hazardous,
        }
    }
}

impl std::fmt::Display for HealthLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Penalty {
    pub metric: MetricId,
    pub average: f64,
    pub threshold: f64,
    pub points: f64,
}

/// Composite 0–100 score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthScore {
    pub score: u8,
    pub label: HealthLabel,
    /// Score before rounding and clamping
    pub raw: f64,
    pub penalties: Vec<Penalty>,
}

/// Penalty for one metric whose window average is above its threshold.
pub fn penalty(average: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 || average <= threshold {
        return 0.0;
    }
    ((average - threshold) / threshold * 20.0).min(MAX_PENALTY)
}

/// Score from per-metric window averages. Metrics without a threshold do
/// not affect the result.
pub fn score<I>(averages: I, thresholds: &ThresholdSet) -> HealthScore
where
    I: IntoIterator<Item = (MetricId, f64)>,
{
    let mut raw = 100.0;
    let mut penalties = Vec::new();

    for (metric, average) in averages {
        let Some(threshold) = thresholds.get(metric) else {
            continue;
        };
        let points = penalty(average, threshold);
        if points > 0.0 {
            raw -= points;
            penalties.push(Penalty { metric, average, threshold, points });
        }
    }

    let score = raw.round().clamp(0.0, 100.0) as u8;
    HealthScore {
        score,
        label: HealthLabel::from_score(score),
        raw,
        penalties,
    }
}
