use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use smallvec::SmallVec;

use crate::types::{Alert, AlertKind, MetricId, Reading, Severity};

/// Limits used when no threshold set has been configured.
pub const DEFAULT_LIMITS: [(MetricId, f64); 11] = [
    (MetricId::Pm1, 50.0),
    (MetricId::Pm25, 150.0),
    (MetricId::Pm10, 200.0),
    (MetricId::Co, 9.0),
    (MetricId::Co2, 1000.0),
    (MetricId::O3, 120.0),
    (MetricId::No2, 200.0),
    (MetricId::Temperature, 40.0),
    (MetricId::Humidity, 90.0),
    (MetricId::VocIndex, 250.0),
    (MetricId::NoxIndex, 250.0),
];

/// Per-metric limits, kept in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSet {
    entries: Vec<(MetricId, f64)>,
}

impl ThresholdSet {
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// Build from pairs. Later duplicates overwrite the earlier value in place.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (MetricId, f64)>,
    {
        let mut set = Self::empty();
        for (metric, limit) in pairs {
            set.insert(metric, limit);
        }
        set
    }

    /// Returns `false` and leaves the set untouched for non-positive or
    /// non-finite limits.
    pub fn insert(&mut self, metric: MetricId, limit: f64) -> bool {
        if !limit.is_finite() || limit <= 0.0 {
            tracing::warn!(metric = %metric, limit, "Ignoring invalid threshold");
            return false;
        }
        match self.entries.iter_mut().find(|(m, _)| *m == metric) {
            Some(entry) => entry.1 = limit,
            None => self.entries.push((metric, limit)),
        }
        true
    }

    pub fn get(&self, metric: MetricId) -> Option<f64> {
        self.entries.iter().find(|(m, _)| *m == metric).map(|(_, l)| *l)
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetricId, f64)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self::from_pairs(DEFAULT_LIMITS)
    }
}

impl Serialize for ThresholdSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (metric, limit) in &self.entries {
            map.serialize_entry(metric.key(), limit)?;
        }
        map.end()
    }
}

/// Severity tier of `value` against `limit`.
///
/// Boundaries sit at half the limit, the limit and twice the limit; each
/// boundary belongs to the worse tier.
pub fn tier(value: f64, limit: f64) -> Severity {
    if value < limit * 0.5 {
        Severity::Good
    } else if value < limit {
        Severity::Moderate
    } else if value < limit * 2.0 {
        Severity::Bad
    } else {
        Severity::Hazardous
    }
}

/// One classified metric of a reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricLevel {
    pub metric: MetricId,
    pub value: f64,
    pub limit: f64,
    pub severity: Severity,
}

/// Result of classifying a single reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub overall: Severity,
    /// Metrics at BAD or worse, in threshold-set order
    pub causes: SmallVec<[MetricLevel; 4]>,
    /// Every classified metric, in threshold-set order
    pub levels: SmallVec<[MetricLevel; 8]>,
}

impl Classification {
    /// The first metric that sits at the overall severity.
    pub fn worst(&self) -> Option<&MetricLevel> {
        self.levels.iter().find(|l| l.severity == self.overall)
    }
}

/// Classify every metric present in both the reading and the threshold set.
pub fn classify(reading: &Reading, thresholds: &ThresholdSet) -> Classification {
    let mut overall = Severity::Good;
    let mut causes = SmallVec::new();
    let mut levels = SmallVec::new();

    for (metric, limit) in thresholds.iter() {
        let Some(value) = reading.metrics.get(metric) else {
            continue;
        };
        let level = MetricLevel {
            metric,
            value,
            limit,
            severity: tier(value, limit),
        };
        if level.severity >= Severity::Bad {
            causes.push(level);
        }
        overall = overall.max(level.severity);
        levels.push(level);
    }

    Classification { overall, causes, levels }
}

/// Remembers the previous classification so that only changes are alerted.
pub struct AlertTracker {
    station: String,
    previous_overall: Option<Severity>,
    previous: [Option<Severity>; MetricId::COUNT],
}

impl AlertTracker {
    pub fn new(station: impl Into<String>) -> Self {
        Self {
            station: station.into(),
            previous_overall: None,
            previous: [None; MetricId::COUNT],
        }
    }

    /// Alerts for one reading: at most one per metric whose tier moved into
    /// BAD or HAZARDOUS, plus at most one when the overall severity changed.
    pub fn observe(&mut self, reading: &Reading, classification: &Classification) -> Vec<Alert> {
        let mut alerts = Vec::new();

        for level in &classification.levels {
            let slot = &mut self.previous[level.metric.index()];
            let before = slot.unwrap_or(Severity::Good);
            *slot = Some(level.severity);

            if level.severity >= Severity::Bad && level.severity > before {
                alerts.push(Alert {
                    timestamp: reading.timestamp,
                    kind: AlertKind::ThresholdCrossing,
                    severity: level.severity,
                    metric: Some(level.metric),
                    value: level.value,
                    threshold: Some(level.limit),
                    message: format!(
                        "{} is {:.1} {} (threshold: {:.1}), now {}",
                        level.metric,
                        level.value,
                        level.metric.unit(),
                        level.limit,
                        level.severity
                    ),
                    location: reading.location.clone(),
                    station: self.station.clone(),
                });
            }
        }

        let changed = match self.previous_overall {
            Some(before) => before != classification.overall,
            None => classification.overall != Severity::Good,
        };
        if changed {
            let worst = classification.worst();
            let from = self.previous_overall.unwrap_or(Severity::Good);
            let causes: Vec<&str> = classification.causes.iter().map(|c| c.metric.key()).collect();
            alerts.push(Alert {
                timestamp: reading.timestamp,
                kind: AlertKind::OverallChange,
                severity: classification.overall,
                metric: worst.map(|w| w.metric),
                value: worst.map(|w| w.value).unwrap_or(0.0),
                threshold: worst.map(|w| w.limit),
                message: if causes.is_empty() {
                    format!("Air quality changed from {} to {}", from, classification.overall)
                } else {
                    format!(
                        "Air quality changed from {} to {} (causes: {})",
                        from,
                        classification.overall,
                        causes.join(", ")
                    )
                },
                location: reading.location.clone(),
                station: self.station.clone(),
            });
        }
        self.previous_overall = Some(classification.overall);

        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MetricValues;
    use chrono::Utc;

    fn reading(values: &[(MetricId, f64)]) -> Reading {
        let mut metrics = MetricValues::new();
        for (m, v) in values {
            metrics.set(*m, *v);
        }
        Reading { timestamp: Utc::now(), location: Some("lab".into()), metrics }
    }

    #[test]
    fn tier_boundaries_belong_to_the_worse_tier() {
        assert_eq!(tier(74.9, 150.0), Severity::Good);
        assert_eq!(tier(75.0, 150.0), Severity::Moderate);
        assert_eq!(tier(149.9, 150.0), Severity::Moderate);
        assert_eq!(tier(150.0, 150.0), Severity::Bad);
        assert_eq!(tier(299.9, 150.0), Severity::Bad);
        assert_eq!(tier(300.0, 150.0), Severity::Hazardous);
    }

    #[test]
    fn tier_is_monotonic_in_value() {
        let limit = 9.0;
        let mut last = Severity::Good;
        for i in 0..400 {
            let t = tier(i as f64 * 0.1, limit);
            assert!(t >= last);
            last = t;
        }
    }

    #[test]
    fn raising_one_metric_never_lowers_overall() {
        let thresholds = ThresholdSet::default();
        let base = [(MetricId::Co, 6.0), (MetricId::O3, 30.0), (MetricId::Humidity, 95.0)];
        for metric in [MetricId::Co, MetricId::O3, MetricId::Pm25] {
            let mut last = Severity::Good;
            for step in 0..200 {
                let mut values = base.to_vec();
                values.retain(|(m, _)| *m != metric);
                values.push((metric, step as f64 * 2.5));
                let overall = classify(&reading(&values), &thresholds).overall;
                assert!(overall >= last, "{} at step {}", metric, step);
                assert!(overall >= Severity::Bad);
                last = overall;
            }
        }
    }

    #[test]
    fn overall_is_max_and_causes_follow_threshold_order() {
        let thresholds = ThresholdSet::from_pairs([
            (MetricId::Co, 10.0),
            (MetricId::Pm25, 150.0),
            (MetricId::O3, 100.0),
        ]);
        let r = reading(&[(MetricId::Pm25, 400.0), (MetricId::Co, 12.0), (MetricId::O3, 60.0)]);
        let c = classify(&r, &thresholds);

        assert_eq!(c.overall, Severity::Hazardous);
        let causes: Vec<MetricId> = c.causes.iter().map(|l| l.metric).collect();
        assert_eq!(causes, vec![MetricId::Co, MetricId::Pm25]);
        assert_eq!(c.levels.len(), 3);
        assert_eq!(c.worst().map(|w| w.metric), Some(MetricId::Pm25));
    }

    #[test]
    fn metrics_without_threshold_or_value_are_ignored() {
        let thresholds = ThresholdSet::from_pairs([(MetricId::Pm25, 150.0)]);
        let r = reading(&[(MetricId::Light, 100_000.0)]);
        let c = classify(&r, &thresholds);
        assert_eq!(c.overall, Severity::Good);
        assert!(c.causes.is_empty());
        assert!(c.levels.is_empty());
    }

    #[test]
    fn invalid_limits_are_rejected() {
        let mut set = ThresholdSet::empty();
        assert!(!set.insert(MetricId::Co, 0.0));
        assert!(!set.insert(MetricId::Co, f64::NAN));
        assert!(set.insert(MetricId::Co, 9.0));
        assert!(set.insert(MetricId::Co, 10.0));
        assert_eq!(set.get(MetricId::Co), Some(10.0));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn default_set_has_no_pressure_or_light_limit() {
        let set = ThresholdSet::default();
        assert_eq!(set.get(MetricId::Pm25), Some(150.0));
        assert_eq!(set.get(MetricId::Pressure), None);
        assert_eq!(set.get(MetricId::Light), None);
    }

    #[test]
    fn tracker_alerts_on_crossings_and_overall_changes_only() {
        let thresholds = ThresholdSet::from_pairs([(MetricId::Pm25, 150.0)]);
        let mut tracker = AlertTracker::new("station-1");

        let quiet = reading(&[(MetricId::Pm25, 50.0)]);
        assert!(tracker.observe(&quiet, &classify(&quiet, &thresholds)).is_empty());
        assert!(tracker.observe(&quiet, &classify(&quiet, &thresholds)).is_empty());

        let spike = reading(&[(MetricId::Pm25, 400.0)]);
        let alerts = tracker.observe(&spike, &classify(&spike, &thresholds));
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].kind, AlertKind::ThresholdCrossing);
        assert_eq!(alerts[0].metric, Some(MetricId::Pm25));
        assert_eq!(alerts[0].threshold, Some(150.0));
        assert_eq!(alerts[0].severity, Severity::Hazardous);
        assert_eq!(alerts[1].kind, AlertKind::OverallChange);
        assert_eq!(alerts[0].station, "station-1");

        // Staying hazardous is not a new crossing.
        assert!(tracker.observe(&spike, &classify(&spike, &thresholds)).is_empty());

        // Recovery only changes the overall severity.
        let alerts = tracker.observe(&quiet, &classify(&quiet, &thresholds));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::OverallChange);
        assert_eq!(alerts[0].severity, Severity::Good);
    }

    #[test]
    fn bad_to_hazardous_is_a_crossing() {
        let thresholds = ThresholdSet::from_pairs([(MetricId::Co, 10.0)]);
        let mut tracker = AlertTracker::new("s");
        let bad = reading(&[(MetricId::Co, 12.0)]);
        let worse = reading(&[(MetricId::Co, 25.0)]);

        let first = tracker.observe(&bad, &classify(&bad, &thresholds));
        assert_eq!(first.iter().filter(|a| a.kind == AlertKind::ThresholdCrossing).count(), 1);

        let second = tracker.observe(&worse, &classify(&worse, &thresholds));
        assert_eq!(second.iter().filter(|a| a.kind == AlertKind::ThresholdCrossing).count(), 1);
        assert_eq!(second[0].severity, Severity::Hazardous);
    }
}
