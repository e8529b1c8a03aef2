use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::storage::MAX_FUTURE_SKEW_SECS;
use crate::types::{MetricId, MetricValues, Reading};

/// A loosely-typed reading as it arrives from a device or upstream service.
///
/// Metrics may be nested under `metrics` or sit at the top level next to
/// `timestamp` and `location`. Nothing is validated at this stage; a
/// `metrics` field that is not an object is kept as-is and ignored later.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawReading {
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub location: Option<Value>,
    #[serde(default)]
    pub metrics: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawReading {
    pub fn from_json(line: &str) -> Result<Self> {
        serde_json::from_str(line).with_context(|| "Failed to parse reading payload")
    }
}

/// Turn a raw payload into a fixed-shape [`Reading`].
///
/// Unknown keys are dropped, non-numeric and non-finite values are treated
/// as absent, and a missing, unparseable or implausibly future timestamp is
/// replaced by `observed_at`. This never fails.
pub fn normalize(raw: &RawReading, observed_at: DateTime<Utc>) -> Reading {
    let empty = Map::new();
    let source = match raw.metrics {
        Some(Value::Object(ref map)) => map,
        Some(ref other) => {
            tracing::debug!(metrics = %other, "Ignoring non-object metrics field");
            &empty
        }
        None => &raw.extra,
    };

    let mut metrics = MetricValues::new();
    for (key, value) in source {
        let Some(metric) = MetricId::from_key(key) else {
            if raw.metrics.is_some() {
                tracing::debug!(key = %key, "Dropping unknown metric");
            }
            continue;
        };
        match numeric(value) {
            Some(v) => metrics.set(metric, v),
            None => tracing::debug!(metric = %metric, "Dropping non-numeric value"),
        }
    }

    let latest = observed_at
        .checked_add_signed(Duration::seconds(MAX_FUTURE_SKEW_SECS))
        .unwrap_or(observed_at);
    let timestamp = match raw.timestamp.as_ref().and_then(parse_timestamp) {
        Some(ts) if ts <= latest => ts,
        Some(ts) => {
            tracing::warn!(timestamp = %ts, "Reading stamped in the future, using observation time");
            observed_at
        }
        None => observed_at,
    };

    let location = raw.location.as_ref().and_then(|l| match l {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    });

    Reading { timestamp, location, metrics }
}

/// [`normalize`] plus a station-wide location for readings that carry none.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    default_location: Option<String>,
}

impl Normalizer {
    pub fn new(default_location: Option<String>) -> Self {
        Self { default_location }
    }

    pub fn normalize(&self, raw: &RawReading, observed_at: DateTime<Utc>) -> Reading {
        let mut reading = normalize(raw, observed_at);
        if reading.location.is_none() {
            reading.location = self.default_location.clone();
        }
        reading
    }
}

fn numeric(value: &Value) -> Option<f64> {
    let v = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}

/// Accepts RFC 3339 strings or epoch milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            Utc.timestamp_millis_opt(millis).single()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observed() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn nested_metrics_are_mapped_and_unknown_keys_dropped() {
        let raw = RawReading::from_json(
            r#"{"timestamp":"2024-05-01T10:00:00Z","location":"Nairobi",
                "metrics":{"pm25":42,"co":"3.5","bogus":7,"o3":null}}"#,
        )
        .unwrap();
        let reading = normalize(&raw, observed());

        assert_eq!(reading.metrics.get(MetricId::Pm25), Some(42.0));
        assert_eq!(reading.metrics.get(MetricId::Co), Some(3.5));
        assert_eq!(reading.metrics.get(MetricId::O3), None);
        assert_eq!(reading.metrics.len(), 2);
        assert_eq!(reading.location.as_deref(), Some("Nairobi"));
        assert_eq!(reading.timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn flat_payload_is_accepted() {
        let raw = RawReading::from_json(r#"{"pm10":80,"humidity":55.5}"#).unwrap();
        let reading = normalize(&raw, observed());
        assert_eq!(reading.metrics.get(MetricId::Pm10), Some(80.0));
        assert_eq!(reading.metrics.get(MetricId::Humidity), Some(55.5));
    }

    #[test]
    fn missing_fields_stay_absent_not_zero() {
        let raw = RawReading::from_json(r#"{"metrics":{"pm25":10}}"#).unwrap();
        let reading = normalize(&raw, observed());
        assert_eq!(reading.metrics.get(MetricId::Pm10), None);
        assert_eq!(reading.metrics.get(MetricId::Co), None);
    }

    #[test]
    fn zero_is_kept_as_a_present_value() {
        let raw = RawReading::from_json(r#"{"metrics":{"co":0}}"#).unwrap();
        let reading = normalize(&raw, observed());
        assert_eq!(reading.metrics.get(MetricId::Co), Some(0.0));
    }

    #[test]
    fn missing_or_bad_timestamp_falls_back_to_observation_time() {
        let raw = RawReading::from_json(r#"{"metrics":{"pm25":1}}"#).unwrap();
        assert_eq!(normalize(&raw, observed()).timestamp, observed());

        let raw = RawReading::from_json(r#"{"timestamp":"yesterday","metrics":{"pm25":1}}"#).unwrap();
        assert_eq!(normalize(&raw, observed()).timestamp, observed());
    }

    #[test]
    fn epoch_millis_timestamp() {
        let raw = RawReading::from_json(r#"{"timestamp":1714557600000,"metrics":{}}"#).unwrap();
        let reading = normalize(&raw, observed());
        assert_eq!(reading.timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn far_future_timestamp_falls_back_to_observation_time() {
        // Epoch microseconds where milliseconds were expected
        let raw = RawReading::from_json(r#"{"timestamp":1714564800000000,"metrics":{"pm25":5}}"#).unwrap();
        let reading = normalize(&raw, observed());
        assert_eq!(reading.timestamp, observed());
        assert_eq!(reading.metrics.get(MetricId::Pm25), Some(5.0));

        let skewed = observed() + Duration::seconds(60);
        let raw = RawReading::from_json(&format!(
            r#"{{"timestamp":"{}","metrics":{{}}}}"#,
            skewed.to_rfc3339()
        ))
        .unwrap();
        assert_eq!(normalize(&raw, observed()).timestamp, skewed);
    }

    #[test]
    fn non_object_metrics_keep_timestamp_and_location() {
        for metrics in ["[1,2]", "\"pm25\"", "42"] {
            let raw = RawReading::from_json(&format!(
                r#"{{"timestamp":"2024-05-01T10:00:00Z","location":"lab","metrics":{}}}"#,
                metrics
            ))
            .unwrap();
            let reading = normalize(&raw, observed());
            assert!(reading.metrics.is_empty());
            assert_eq!(reading.location.as_deref(), Some("lab"));
            assert_eq!(reading.timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
        }
    }

    #[test]
    fn normalizer_fills_default_location_only_when_missing() {
        let n = Normalizer::new(Some("Nairobi".into()));
        let raw = RawReading::from_json(r#"{"metrics":{}}"#).unwrap();
        assert_eq!(n.normalize(&raw, observed()).location.as_deref(), Some("Nairobi"));

        let raw = RawReading::from_json(r#"{"location":"Mombasa","metrics":{}}"#).unwrap();
        assert_eq!(n.normalize(&raw, observed()).location.as_deref(), Some("Mombasa"));
    }

    #[test]
    fn blank_location_is_absent() {
        let raw = RawReading::from_json(r#"{"location":"  ","metrics":{}}"#).unwrap();
        assert!(normalize(&raw, observed()).location.is_none());
    }
}
