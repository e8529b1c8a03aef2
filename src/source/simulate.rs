use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value};

use crate::normalize::RawReading;
use crate::types::MetricId;
use super::ReadingSource;

/// Value ranges of the synthetic station, inclusive.
const RANGES: [(MetricId, i64, i64); 9] = [
    (MetricId::Pm25, 5, 150),
    (MetricId::Pm10, 10, 200),
    (MetricId::Co, 0, 15),
    (MetricId::O3, 0, 120),
    (MetricId::No2, 0, 100),
    (MetricId::Temperature, 18, 35),
    (MetricId::Humidity, 20, 90),
    (MetricId::Pressure, 980, 1050),
    (MetricId::Light, 50, 1000),
];

/// Generates a synthetic reading every `interval`. Never exhausts.
pub struct SimulatedSource {
    interval: Duration,
    location: Option<String>,
    rng: StdRng,
    started: bool,
}

impl SimulatedSource {
    pub fn new(interval_secs: u64, location: Option<String>) -> Self {
        Self::with_rng(interval_secs, location, StdRng::from_entropy())
    }

    pub fn with_rng(interval_secs: u64, location: Option<String>, rng: StdRng) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs),
            location,
            rng,
            started: false,
        }
    }

    fn generate(&mut self) -> RawReading {
        let mut metrics = Map::new();
        for (metric, lo, hi) in RANGES {
            metrics.insert(metric.key().to_string(), Value::from(self.rng.gen_range(lo..=hi)));
        }
        RawReading {
            timestamp: None,
            location: self.location.clone().map(Value::String),
            metrics: Some(Value::Object(metrics)),
            extra: Map::new(),
        }
    }
}

#[async_trait]
impl ReadingSource for SimulatedSource {
    fn name(&self) -> &str { "simulate" }

    async fn next(&mut self) -> Result<Option<RawReading>> {
        if self.started {
            tokio::time::sleep(self.interval).await;
        }
        self.started = true;
        Ok(Some(self.generate()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use chrono::Utc;

    #[tokio::test]
    async fn generated_values_stay_in_range() {
        let mut source = SimulatedSource::with_rng(0, Some("Nairobi".into()), StdRng::seed_from_u64(3));
        for _ in 0..50 {
            let raw = source.next().await.unwrap().unwrap();
            let reading = normalize(&raw, Utc::now());
            assert_eq!(reading.location.as_deref(), Some("Nairobi"));
            for (metric, lo, hi) in RANGES {
                let v = reading.metrics.get(metric).unwrap();
                assert!(v >= lo as f64 && v <= hi as f64, "{} = {}", metric, v);
            }
        }
    }
}
