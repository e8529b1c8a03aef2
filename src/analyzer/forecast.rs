use rand::Rng;
use serde::Serialize;

use crate::config::AnalyzerConfig;
use crate::types::MetricId;

/// Short-horizon prediction for one metric.
///
/// `confidence` is a presentation value drawn from a fixed range. It is not
/// derived from model error and carries no statistical meaning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Forecast {
    pub metric: MetricId,
    pub current: f64,
    pub predicted: f64,
    pub confidence: f64,
    pub samples: usize,
}

/// One step of a flat moving-average projection
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProjectionPoint {
    pub step: usize,
    pub value: f64,
}

#[derive(Debug, Clone)]
pub struct Forecaster {
    window: usize,
    ma_window: usize,
    horizon_steps: usize,
}

impl Forecaster {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            window: config.forecast_window.max(1),
            ma_window: config.forecast_ma_window.max(1),
            horizon_steps: config.forecast_horizon_steps,
        }
    }

    /// Average of the last `window` samples plus half of their first-to-last
    /// delta. `None` until `window` samples are available.
    pub fn forecast<R: Rng>(
        &self,
        metric: MetricId,
        values: &[f64],
        rng: &mut R,
    ) -> Option<Forecast> {
        if values.len() < self.window {
            return None;
        }
        let tail = &values[values.len() - self.window..];
        let first = *tail.first()?;
        let current = *tail.last()?;
        let avg = tail.iter().sum::<f64>() / tail.len() as f64;

        Some(Forecast {
            metric,
            current,
            predicted: avg + (current - first) * 0.5,
            confidence: (65.0 + rng.gen::<f64>() * 20.0).min(95.0).floor(),
            samples: tail.len(),
        })
    }

    /// Moving average of the last `ma_window` samples held flat for
    /// `horizon_steps` steps.
    pub fn project(&self, values: &[f64]) -> Vec<ProjectionPoint> {
        if values.is_empty() {
            return Vec::new();
        }
        let window = self.ma_window.min(values.len());
        let tail = &values[values.len() - window..];
        let ma = tail.iter().sum::<f64>() / window as f64;
        (1..=self.horizon_steps)
            .map(|step| ProjectionPoint { step, value: ma })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn forecaster() -> Forecaster {
        Forecaster::new(&AnalyzerConfig::default())
    }

    #[test]
    fn forecast_uses_last_five_samples() {
        let mut rng = StdRng::seed_from_u64(7);
        let values = [100.0, 100.0, 10.0, 20.0, 30.0, 40.0, 50.0];
        let f = forecaster().forecast(MetricId::Pm25, &values, &mut rng).unwrap();
        assert_eq!(f.current, 50.0);
        // avg 30 + (50 - 10) / 2
        assert_eq!(f.predicted, 50.0);
        assert_eq!(f.samples, 5);
    }

    #[test]
    fn confidence_stays_in_presentation_range() {
        let mut rng = StdRng::seed_from_u64(42);
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        for _ in 0..200 {
            let f = forecaster().forecast(MetricId::Co, &values, &mut rng).unwrap();
            assert!(f.confidence >= 65.0 && f.confidence < 95.0, "{}", f.confidence);
        }
    }

    #[test]
    fn forecast_needs_a_full_window() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(forecaster().forecast(MetricId::O3, &[1.0, 2.0, 3.0, 4.0], &mut rng).is_none());
    }

    #[test]
    fn projection_is_flat_moving_average() {
        let values: Vec<f64> = (1..=30).map(|v| v as f64).collect();
        let points = forecaster().project(&values);
        assert_eq!(points.len(), 12);
        assert_eq!(points[0].step, 1);
        assert_eq!(points[11].step, 12);
        // mean of 11..=30
        assert!(points.iter().all(|p| (p.value - 20.5).abs() < 1e-12));
    }

    #[test]
    fn projection_of_short_series_uses_what_is_there() {
        let points = forecaster().project(&[4.0, 6.0]);
        assert_eq!(points[0].value, 5.0);
        assert!(forecaster().project(&[]).is_empty());
    }
}
