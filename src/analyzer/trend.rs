use serde::{Deserialize, Serialize};

use crate::storage::Sample;
use super::stats;

/// Slopes inside `±STABLE_BAND` count as stable.
pub const STABLE_BAND: f64 = 0.1;

/// What the regression uses as its x axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendBasis {
    /// Sample position 0..n. Irregular sampling intervals are not corrected for.
    #[default]
    Index,
    /// Hours elapsed since the first sample in the window.
    Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Increasing,
    Decreasing,
    Stable,
}

impl Direction {
    pub fn from_slope(slope: f64) -> Self {
        if slope > STABLE_BAND {
            Direction::Increasing
        } else if slope < -STABLE_BAND {
            Direction::Decreasing
        } else {
            Direction::Stable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendResult {
    pub slope: f64,
    pub direction: Direction,
    /// `slope / mean * 100`, or 0 when the mean is 0
    pub percent_change: f64,
    pub r_squared: f64,
    pub samples: usize,
    pub basis: TrendBasis,
}

/// Perform simple linear regression on (x, y) pairs.
/// Returns (slope, intercept, r_squared).
pub fn linear_regression(xs: &[f64], ys: &[f64]) -> Option<(f64, f64, f64)> {
    let n = xs.len().min(ys.len()) as f64;
    if n < 2.0 { return None; }
    let (xs, ys) = (&xs[..n as usize], &ys[..n as usize]);

    let sum_x: f64 = xs.iter().sum();
    let sum_y: f64 = ys.iter().sum();
    let sum_xy: f64 = xs.iter().zip(ys).map(|(x, y)| x * y).sum();
    let sum_x2: f64 = xs.iter().map(|x| x * x).sum();

    let denom = n * sum_x2 - sum_x * sum_x;
    if denom.abs() < 1e-10 { return None; }

    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n;

    // R-squared
    let ss_res: f64 = xs.iter().zip(ys).map(|(x, y)| {
        let predicted = slope * x + intercept;
        (y - predicted).powi(2)
    }).sum();
    let mean_y = sum_y / n;
    let ss_tot: f64 = ys.iter().map(|y| (y - mean_y).powi(2)).sum();
    let r_squared = if ss_tot > 1e-10 { 1.0 - ss_res / ss_tot } else { 0.0 };

    Some((slope, intercept, r_squared))
}

/// Trend over a window. Needs at least two samples; with the time basis the
/// samples must also span a non-zero interval.
pub fn estimate(samples: &[Sample], basis: TrendBasis) -> Option<TrendResult> {
    if samples.len() < 2 {
        return None;
    }

    let ys: Vec<f64> = samples.iter().map(|s| s.value).collect();
    let xs: Vec<f64> = match basis {
        TrendBasis::Index => (0..samples.len()).map(|i| i as f64).collect(),
        TrendBasis::Time => {
            let first = samples[0].timestamp;
            samples
                .iter()
                .map(|s| (s.timestamp - first).num_milliseconds() as f64 / 3_600_000.0)
                .collect()
        }
    };

    let (slope, _intercept, r_squared) = linear_regression(&xs, &ys)?;
    let mean = stats::mean(&ys);
    let percent_change = if mean == 0.0 { 0.0 } else { slope / mean * 100.0 };

    Some(TrendResult {
        slope,
        direction: Direction::from_slope(slope),
        percent_change,
        r_squared,
        samples: samples.len(),
        basis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn samples(values: &[f64], step_minutes: i64) -> Vec<Sample> {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Sample {
                timestamp: t0 + Duration::minutes(i as i64 * step_minutes),
                value: *v,
            })
            .collect()
    }

    #[test]
    fn rising_window_has_slope_ten() {
        let t = estimate(&samples(&[10.0, 20.0, 30.0, 40.0, 50.0], 1), TrendBasis::Index).unwrap();
        assert!((t.slope - 10.0).abs() < 1e-9);
        assert_eq!(t.direction, Direction::Increasing);
        assert!((t.percent_change - 10.0 / 30.0 * 100.0).abs() < 1e-9);
        assert!((t.r_squared - 1.0).abs() < 1e-9);
    }

    #[test]
    fn falling_and_constant_windows() {
        let t = estimate(&samples(&[5.0, 4.0, 3.0], 1), TrendBasis::Index).unwrap();
        assert_eq!(t.direction, Direction::Decreasing);

        let t = estimate(&samples(&[50.0; 8], 1), TrendBasis::Index).unwrap();
        assert_eq!(t.slope, 0.0);
        assert_eq!(t.direction, Direction::Stable);
    }

    #[test]
    fn small_slopes_are_stable() {
        let t = estimate(&samples(&[10.0, 10.05, 10.1], 1), TrendBasis::Index).unwrap();
        assert_eq!(t.direction, Direction::Stable);
    }

    #[test]
    fn fewer_than_two_samples_have_no_trend() {
        assert!(estimate(&[], TrendBasis::Index).is_none());
        assert!(estimate(&samples(&[1.0], 1), TrendBasis::Index).is_none());
    }

    #[test]
    fn zero_mean_reports_zero_percent_change() {
        let t = estimate(&samples(&[-1.0, 1.0], 1), TrendBasis::Index).unwrap();
        assert_eq!(t.percent_change, 0.0);
    }

    #[test]
    fn time_basis_is_per_hour() {
        // +1 per 30 minutes is +2 per hour.
        let t = estimate(&samples(&[1.0, 2.0, 3.0], 30), TrendBasis::Time).unwrap();
        assert!((t.slope - 2.0).abs() < 1e-9);
        assert_eq!(t.basis, TrendBasis::Time);
    }

    #[test]
    fn time_basis_with_identical_timestamps_has_no_trend() {
        assert!(estimate(&samples(&[1.0, 5.0], 0), TrendBasis::Time).is_none());
    }
}
