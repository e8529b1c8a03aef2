use serde::Serialize;

use crate::types::MetricId;

/// Variance below this fraction of the sum of squares counts as constant.
const REL_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strength {
    Strong,
    Moderate,
    Weak,
}

impl Strength {
    pub fn from_coefficient(r: f64) -> Self {
        let r = r.abs();
        if r > 0.7 {
            Strength::Strong
        } else if r > 0.4 {
            Strength::Moderate
        } else {
            Strength::Weak
        }
    }
}

/// Pearson coefficient for one unordered metric pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CorrelationResult {
    pub a: MetricId,
    pub b: MetricId,
    pub coefficient: f64,
    pub strength: Strength,
    pub samples: usize,
}

/// Pearson's r over the common prefix of `x` and `y`, paired by index.
///
/// Returns 0 for fewer than two pairs or when either side has no variance.
/// Variance is judged relative to the magnitude of the series, so small but
/// genuinely varying values still correlate.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }
    let (x, y) = (&x[..n], &y[..n]);

    let mean_x = x.iter().sum::<f64>() / n as f64;
    let mean_y = y.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    let mut sq_x = 0.0;
    let mut sq_y = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
        sq_x += a * a;
        sq_y += b * b;
    }

    if var_x <= REL_EPSILON * sq_x || var_y <= REL_EPSILON * sq_y {
        return 0.0;
    }
    (cov / (var_x * var_y).sqrt()).clamp(-1.0, 1.0)
}

/// Correlate every unordered pair of non-empty series, in input order.
pub fn correlate_all(series: &[(MetricId, Vec<f64>)]) -> Vec<CorrelationResult> {
    let mut results = Vec::new();
    for (i, (a, xs)) in series.iter().enumerate() {
        if xs.is_empty() {
            continue;
        }
        for (b, ys) in series.iter().skip(i + 1) {
            if ys.is_empty() {
                continue;
            }
            let coefficient = pearson(xs, ys);
            results.push(CorrelationResult {
                a: *a,
                b: *b,
                coefficient,
                strength: Strength::from_coefficient(coefficient),
                samples: xs.len().min(ys.len()),
            });
        }
    }
    results
}
