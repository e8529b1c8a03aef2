use serde::Serialize;

/// Descriptive statistics over one metric window
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Summary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub stddev: f64,
    /// Samples strictly above the threshold; absent without a threshold
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exceedances: Option<usize>,
    /// `exceedances` as a percentage of `count`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exceedance_rate: Option<f64>,
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by n).
pub fn stddev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Summarize a window. An empty window yields all-zero fields.
///
/// The median is `sorted[n / 2]` with no averaging of the middle pair.
pub fn summarize(values: &[f64], threshold: Option<f64>) -> Summary {
    let exceedances = threshold.map(|t| values.iter().filter(|v| **v > t).count());
    let exceedance_rate = exceedances.map(|e| {
        if values.is_empty() {
            0.0
        } else {
            e as f64 / values.len() as f64 * 100.0
        }
    });

    if values.is_empty() {
        return Summary {
            exceedances,
            exceedance_rate,
            ..Summary::default()
        };
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    Summary {
        count: values.len(),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean: mean(values),
        median: sorted[sorted.len() / 2],
        stddev: stddev(values),
        exceedances,
        exceedance_rate,
    }
}
