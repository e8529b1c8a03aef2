use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{bail, Context};
use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, Serializer};

use crate::config::StorageConfig;
use crate::types::{MetricId, Reading};

/// How far past `now` a sample may be stamped and still count as current.
pub const MAX_FUTURE_SKEW_SECS: i64 = 300;

/// A single `(timestamp, value)` point in a metric window
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Which slice of a metric window a query looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Horizon {
    /// Everything newer than `now - d`
    Last(Duration),
    /// The most recent `n` samples regardless of age (live view)
    Samples(usize),
    /// Explicit inclusive range
    Range {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl Horizon {
    pub fn minutes(n: i64) -> Self {
        Horizon::Last(Duration::minutes(n))
    }

    pub fn hours(n: i64) -> Self {
        Horizon::Last(Duration::hours(n))
    }

    pub fn days(n: i64) -> Self {
        Horizon::Last(Duration::days(n))
    }

    fn contains(&self, ts: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match *self {
            Horizon::Last(d) => {
                let from = now.checked_sub_signed(d).unwrap_or(DateTime::<Utc>::MIN_UTC);
                let until = now
                    .checked_add_signed(Duration::seconds(MAX_FUTURE_SKEW_SECS))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                ts >= from && ts <= until
            }
            Horizon::Samples(_) => true,
            Horizon::Range { start, end } => ts >= start && ts <= end,
        }
    }
}

impl Default for Horizon {
    fn default() -> Self {
        Horizon::hours(24)
    }
}

impl FromStr for Horizon {
    type Err = anyhow::Error;

    /// Accepts `5m`, `24h`, `7d`, `30d` (any `<n>{m,h,d}`) and `last:<n>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(count) = s.strip_prefix("last:") {
            let n: usize = count
                .parse()
                .with_context(|| format!("Invalid sample count in horizon: {}", s))?;
            if n == 0 {
                bail!("Horizon sample count must be positive");
            }
            return Ok(Horizon::Samples(n));
        }

        let Some((split, unit)) = s.char_indices().last() else {
            bail!("Empty horizon");
        };
        let n: i64 = s[..split]
            .parse()
            .with_context(|| format!("Invalid horizon amount: {}", s))?;
        if n <= 0 {
            bail!("Horizon must be positive: {}", s);
        }
        let span = match unit {
            'm' => Duration::try_minutes(n),
            'h' => Duration::try_hours(n),
            'd' => Duration::try_days(n),
            _ => bail!("Unknown horizon unit in {:?} (expected m, h or d)", s),
        };
        match span {
            Some(d) => Ok(Horizon::Last(d)),
            None => bail!("Horizon out of range: {}", s),
        }
    }
}

impl std::fmt::Display for Horizon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Horizon::Last(d) => {
                let mins = d.num_minutes();
                if mins % (24 * 60) == 0 {
                    write!(f, "{}d", mins / (24 * 60))
                } else if mins % 60 == 0 {
                    write!(f, "{}h", mins / 60)
                } else {
                    write!(f, "{}m", mins)
                }
            }
            Horizon::Samples(n) => write!(f, "last:{}", n),
            Horizon::Range { start, end } => {
                write!(f, "{}..{}", start.to_rfc3339(), end.to_rfc3339())
            }
        }
    }
}

impl Serialize for Horizon {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Thread-safe rolling window store, one lock per metric.
///
/// Appends to different metrics never contend; readers copy a window
/// under a short read lock so they never see a half-applied append or
/// eviction.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

struct StorageInner {
    windows: Vec<RwLock<MetricWindow>>,
    capacity: usize,
    retention: Duration,
    exclude_non_positive: bool,
}

/// Time-ordered samples for one metric. Timestamps are non-decreasing.
struct MetricWindow {
    data: VecDeque<Sample>,
}

impl MetricWindow {
    fn new() -> Self {
        Self { data: VecDeque::new() }
    }

    fn newest(&self) -> Option<DateTime<Utc>> {
        self.data.back().map(|s| s.timestamp)
    }

    /// Retention is anchored at the newest sample, or at `clock` when that is
    /// earlier, so a single future-dated sample cannot push the window forward.
    fn retention_cutoff(&self, clock: DateTime<Utc>, retention: Duration) -> Option<DateTime<Utc>> {
        self.newest()
            .map(|n| n.min(clock))
            .and_then(|anchor| anchor.checked_sub_signed(retention))
    }

    fn push(&mut self, sample: Sample, capacity: usize, retention: Duration, clock: DateTime<Utc>) -> bool {
        if let Some(cutoff) = self.retention_cutoff(clock, retention) {
            if sample.timestamp < cutoff {
                return false;
            }
        }

        match self.data.back() {
            Some(last) if sample.timestamp < last.timestamp => {
                let idx = self.data.partition_point(|s| s.timestamp <= sample.timestamp);
                self.data.insert(idx, sample);
            }
            _ => self.data.push_back(sample),
        }

        if let Some(cutoff) = self.retention_cutoff(clock, retention) {
            self.evict_before(cutoff);
        }
        while self.data.len() > capacity {
            self.data.pop_front();
        }
        true
    }

    /// Drop samples strictly older than `cutoff`, scanning from the oldest end.
    fn evict_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        while self.data.front().is_some_and(|s| s.timestamp < cutoff) {
            self.data.pop_front();
            evicted += 1;
        }
        evicted
    }

    fn select(&self, horizon: &Horizon, now: DateTime<Utc>) -> Vec<Sample> {
        match *horizon {
            Horizon::Samples(n) => {
                let start = self.data.len().saturating_sub(n);
                self.data.range(start..).copied().collect()
            }
            _ => self
                .data
                .iter()
                .filter(|s| horizon.contains(s.timestamp, now))
                .copied()
                .collect(),
        }
    }
}

impl Storage {
    pub fn new(config: &StorageConfig) -> anyhow::Result<Self> {
        if config.retention_hours == 0 {
            bail!("storage.retention_hours must be positive");
        }
        let windows = MetricId::ALL.iter().map(|_| RwLock::new(MetricWindow::new())).collect();
        Ok(Self {
            inner: Arc::new(StorageInner {
                windows,
                capacity: config.max_samples.max(1),
                retention: Duration::hours(i64::from(config.retention_hours)),
                exclude_non_positive: config.exclude_non_positive,
            }),
        })
    }

    /// Append one sample. Returns `false` when the sample was not stored
    /// (excluded as non-positive, or older than the retention horizon).
    pub fn append(&self, metric: MetricId, timestamp: DateTime<Utc>, value: f64) -> bool {
        if !value.is_finite() || (self.inner.exclude_non_positive && value <= 0.0) {
            return false;
        }
        let mut window = self.inner.windows[metric.index()]
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        window.push(Sample { timestamp, value }, self.inner.capacity, self.inner.retention, Utc::now())
    }

    /// Append every present metric of a reading. Returns how many were stored.
    pub fn insert(&self, reading: &Reading) -> usize {
        reading
            .metrics
            .iter()
            .filter(|(metric, value)| self.append(*metric, reading.timestamp, *value))
            .count()
    }

    /// Copy of the samples of `metric` that fall inside `horizon`, oldest first.
    pub fn window(&self, metric: MetricId, horizon: &Horizon, now: DateTime<Utc>) -> Vec<Sample> {
        let window = self.inner.windows[metric.index()]
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        window.select(horizon, now)
    }

    /// Values only, for the statistics functions.
    pub fn values(&self, metric: MetricId, horizon: &Horizon, now: DateTime<Utc>) -> Vec<f64> {
        self.window(metric, horizon, now).into_iter().map(|s| s.value).collect()
    }

    /// Evict samples older than the retention horizon relative to `now`.
    pub fn evict(&self, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = now.checked_sub_signed(self.inner.retention) else {
            return 0;
        };
        let evicted = self
            .inner
            .windows
            .iter()
            .map(|w| w.write().unwrap_or_else(PoisonError::into_inner).evict_before(cutoff))
            .sum();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted stale samples");
        }
        evicted
    }

    pub fn latest(&self, metric: MetricId) -> Option<Sample> {
        let window = self.inner.windows[metric.index()]
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        window.data.back().copied()
    }

    pub fn len(&self, metric: MetricId) -> usize {
        self.inner.windows[metric.index()]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .data
            .len()
    }

    /// Newest timestamp across all metrics.
    pub fn newest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.inner
            .windows
            .iter()
            .filter_map(|w| w.read().unwrap_or_else(PoisonError::into_inner).newest())
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    fn storage(max_samples: usize, retention_hours: u32) -> Storage {
        Storage::new(&StorageConfig {
            max_samples,
            retention_hours,
            exclude_non_positive: true,
        })
        .unwrap()
    }

    #[test]
    fn append_keeps_time_order_for_late_samples() {
        let s = storage(100, 24);
        s.append(MetricId::Pm25, t0() + Duration::minutes(10), 3.0);
        s.append(MetricId::Pm25, t0(), 1.0);
        s.append(MetricId::Pm25, t0() + Duration::minutes(5), 2.0);

        let values = s.values(MetricId::Pm25, &Horizon::Samples(10), t0());
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn capacity_bounds_each_window() {
        let s = storage(3, 24);
        for i in 0..5 {
            s.append(MetricId::Co, t0() + Duration::seconds(i), (i + 1) as f64);
        }
        assert_eq!(s.len(MetricId::Co), 3);
        assert_eq!(s.values(MetricId::Co, &Horizon::Samples(10), t0()), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn retention_evicts_on_append_and_drops_stale_late_samples() {
        let s = storage(100, 1);
        s.append(MetricId::O3, t0(), 1.0);
        s.append(MetricId::O3, t0() + Duration::minutes(90), 2.0);
        assert_eq!(s.len(MetricId::O3), 1);

        assert!(!s.append(MetricId::O3, t0(), 5.0));
        assert_eq!(s.len(MetricId::O3), 1);
    }

    #[test]
    fn evict_uses_caller_clock() {
        let s = storage(100, 1);
        s.append(MetricId::No2, t0(), 1.0);
        s.append(MetricId::Pm10, t0() + Duration::minutes(30), 1.0);

        assert_eq!(s.evict(t0() + Duration::minutes(70)), 1);
        assert_eq!(s.len(MetricId::No2), 0);
        assert_eq!(s.len(MetricId::Pm10), 1);
    }

    #[test]
    fn horizon_selects_by_age() {
        let s = storage(100, 48);
        for h in 0..30 {
            s.append(MetricId::Pm25, t0() + Duration::hours(h), h as f64 + 1.0);
        }
        let now = t0() + Duration::hours(29);
        assert_eq!(s.window(MetricId::Pm25, &Horizon::hours(24), now).len(), 25);
        assert_eq!(s.window(MetricId::Pm25, &Horizon::minutes(5), now).len(), 1);

        let range = Horizon::Range {
            start: t0() + Duration::hours(2),
            end: t0() + Duration::hours(4),
        };
        assert_eq!(s.values(MetricId::Pm25, &range, now), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn non_positive_values_are_excluded_when_configured() {
        let s = storage(100, 24);
        assert!(!s.append(MetricId::Co, t0(), 0.0));
        assert!(!s.append(MetricId::Co, t0(), -1.0));
        assert!(s.append(MetricId::Co, t0(), 0.5));

        let keep_zero = Storage::new(&StorageConfig {
            exclude_non_positive: false,
            ..StorageConfig::default()
        })
        .unwrap();
        assert!(keep_zero.append(MetricId::Co, t0(), 0.0));
    }

    #[test]
    fn empty_store_reads_are_empty() {
        let s = storage(10, 24);
        assert!(s.window(MetricId::Light, &Horizon::default(), t0()).is_empty());
        assert!(s.latest(MetricId::Light).is_none());
        assert!(s.newest_timestamp().is_none());
    }

    #[test]
    fn horizon_parsing() {
        assert_eq!("5m".parse::<Horizon>().unwrap(), Horizon::minutes(5));
        assert_eq!("24h".parse::<Horizon>().unwrap(), Horizon::hours(24));
        assert_eq!("30d".parse::<Horizon>().unwrap(), Horizon::days(30));
        assert_eq!("last:300".parse::<Horizon>().unwrap(), Horizon::Samples(300));
        assert!("7w".parse::<Horizon>().is_err());
        assert!("0h".parse::<Horizon>().is_err());
        assert!("last:0".parse::<Horizon>().is_err());
        assert!("5µ".parse::<Horizon>().is_err());
        assert!("µ".parse::<Horizon>().is_err());
        assert!("".parse::<Horizon>().is_err());
        assert!("9999999999999d".parse::<Horizon>().is_err());
        assert_eq!(Horizon::days(7).to_string(), "7d");
        assert_eq!(Horizon::minutes(90).to_string(), "90m");
    }

    #[test]
    fn future_dated_sample_does_not_freeze_the_window() {
        let s = storage(1000, 24);
        let now = Utc::now();
        for i in 0..10 {
            assert!(s.append(MetricId::Pm25, now - Duration::minutes(20 - i), 10.0 + i as f64));
        }
        // Epoch microseconds read as milliseconds land tens of thousands of years ahead
        let far = now + Duration::days(365 * 50_000);
        assert!(s.append(MetricId::Pm25, far, 99.0));
        assert_eq!(s.len(MetricId::Pm25), 11);

        for i in 0..10 {
            assert!(s.append(MetricId::Pm25, now - Duration::minutes(9 - i), 30.0 + i as f64));
        }
        assert_eq!(s.len(MetricId::Pm25), 21);
        let recent = s.values(MetricId::Pm25, &Horizon::hours(1), now);
        assert_eq!(recent.len(), 20);
        assert!(!recent.contains(&99.0));
    }

    #[test]
    fn last_horizon_tolerates_small_clock_skew() {
        let s = storage(100, 24);
        s.append(MetricId::Co, t0() + Duration::seconds(30), 1.0);
        s.append(MetricId::Co, t0() + Duration::hours(1), 2.0);
        assert_eq!(s.values(MetricId::Co, &Horizon::minutes(5), t0()), vec![1.0]);
    }
}
