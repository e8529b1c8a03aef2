//! Sensor analytics engine.
//!
//! Ingestion classifies each reading immediately and appends it to the
//! rolling windows; every query takes a snapshot of the windows it needs
//! and recomputes its result from scratch. The engine performs no I/O:
//! alerts come back to the caller, which hands them to the alerter.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analyzer::{
    classify, correlation, health, stats, trend, AlertTracker, AnomalyLatch, AnomalyRecord, Classification,
    CorrelationResult, Forecast, Forecaster, HealthScore, ProjectionPoint, Summary, ThresholdSet,
    TrendBasis, TrendResult, ZScoreDetector,
};
use crate::config::Config;
use crate::storage::{Horizon, Storage};
use crate::types::{Alert, MetricId, Reading};

/// What ingesting one reading produced
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub reading: Reading,
    pub classification: Classification,
    pub alerts: Vec<Alert>,
    /// Samples appended to the windows
    pub stored: usize,
}

/// Every query payload for one horizon, ready to serialize.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsReport {
    pub generated_at: DateTime<Utc>,
    pub station: String,
    pub horizon: Horizon,
    pub thresholds: ThresholdSet,
    pub summaries: BTreeMap<MetricId, Summary>,
    pub trends: BTreeMap<MetricId, TrendResult>,
    pub correlations: Vec<CorrelationResult>,
    pub anomalies: Vec<AnomalyRecord>,
    pub forecasts: Vec<Forecast>,
    pub projections: BTreeMap<MetricId, Vec<ProjectionPoint>>,
    pub health: HealthScore,
}

pub struct Engine {
    storage: Storage,
    tracker: Mutex<AlertTracker>,
    latch: Mutex<AnomalyLatch>,
    detector: ZScoreDetector,
    forecaster: Forecaster,
    trend_basis: TrendBasis,
    station: String,
}

impl Engine {
    pub fn new(config: &Config) -> Result<Self> {
        let storage = Storage::new(&config.storage)?;
        Ok(Self {
            storage,
            tracker: Mutex::new(AlertTracker::new(config.agent.station.clone())),
            latch: Mutex::new(AnomalyLatch::new()),
            detector: ZScoreDetector::new(&config.analyzer),
            forecaster: Forecaster::new(&config.analyzer),
            trend_basis: config.analyzer.trend_basis,
            station: config.agent.station.clone(),
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn station(&self) -> &str {
        &self.station
    }

    /// Classify a reading, update alert state and append it to the windows.
    ///
    /// Calls are serialized so alert transitions follow arrival order.
    pub fn ingest(&self, reading: Reading, thresholds: &ThresholdSet) -> IngestOutcome {
        let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
        let classification = classify(&reading, thresholds);
        let alerts = tracker.observe(&reading, &classification);
        let stored = self.storage.insert(&reading);
        drop(tracker);

        tracing::debug!(
            overall = %classification.overall,
            causes = classification.causes.len(),
            alerts = alerts.len(),
            stored,
            "Reading ingested"
        );

        IngestOutcome { reading, classification, alerts, stored }
    }

    pub fn summary(
        &self,
        metric: MetricId,
        horizon: &Horizon,
        now: DateTime<Utc>,
        thresholds: &ThresholdSet,
    ) -> Summary {
        stats::summarize(&self.storage.values(metric, horizon, now), thresholds.get(metric))
    }

    /// Summaries of every metric that has samples in the horizon.
    pub fn summaries(
        &self,
        horizon: &Horizon,
        now: DateTime<Utc>,
        thresholds: &ThresholdSet,
    ) -> BTreeMap<MetricId, Summary> {
        MetricId::ALL
            .iter()
            .map(|m| (*m, self.summary(*m, horizon, now, thresholds)))
            .filter(|(_, s)| s.count > 0)
            .collect()
    }

    pub fn trend(&self, metric: MetricId, horizon: &Horizon, now: DateTime<Utc>) -> Option<TrendResult> {
        trend::estimate(&self.storage.window(metric, horizon, now), self.trend_basis)
    }

    pub fn trends(&self, horizon: &Horizon, now: DateTime<Utc>) -> BTreeMap<MetricId, TrendResult> {
        MetricId::ALL
            .iter()
            .filter_map(|m| self.trend(*m, horizon, now).map(|t| (*m, t)))
            .collect()
    }

    /// Pearson correlation for every pair of metrics with samples.
    pub fn correlations(&self, horizon: &Horizon, now: DateTime<Utc>) -> Vec<CorrelationResult> {
        let series: Vec<(MetricId, Vec<f64>)> = MetricId::ALL
            .iter()
            .map(|m| (*m, self.storage.values(*m, horizon, now)))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        correlation::correlate_all(&series)
    }

    /// Z-score check of the latest sample of each metric.
    pub fn anomalies(&self, horizon: &Horizon, now: DateTime<Utc>) -> Vec<AnomalyRecord> {
        MetricId::ALL
            .iter()
            .filter_map(|m| self.detector.check(*m, &self.storage.window(*m, horizon, now)))
            .collect()
    }

    /// Like [`Engine::anomalies`] but only outliers not returned by an
    /// earlier call, for turning periodic scans into alerts.
    pub fn fresh_anomalies(&self, horizon: &Horizon, now: DateTime<Utc>) -> Vec<AnomalyRecord> {
        let records = self.anomalies(horizon, now);
        let mut latch = self.latch.lock().unwrap_or_else(PoisonError::into_inner);
        records.into_iter().filter(|r| latch.admit(r)).collect()
    }

    pub fn forecast(&self, metric: MetricId, horizon: &Horizon, now: DateTime<Utc>) -> Option<Forecast> {
        let values = self.storage.values(metric, horizon, now);
        self.forecaster.forecast(metric, &values, &mut rand::thread_rng())
    }

    pub fn forecasts(&self, horizon: &Horizon, now: DateTime<Utc>) -> Vec<Forecast> {
        MetricId::ALL
            .iter()
            .filter_map(|m| self.forecast(*m, horizon, now))
            .collect()
    }

    pub fn projection(&self, metric: MetricId, horizon: &Horizon, now: DateTime<Utc>) -> Vec<ProjectionPoint> {
        self.forecaster.project(&self.storage.values(metric, horizon, now))
    }

    /// Health score from the window average of every thresholded metric.
    /// Metrics without samples average to 0 and cost nothing.
    pub fn health(&self, horizon: &Horizon, now: DateTime<Utc>, thresholds: &ThresholdSet) -> HealthScore {
        let averages = thresholds
            .iter()
            .map(|(m, _)| (m, stats::mean(&self.storage.values(m, horizon, now))));
        health::score(averages, thresholds)
    }

    pub fn report(&self, horizon: &Horizon, now: DateTime<Utc>, thresholds: &ThresholdSet) -> AnalyticsReport {
        let projections = MetricId::ALL
            .iter()
            .map(|m| (*m, self.projection(*m, horizon, now)))
            .filter(|(_, p)| !p.is_empty())
            .collect();

        AnalyticsReport {
            generated_at: now,
            station: self.station.clone(),
            horizon: *horizon,
            thresholds: thresholds.clone(),
            summaries: self.summaries(horizon, now, thresholds),
            trends: self.trends(horizon, now),
            correlations: self.correlations(horizon, now),
            anomalies: self.anomalies(horizon, now),
            forecasts: self.forecasts(horizon, now),
            projections,
            health: self.health(horizon, now, thresholds),
        }
    }
}
