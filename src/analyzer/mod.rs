//! Pure analytics over reading classifications and metric windows.
//!
//! Nothing in here performs I/O or holds locks; the [`crate::engine::Engine`]
//! takes window snapshots from storage and feeds them through these functions.

pub mod correlation;
pub mod forecast;
pub mod health;
pub mod stats;
pub mod threshold;
pub mod trend;
pub mod zscore;

pub use correlation::{CorrelationResult, Strength};
pub use forecast::{Forecast, Forecaster, ProjectionPoint};
pub use health::{HealthLabel, HealthScore};
pub use stats::Summary;
pub use threshold::{classify, AlertTracker, Classification, ThresholdSet};
pub use trend::{Direction, TrendBasis, TrendResult};
pub use zscore::{AnomalyLatch, AnomalyRecord, AnomalyTier, ZScoreDetector};
