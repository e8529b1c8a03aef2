use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::analyzer::threshold::ThresholdSet;
use crate::config::{Config, ThresholdConfig};

/// Live threshold set shared between ingestion and queries.
///
/// Callers take an `Arc` snapshot per operation and pass it explicitly, so a
/// replacement never changes limits halfway through a computation.
#[derive(Clone)]
pub struct Settings {
    current: Arc<RwLock<Arc<ThresholdSet>>>,
    path: Option<PathBuf>,
}

impl Settings {
    pub fn new(initial: ThresholdSet) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(initial))),
            path: None,
        }
    }

    /// Start from the configured table (or defaults) and, if a thresholds
    /// file is configured, try it once. A failing file is logged, not fatal.
    pub fn from_config(config: &Config) -> Self {
        let mut settings = Self::new(config.thresholds.to_set());
        if let Some(ref path) = config.settings.thresholds_file {
            settings.path = Some(PathBuf::from(path));
            if let Err(e) = settings.reload() {
                tracing::warn!(path = %path, error = %e, "Using built-in thresholds");
            }
        }
        settings
    }

    pub fn current(&self) -> Arc<ThresholdSet> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn replace(&self, set: ThresholdSet) {
        tracing::info!(metrics = set.len(), "Threshold set replaced");
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(set);
    }

    /// Re-read the thresholds file. Returns whether the live set changed.
    pub fn reload(&self) -> Result<bool> {
        let Some(ref path) = self.path else {
            return Ok(false);
        };
        let set = load_file(path)?;
        if *self.current() == set {
            return Ok(false);
        }
        self.replace(set);
        Ok(true)
    }

    /// Poll the thresholds file forever. Errors keep the last-known set.
    pub async fn watch(self, interval: Duration) {
        if self.path.is_none() {
            return;
        }
        loop {
            tokio::time::sleep(interval).await;
            if let Err(e) = self.reload() {
                tracing::warn!(error = %e, "Threshold reload failed, keeping last-known set");
            }
        }
    }
}

/// Parse a TOML file of `metric = limit` pairs.
pub fn load_file(path: &Path) -> Result<ThresholdSet> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read thresholds file: {}", path.display()))?;
    let table: ThresholdConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse thresholds file: {}", path.display()))?;
    Ok(table.to_set())
}
