pub mod jsonl;
pub mod simulate;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{SourceConfig, SourceKind};
use crate::normalize::RawReading;

/// Trait for ingestion collaborators.
///
/// A source yields raw readings one at a time; normalization and analysis
/// happen downstream.
#[async_trait]
pub trait ReadingSource: Send {
    /// Human-readable name for this source (e.g., "jsonl", "simulate")
    fn name(&self) -> &str;

    /// Next raw reading, or `None` once the source is exhausted.
    async fn next(&mut self) -> Result<Option<RawReading>>;
}

/// Create the configured source
pub async fn create_source(config: &SourceConfig, location: Option<String>) -> Result<Box<dyn ReadingSource>> {
    let source: Box<dyn ReadingSource> = match config.kind {
        SourceKind::Jsonl => match config.path {
            Some(ref path) => Box::new(jsonl::JsonLinesSource::open(path).await?),
            None => Box::new(jsonl::JsonLinesSource::stdin()),
        },
        SourceKind::Simulate => Box::new(simulate::SimulatedSource::new(config.interval_secs, location)),
    };

    tracing::info!(source = source.name(), "Initialized reading source");
    Ok(source)
}
