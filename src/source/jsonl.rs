use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};

use crate::normalize::RawReading;
use super::ReadingSource;

type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;

/// Reads one JSON reading per line. Blank lines are skipped; malformed
/// lines are logged and skipped.
pub struct JsonLinesSource {
    lines: Lines<BufReader<BoxedReader>>,
    line_no: u64,
}

impl JsonLinesSource {
    pub fn new(reader: BoxedReader) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            line_no: 0,
        }
    }

    pub fn stdin() -> Self {
        Self::new(Box::new(tokio::io::stdin()))
    }

    pub async fn open(path: &str) -> Result<Self> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open readings file: {}", path))?;
        Ok(Self::new(Box::new(file)))
    }
}

#[async_trait]
impl ReadingSource for JsonLinesSource {
    fn name(&self) -> &str { "jsonl" }

    async fn next(&mut self) -> Result<Option<RawReading>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match RawReading::from_json(line) {
                Ok(raw) => return Ok(Some(raw)),
                Err(e) => {
                    tracing::warn!(line = self.line_no, error = %e, "Skipping malformed reading");
                }
            }
        }
        Ok(None)
    }
}
