//! JSON-lines event feed.
//!
//! The indexer dumps one [`RawEvent`] per line. Blank lines are skipped.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::events::RawEvent;

/// Reads events from a JSON-lines file.
#[derive(Debug, Clone)]
pub struct JsonLinesFeed {
    path: PathBuf,
}

impl JsonLinesFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every event at or after `start_block`, in file order.
    ///
    /// A missing file yields an empty feed.
    pub async fn load(&self, start_block: u64) -> Result<Vec<RawEvent>> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            info!(path = %self.path.display(), "No event feed found, nothing to process");
            return Ok(Vec::new());
        }

        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read event feed {}", self.path.display()))?;

        let events = parse_lines(&contents, start_block)
            .with_context(|| format!("Malformed event feed {}", self.path.display()))?;

        debug!(
            path = %self.path.display(),
            start_block,
            events = events.len(),
            "Loaded events"
        );
        Ok(events)
    }
}

fn parse_lines(contents: &str, start_block: u64) -> Result<Vec<RawEvent>> {
    let mut events = Vec::new();
    for (line_number, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: RawEvent = serde_json::from_str(line)
            .with_context(|| format!("line {}", line_number + 1))?;
        if event.block_number >= start_block {
            events.push(event);
        }
    }
    Ok(events)
}
