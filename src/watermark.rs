use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, info};
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};

/// Timestamp format used in the time file, always UTC.
const TIMEFILE_FORMAT: &str = "%Y-%m-%d %H:%M:%S Z";

/// The persisted "last successful run" timestamp.
///
/// Read at startup, written only after a successful, non-preview run; a
/// failed run leaves the previous watermark in place so the next run covers
/// the same window again. The value is a monotonically advancing UTC
/// watermark; duplicate suppression on re-run makes the overlap safe.
#[derive(Debug, Clone)]
pub struct Watermark {
    path: PathBuf,
}

impl Watermark {
    /// Time file sited next to the config file: `<config stem>_time.file`.
    pub fn for_config(config_path: &Path) -> Self {
        let stem = config_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("bldsync");
        let path = config_path.with_file_name(format!("{stem}_time.file"));
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the last successful run time. `None` when no time file exists
    /// yet (first run).
    pub fn read(&self) -> Result<Option<DateTime<Utc>>> {
        if !self.path.exists() {
            debug!("No time file at {}, first run", self.path.display());
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let trimmed = content.trim();
        let parsed = NaiveDateTime::parse_from_str(trimmed, TIMEFILE_FORMAT).map_err(|e| {
            SyncError::Parse(format!(
                "time file {} holds an unreadable timestamp '{trimmed}': {e}",
                self.path.display()
            ))
        })?;
        Ok(Some(parsed.and_utc()))
    }

    /// Record a new last successful run time.
    pub fn write(&self, timestamp: DateTime<Utc>) -> Result<()> {
        let formatted = timestamp.format(TIMEFILE_FORMAT).to_string();
        std::fs::write(&self.path, &formatted)?;
        info!("Wrote last run time {formatted} to {}", self.path.display());
        Ok(())
    }
}
