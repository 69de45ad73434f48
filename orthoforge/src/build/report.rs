//! Build outcome reporting.

use crate::coord::TileKey;
use crate::pipeline::{ConvertSummary, DownloadSummary};
use std::fmt;
use std::time::Duration;

/// Terminal state of one tile build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The navigation-data file was committed to its final path.
    Committed,
    /// The build was cut short by cancellation; no artifact was committed.
    Interrupted,
    /// The build failed; no artifact was committed.
    Failed(String),
}

impl fmt::Display for BuildOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildOutcome::Committed => write!(f, "committed"),
            BuildOutcome::Interrupted => write!(f, "interrupted"),
            BuildOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Everything that happened while building one tile.
#[derive(Debug)]
pub struct BuildReport {
    /// The tile that was built.
    pub tile: TileKey,
    /// Terminal state of the build.
    pub outcome: BuildOutcome,
    /// Download stage summary.
    pub downloads: DownloadSummary,
    /// Convert stage summary.
    pub converts: ConvertSummary,
    /// Wall-clock duration of the build.
    pub elapsed: Duration,
}

impl BuildReport {
    /// True if the tile's artifact was committed.
    pub fn is_committed(&self) -> bool {
        self.outcome == BuildOutcome::Committed
    }

    /// True if the build ended through cancellation.
    pub fn is_interrupted(&self) -> bool {
        self.outcome == BuildOutcome::Interrupted
    }

    /// Number of texture requests abandoned after retries.
    pub fn failed_downloads(&self) -> usize {
        self.downloads.permanent_failures.len()
    }
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tile {} {} in {:.1}s ({} fetched, {} abandoned, {} converted, {} skipped)",
            self.tile,
            self.outcome,
            self.elapsed.as_secs_f64(),
            self.downloads.completed,
            self.failed_downloads(),
            self.converts.completed,
            self.converts.failed,
        )
    }
}
