//! Terminal progress rendering.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use orthoforge::pipeline::{ProgressSink, Stage};
use std::collections::HashMap;
use std::sync::Mutex;

/// Progress sink drawing one bar per pipeline stage.
///
/// Bars are created lazily on the first update for a stage and reused
/// across tiles; a new tile simply rewinds them.
pub struct ConsoleProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<Stage, ProgressBar>>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn bar(&self, stage: Stage) -> ProgressBar {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        bars.entry(stage)
            .or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new(100));
                bar.set_style(
                    ProgressStyle::with_template(
                        "{prefix:>8} [{bar:40.cyan/blue}] {pos:>3}%",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
                );
                bar.set_prefix(stage.label());
                bar
            })
            .clone()
    }

    /// Clears all bars, e.g. before printing the final summary.
    pub fn clear(&self) {
        let bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        for bar in bars.values() {
            bar.finish_and_clear();
        }
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsoleProgress {
    fn progress(&self, stage: Stage, percent: f64) {
        self.bar(stage).set_position(percent.round() as u64);
    }
}
