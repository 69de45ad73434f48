//! Progress accounting for the download and convert stages.
//!
//! Percentages are computed as `100 * completed / (completed + in-flight +
//! queued)` and are monotone: once a value has been reported the tracker
//! never reports a lower one, even when late enqueues grow the denominator.

use parking_lot::Mutex;
use std::sync::Arc;

/// Pipeline stage a progress update belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Imagery download stage.
    Download,
    /// Texture conversion stage.
    Convert,
}

impl Stage {
    /// Human-readable stage label.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Convert => "convert",
        }
    }
}

/// Receives progress updates from the pipeline.
///
/// Implementations must be cheap; updates are emitted from worker tasks.
pub trait ProgressSink: Send + Sync + 'static {
    /// Reports that `stage` is `percent` complete (0.0 to 100.0).
    fn progress(&self, stage: Stage, percent: f64);
}

/// Sink that discards all updates.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn progress(&self, _stage: Stage, _percent: f64) {}
}

#[derive(Debug, Default)]
struct Counts {
    completed: u64,
    in_flight: u64,
    queued: u64,
    reported: f64,
}

impl Counts {
    fn percent(&self) -> f64 {
        let total = self.completed + self.in_flight + self.queued;
        if total == 0 {
            return self.reported;
        }
        let raw = 100.0 * self.completed as f64 / total as f64;
        raw.clamp(0.0, 100.0)
    }
}

/// Per-stage progress tracker.
///
/// One tracker is shared by all workers of a stage. All transitions hold
/// the internal lock for the duration of the sink call so reported values
/// stay ordered.
pub struct ProgressTracker {
    stage: Stage,
    sink: Arc<dyn ProgressSink>,
    counts: Mutex<Counts>,
}

impl ProgressTracker {
    /// Creates a tracker reporting to `sink` for `stage`.
    pub fn new(stage: Stage, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            stage,
            sink,
            counts: Mutex::new(Counts::default()),
        }
    }

    /// Records one newly queued item.
    pub fn enqueued(&self) {
        let mut counts = self.counts.lock();
        counts.queued += 1;
        self.report(&mut counts);
    }

    /// Records that a worker took an item off the queue.
    pub fn begin(&self) {
        let mut counts = self.counts.lock();
        counts.queued = counts.queued.saturating_sub(1);
        counts.in_flight += 1;
    }

    /// Records one successfully finished item.
    pub fn complete(&self) {
        let mut counts = self.counts.lock();
        counts.in_flight = counts.in_flight.saturating_sub(1);
        counts.completed += 1;
        self.report(&mut counts);
    }

    /// Records one item abandoned after a failure.
    pub fn fail(&self) {
        let mut counts = self.counts.lock();
        counts.in_flight = counts.in_flight.saturating_sub(1);
        self.report(&mut counts);
    }

    /// Records an item moving from in-flight back to queued for a retry.
    pub fn requeued(&self) {
        let mut counts = self.counts.lock();
        counts.in_flight = counts.in_flight.saturating_sub(1);
        counts.queued += 1;
    }

    /// Overwrites the queued count with an exact queue length.
    ///
    /// Coordinators call this after queue operations so the denominator
    /// tracks the real backlog even for items enqueued by another stage.
    pub fn set_queued(&self, queued: u64) {
        self.counts.lock().queued = queued;
    }

    /// Records a duplicate item dropped without processing.
    pub fn skipped(&self) {
        let mut counts = self.counts.lock();
        counts.queued = counts.queued.saturating_sub(1);
        self.report(&mut counts);
    }

    /// Forces a terminal 100% report for a stage that drained cleanly.
    pub fn finish(&self) {
        let mut counts = self.counts.lock();
        counts.reported = 100.0;
        self.sink.progress(self.stage, 100.0);
    }

    /// Completed item count so far.
    pub fn completed(&self) -> u64 {
        self.counts.lock().completed
    }

    /// In-flight item count right now.
    pub fn in_flight(&self) -> u64 {
        self.counts.lock().in_flight
    }

    fn report(&self, counts: &mut Counts) {
        let percent = counts.percent();
        if percent > counts.reported {
            counts.reported = percent;
            self.sink.progress(self.stage, percent);
        }
    }
}
