//! Convert stage coordinator.
//!
//! A smaller pool of workers pops fetched imagery off the conversion
//! queue and packages it into platform textures. Conversion failures are
//! counted and skipped, never retried: the imagery is already on disk, so
//! a failure here is deterministic.

use super::progress::ProgressTracker;
use super::queue::{QueueItem, WorkQueue};
use crate::fetch::FetchedTexture;
use crate::texture::TextureConverter;
use crate::tile::BuildTarget;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Default number of concurrent convert workers.
pub const DEFAULT_CONVERT_WORKERS: usize = 4;

const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Tuning knobs for the convert stage.
#[derive(Debug, Clone)]
pub struct ConvertConfig {
    /// Number of concurrent convert workers.
    pub workers: usize,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_CONVERT_WORKERS,
        }
    }
}

/// Outcome of one convert stage run.
#[derive(Debug, Default)]
pub struct ConvertSummary {
    /// Textures packaged successfully.
    pub completed: u64,
    /// Textures skipped after a conversion failure.
    pub failed: u64,
    /// True if the stage was cut short by cancellation.
    pub interrupted: bool,
}

struct Shared {
    converter: Arc<dyn TextureConverter>,
    target: Arc<BuildTarget>,
    conversion: Arc<WorkQueue<FetchedTexture>>,
    tracker: Arc<ProgressTracker>,
    cancel: CancellationToken,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Drives the convert worker pool for one build.
pub struct ConvertCoordinator {
    converter: Arc<dyn TextureConverter>,
    config: ConvertConfig,
}

impl ConvertCoordinator {
    /// Creates a coordinator around `converter`.
    pub fn new(converter: Arc<dyn TextureConverter>, config: ConvertConfig) -> Self {
        Self { converter, config }
    }

    /// Runs the stage to completion.
    ///
    /// `upstream_done` turns true once the download stage has drained; the
    /// stage then drains the remaining queue and plants one shutdown
    /// sentinel per worker. On cancellation workers exit through the token;
    /// an in-flight conversion is aborted rather than awaited, leaving at
    /// worst a partial texture the next build overwrites.
    pub async fn run(
        &self,
        target: Arc<BuildTarget>,
        conversion: Arc<WorkQueue<FetchedTexture>>,
        mut upstream_done: watch::Receiver<bool>,
        tracker: Arc<ProgressTracker>,
        cancel: CancellationToken,
    ) -> ConvertSummary {
        let shared = Arc::new(Shared {
            converter: Arc::clone(&self.converter),
            target,
            conversion: Arc::clone(&conversion),
            tracker: Arc::clone(&tracker),
            cancel: cancel.clone(),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        let workers: Vec<_> = (0..self.config.workers.max(1))
            .map(|id| {
                let shared = Arc::clone(&shared);
                tokio::spawn(worker_loop(id, shared))
            })
            .collect();

        while !*upstream_done.borrow() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = upstream_done.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        if !cancel.is_cancelled() {
            loop {
                if conversion.is_idle() {
                    for _ in 0..workers.len() {
                        conversion.push_shutdown();
                    }
                    break;
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(DRAIN_POLL) => {}
                }
            }
        }

        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "convert worker terminated abnormally");
            }
        }

        let interrupted = cancel.is_cancelled();
        if !interrupted {
            tracker.finish();
        }

        ConvertSummary {
            completed: shared.completed.load(Ordering::Acquire),
            failed: shared.failed.load(Ordering::Acquire),
            interrupted,
        }
    }
}

async fn worker_loop(id: usize, shared: Arc<Shared>) {
    loop {
        let fetched = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            item = shared.conversion.pop() => match item {
                QueueItem::Work(fetched) => fetched,
                QueueItem::Shutdown => break,
            },
        };

        shared.tracker.begin();
        shared.tracker.set_queued(shared.conversion.len() as u64);

        let result = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => {
                shared.conversion.task_done();
                break;
            }
            result = shared.converter.convert(&shared.target, &fetched) => result,
        };

        match result {
            Ok(()) => {
                shared.completed.fetch_add(1, Ordering::AcqRel);
                shared.tracker.complete();
            }
            Err(error) => {
                warn!(
                    worker = id,
                    texture = %fetched.request,
                    error = %error,
                    "texture conversion failed, skipping"
                );
                shared.failed.fetch_add(1, Ordering::AcqRel);
                shared.tracker.fail();
            }
        }
        shared.conversion.task_done();
    }
}
