//! Download stage coordinator.
//!
//! Runs a pool of fetch workers over the acquisition queue. Transient
//! failures are retried with a short backoff by requeueing the request, up
//! to a per-request attempt cap; permanent failures are recorded and
//! abandoned immediately. Duplicate requests are dropped so a texture is
//! never fetched twice within one build.

use super::progress::ProgressTracker;
use super::queue::{QueueItem, WorkQueue};
use crate::fetch::{FetchError, FetchedTexture, TextureFetcher};
use crate::tile::{BuildTarget, TextureRequest};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default number of concurrent fetch workers.
pub const DEFAULT_DOWNLOAD_WORKERS: usize = 16;
/// Default per-request attempt cap (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default pause before a retried request re-enters the queue.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Poll interval while waiting for in-flight work to drain.
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Tuning knobs for the download stage.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Number of concurrent fetch workers.
    pub workers: usize,
    /// Maximum attempts per request, including the first.
    pub max_attempts: u32,
    /// Pause before a transient failure is retried.
    pub retry_backoff: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_DOWNLOAD_WORKERS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// A request abandoned after exhausting its attempts.
#[derive(Debug, Clone)]
pub struct PermanentFailure {
    /// The abandoned request.
    pub request: TextureRequest,
    /// Total attempts made before giving up.
    pub attempts: u32,
    /// The final error.
    pub error: FetchError,
}

/// Outcome of one download stage run.
#[derive(Debug, Default)]
pub struct DownloadSummary {
    /// Requests fetched successfully.
    pub completed: u64,
    /// Fetch attempts made, retries included.
    pub attempts: u64,
    /// Requests abandoned after retries or a permanent error.
    pub permanent_failures: Vec<PermanentFailure>,
    /// True if the stage was cut short by cancellation.
    pub interrupted: bool,
}

// Retry bookkeeping for one request between attempts.
struct RetryState {
    attempts: u32,
    // True while the requeued copy has not been popped again; lets a pop
    // distinguish the retry re-entry from a plain duplicate.
    pending: bool,
}

struct Shared {
    fetcher: Arc<dyn TextureFetcher>,
    target: Arc<BuildTarget>,
    acquisition: Arc<WorkQueue<TextureRequest>>,
    conversion: Option<Arc<WorkQueue<FetchedTexture>>>,
    tracker: Arc<ProgressTracker>,
    cancel: CancellationToken,
    max_attempts: u32,
    retry_backoff: Duration,
    seen: Mutex<HashSet<TextureRequest>>,
    retries: Mutex<HashMap<TextureRequest, RetryState>>,
    completed: AtomicU64,
    attempts: AtomicU64,
    failures: Mutex<Vec<PermanentFailure>>,
}

/// Drives the download worker pool for one build.
pub struct DownloadCoordinator {
    fetcher: Arc<dyn TextureFetcher>,
    config: DownloadConfig,
}

impl DownloadCoordinator {
    /// Creates a coordinator around `fetcher`.
    pub fn new(fetcher: Arc<dyn TextureFetcher>, config: DownloadConfig) -> Self {
        Self { fetcher, config }
    }

    /// Runs the stage to completion.
    ///
    /// Workers pop from `acquisition`; successful fetches are forwarded to
    /// `conversion` when present. The stage drains once `producer_done`
    /// turns true, the queue is empty and no worker is mid-item; it then
    /// plants one shutdown sentinel per worker. On cancellation sentinels
    /// are skipped and workers exit through the token; an in-flight fetch
    /// is aborted rather than awaited, which is safe because an aborted
    /// request is neither recorded, forwarded nor requeued.
    pub async fn run(
        &self,
        target: Arc<BuildTarget>,
        acquisition: Arc<WorkQueue<TextureRequest>>,
        conversion: Option<Arc<WorkQueue<FetchedTexture>>>,
        mut producer_done: watch::Receiver<bool>,
        tracker: Arc<ProgressTracker>,
        cancel: CancellationToken,
    ) -> DownloadSummary {
        let shared = Arc::new(Shared {
            fetcher: Arc::clone(&self.fetcher),
            target,
            acquisition: Arc::clone(&acquisition),
            conversion,
            tracker: Arc::clone(&tracker),
            cancel: cancel.clone(),
            max_attempts: self.config.max_attempts.max(1),
            retry_backoff: self.config.retry_backoff,
            seen: Mutex::new(HashSet::new()),
            retries: Mutex::new(HashMap::new()),
            completed: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            failures: Mutex::new(Vec::new()),
        });

        let workers: Vec<_> = (0..self.config.workers.max(1))
            .map(|id| {
                let shared = Arc::clone(&shared);
                tokio::spawn(worker_loop(id, shared))
            })
            .collect();

        // Wait for the producer before judging the queue drained: an empty
        // queue means nothing while requests are still being generated.
        while !*producer_done.borrow() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = producer_done.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        if !cancel.is_cancelled() {
            loop {
                if acquisition.is_idle() {
                    for _ in 0..workers.len() {
                        acquisition.push_shutdown();
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
            // A panicked worker is a bug; surface it instead of hanging.
            if let Err(e) = worker.await {
                warn!(error = %e, "download worker terminated abnormally");
            }
        }

        let interrupted = cancel.is_cancelled();
        if !interrupted {
            tracker.finish();
        }

        let failures = std::mem::take(&mut *shared.failures.lock());
        DownloadSummary {
            completed: shared.completed.load(Ordering::Acquire),
            attempts: shared.attempts.load(Ordering::Acquire),
            permanent_failures: failures,
            interrupted,
        }
    }
}

async fn worker_loop(id: usize, shared: Arc<Shared>) {
    loop {
        let request = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            item = shared.acquisition.pop() => match item {
                QueueItem::Work(request) => request,
                QueueItem::Shutdown => break,
            },
        };

        let keep_going = process(id, &shared, request).await;
        shared.acquisition.task_done();
        if !keep_going {
            break;
        }
    }
}

// Handles one popped request; returns false if the worker should exit.
async fn process(id: usize, shared: &Shared, request: TextureRequest) -> bool {
    // Every pop goes through the seen set. A second sighting is either the
    // requeued retry copy, which claims the pending retry state, or a
    // duplicate, which is dropped; at most one copy of a request is ever
    // being processed.
    let prior_attempts = if shared.seen.lock().insert(request.clone()) {
        0
    } else {
        let mut retries = shared.retries.lock();
        match retries.get_mut(&request) {
            Some(state) if state.pending => {
                state.pending = false;
                state.attempts
            }
            _ => {
                debug!(worker = id, texture = %request, "duplicate request dropped");
                shared.tracker.skipped();
                return true;
            }
        }
    };

    shared.tracker.begin();
    shared.tracker.set_queued(shared.acquisition.len() as u64);
    shared.attempts.fetch_add(1, Ordering::AcqRel);
    let attempt = prior_attempts + 1;

    let result = tokio::select! {
        biased;
        _ = shared.cancel.cancelled() => return false,
        result = shared.fetcher.fetch(&shared.target, request.clone()) => result,
    };

    match result {
        Ok(fetched) => {
            shared.retries.lock().remove(&request);
            shared.completed.fetch_add(1, Ordering::AcqRel);
            shared.tracker.complete();
            if let Some(conversion) = &shared.conversion {
                tokio::select! {
                    biased;
                    _ = shared.cancel.cancelled() => return false,
                    _ = conversion.push(fetched) => {}
                }
            }
            true
        }
        Err(error) if error.is_transient() && attempt < shared.max_attempts => {
            debug!(
                worker = id,
                texture = %request,
                attempt,
                error = %error,
                "transient fetch failure, will retry"
            );
            shared.retries.lock().insert(
                request.clone(),
                RetryState {
                    attempts: attempt,
                    pending: true,
                },
            );
            shared.tracker.requeued();
            if !shared.retry_backoff.is_zero() {
                tokio::select! {
                    biased;
                    _ = shared.cancel.cancelled() => return false,
                    _ = tokio::time::sleep(shared.retry_backoff) => {}
                }
            }
            shared.acquisition.requeue(request);
            true
        }
        Err(error) => {
            warn!(
                worker = id,
                texture = %request,
                attempts = attempt,
                error = %error,
                "abandoning texture request"
            );
            shared.retries.lock().remove(&request);
            shared.tracker.fail();
            shared.failures.lock().push(PermanentFailure {
                request,
                attempts: attempt,
                error,
            });
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use crate::coord::TileKey;
    use crate::pipeline::progress::{NullProgressSink, Stage};
    use proptest::prelude::*;
    use std::future::Future;
    use std::path::PathBuf;
    use std::pin::Pin;

    /// Fetcher replaying a scripted number of transient failures per
    /// request before succeeding, or failing permanently.
    struct ScriptedFetcher {
        transient: Mutex<HashMap<TextureRequest, u32>>,
        permanent: HashSet<TextureRequest>,
        delay: Duration,
    }

    impl ScriptedFetcher {
        fn succeeding() -> Self {
            Self {
                transient: Mutex::new(HashMap::new()),
                permanent: HashSet::new(),
                delay: Duration::ZERO,
            }
        }

        fn failing_transiently(request: TextureRequest, times: u32) -> Self {
            let mut map = HashMap::new();
            map.insert(request, times);
            Self {
                transient: Mutex::new(map),
                permanent: HashSet::new(),
                delay: Duration::ZERO,
            }
        }

        fn failing_permanently(request: TextureRequest) -> Self {
            Self {
                transient: Mutex::new(HashMap::new()),
                permanent: [request].into_iter().collect(),
                delay: Duration::ZERO,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                transient: Mutex::new(HashMap::new()),
                permanent: HashSet::new(),
                delay,
            }
        }
    }

    impl TextureFetcher for ScriptedFetcher {
        fn fetch<'a>(
            &'a self,
            _target: &'a BuildTarget,
            request: TextureRequest,
        ) -> Pin<Box<dyn Future<Output = Result<FetchedTexture, FetchError>> + Send + 'a>>
        {
            Box::pin(async move {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                if self.permanent.contains(&request) {
                    return Err(FetchError::Permanent("scripted".into()));
                }
                let mut transient = self.transient.lock();
                if let Some(remaining) = transient.get_mut(&request) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(FetchError::Transient("scripted".into()));
                    }
                }
                Ok(FetchedTexture {
                    jpeg_path: PathBuf::from(format!("/cache/{}", request.jpeg_file_name())),
                    request,
                })
            })
        }
    }

    fn target() -> Arc<BuildTarget> {
        let config = BuildConfig::default()
            .with_tiles_root("/tiles")
            .with_imagery_root("/img")
            .with_zoom(16)
            .with_provider("T");
        Arc::new(BuildTarget::new(TileKey::new(47, 7), &config))
    }

    fn request(n: u32) -> TextureRequest {
        TextureRequest::new(16 * n, 32, 16, "T")
    }

    fn fast_config(workers: usize) -> DownloadConfig {
        DownloadConfig {
            workers,
            max_attempts: 3,
            retry_backoff: Duration::ZERO,
        }
    }

    async fn run_stage(
        fetcher: Arc<dyn TextureFetcher>,
        config: DownloadConfig,
        requests: Vec<TextureRequest>,
        conversion: Option<Arc<WorkQueue<FetchedTexture>>>,
        cancel: CancellationToken,
    ) -> DownloadSummary {
        let acquisition = Arc::new(WorkQueue::new(64));
        let tracker = Arc::new(ProgressTracker::new(
            Stage::Download,
            Arc::new(NullProgressSink),
        ));
        for request in requests {
            tracker.enqueued();
            acquisition.push(request).await;
        }
        let (done_tx, done_rx) = watch::channel(true);
        let coordinator = DownloadCoordinator::new(fetcher, config);
        let summary = coordinator
            .run(target(), acquisition, conversion, done_rx, tracker, cancel)
            .await;
        drop(done_tx);
        summary
    }

    #[tokio::test]
    async fn test_all_requests_fetched_once() {
        let conversion = Arc::new(WorkQueue::new(64));
        let summary = run_stage(
            Arc::new(ScriptedFetcher::succeeding()),
            fast_config(4),
            (0..5).map(request).collect(),
            Some(Arc::clone(&conversion)),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(summary.completed, 5);
        assert_eq!(summary.attempts, 5);
        assert!(summary.permanent_failures.is_empty());
        assert!(!summary.interrupted);
        assert_eq!(conversion.len(), 5);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_to_success() {
        let summary = run_stage(
            Arc::new(ScriptedFetcher::failing_transiently(request(0), 2)),
            fast_config(2),
            vec![request(0)],
            None,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.attempts, 3);
        assert!(summary.permanent_failures.is_empty());
    }

    #[tokio::test]
    async fn test_attempt_cap_abandons_request() {
        let summary = run_stage(
            Arc::new(ScriptedFetcher::failing_transiently(request(0), 99)),
            fast_config(2),
            vec![request(0)],
            None,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(summary.completed, 0);
        assert_eq!(summary.attempts, 3);
        assert_eq!(summary.permanent_failures.len(), 1);
        assert_eq!(summary.permanent_failures[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let summary = run_stage(
            Arc::new(ScriptedFetcher::failing_permanently(request(0))),
            fast_config(2),
            vec![request(0)],
            None,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(summary.attempts, 1);
        assert_eq!(summary.permanent_failures.len(), 1);
        assert!(!summary.permanent_failures[0].error.is_transient());
    }

    #[tokio::test]
    async fn test_duplicate_requests_deduplicated() {
        let summary = run_stage(
            Arc::new(ScriptedFetcher::succeeding()),
            fast_config(2),
            vec![request(0), request(0), request(1)],
            None,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(summary.completed, 2);
        assert_eq!(summary.attempts, 2);
    }

    #[tokio::test]
    async fn test_duplicate_of_retrying_request_stays_capped() {
        let summary = run_stage(
            Arc::new(ScriptedFetcher::failing_transiently(request(0), 99)),
            fast_config(2),
            vec![request(0), request(0)],
            None,
            CancellationToken::new(),
        )
        .await;

        // The duplicate must not widen the retry budget.
        assert_eq!(summary.completed, 0);
        assert_eq!(summary.attempts, 3);
        assert_eq!(summary.permanent_failures.len(), 1);
        assert_eq!(summary.permanent_failures[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_stage() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let summary = run_stage(
            Arc::new(ScriptedFetcher::slow(Duration::from_secs(60))),
            fast_config(2),
            (0..10).map(request).collect(),
            None,
            cancel,
        )
        .await;

        assert!(summary.interrupted);
        assert_eq!(summary.completed, 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        /// Attempts per request never exceed the configured cap, whatever
        /// the number of scripted transient failures.
        #[test]
        fn prop_attempts_never_exceed_cap(failures in 0u32..8) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let summary = rt.block_on(run_stage(
                Arc::new(ScriptedFetcher::failing_transiently(request(0), failures)),
                fast_config(1),
                vec![request(0)],
                None,
                CancellationToken::new(),
            ));

            prop_assert!(summary.attempts <= 3);
            if failures < 3 {
                prop_assert_eq!(summary.completed, 1);
                prop_assert_eq!(summary.attempts, u64::from(failures) + 1);
            } else {
                prop_assert_eq!(summary.completed, 0);
                prop_assert_eq!(summary.permanent_failures.len(), 1);
            }
        }
    }
}
