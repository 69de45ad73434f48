//! End-to-end tile build scenarios against mocked fetch and convert
//! components.

use orthoforge::build::{BuildError, BuildOrchestrator, BuildOutcome};
use orthoforge::config::BuildConfig;
use orthoforge::coord::TileKey;
use orthoforge::fetch::{FetchError, FetchedTexture, TextureFetcher};
use orthoforge::pipeline::{ConvertConfig, DownloadConfig, NullProgressSink, WorkQueue};
use orthoforge::producer::{ProducerError, TileProducer};
use orthoforge::texture::{ConvertError, TextureConverter};
use orthoforge::tile::{BuildTarget, TextureRequest};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Producer pushing a fixed request list and writing the provisional
/// artifact, standing in for full grid enumeration.
struct ScriptedProducer {
    requests: Vec<TextureRequest>,
}

impl ScriptedProducer {
    fn new(count: u32) -> Self {
        Self {
            requests: (0..count).map(request).collect(),
        }
    }
}

impl TileProducer for ScriptedProducer {
    fn produce<'a>(
        &'a self,
        target: &'a BuildTarget,
        queue: Arc<WorkQueue<TextureRequest>>,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<u64, ProducerError>> + Send + 'a>> {
        Box::pin(async move {
            tokio::fs::create_dir_all(target.nav_data_dir()).await?;
            tokio::fs::write(target.dsf_tmp_file(), b"provisional").await?;

            let mut produced = 0u64;
            for request in &self.requests {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(produced),
                    _ = queue.push(request.clone()) => {}
                }
                produced += 1;
            }
            Ok(produced)
        })
    }
}

/// Fetcher with per-request scripted transient failures and a global
/// attempt counter.
struct MockFetcher {
    attempts: AtomicU64,
    transient: Mutex<HashMap<TextureRequest, u32>>,
    delay: Duration,
}

impl MockFetcher {
    fn succeeding() -> Self {
        Self {
            attempts: AtomicU64::new(0),
            transient: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
        }
    }

    fn flaky(request: TextureRequest, transient_failures: u32) -> Self {
        let fetcher = Self::succeeding();
        fetcher.transient.lock().insert(request, transient_failures);
        fetcher
    }

    fn slow(delay: Duration) -> Self {
        Self {
            attempts: AtomicU64::new(0),
            transient: Mutex::new(HashMap::new()),
            delay,
        }
    }
}

impl TextureFetcher for MockFetcher {
    fn fetch<'a>(
        &'a self,
        target: &'a BuildTarget,
        request: TextureRequest,
    ) -> Pin<Box<dyn Future<Output = Result<FetchedTexture, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::AcqRel);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            {
                let mut transient = self.transient.lock();
                if let Some(remaining) = transient.get_mut(&request) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(FetchError::Transient("mock outage".into()));
                    }
                }
            }
            Ok(FetchedTexture {
                jpeg_path: target.imagery_dir().join(request.jpeg_file_name()),
                request,
            })
        })
    }
}

/// Converter counting successful conversions.
struct CountingConverter {
    converted: AtomicU64,
}

impl CountingConverter {
    fn new() -> Self {
        Self {
            converted: AtomicU64::new(0),
        }
    }
}

impl TextureConverter for CountingConverter {
    fn convert<'a>(
        &'a self,
        _target: &'a BuildTarget,
        _fetched: &'a FetchedTexture,
    ) -> Pin<Box<dyn Future<Output = Result<(), ConvertError>> + Send + 'a>> {
        self.converted.fetch_add(1, Ordering::AcqRel);
        Box::pin(async { Ok(()) })
    }
}

fn request(n: u32) -> TextureRequest {
    TextureRequest::new(16 * n, 100_352, 16, "BI")
}

struct Fixture {
    _dir: tempfile::TempDir,
    config: BuildConfig,
    tile: TileKey,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BuildConfig::default()
            .with_tiles_root(dir.path().join("tiles"))
            .with_imagery_root(dir.path().join("imagery"))
            .with_zoom(16)
            .with_provider("BI");
        config.download = DownloadConfig {
            workers: 2,
            max_attempts: 3,
            retry_backoff: Duration::ZERO,
        };
        config.convert = ConvertConfig { workers: 2 };

        let tile = TileKey::new(47, 7);
        let fixture = Self {
            _dir: dir,
            config,
            tile,
        };
        fixture.write_mesh();
        fixture
    }

    fn target(&self) -> BuildTarget {
        BuildTarget::new(self.tile, &self.config)
    }

    fn write_mesh(&self) {
        let target = self.target();
        std::fs::create_dir_all(&target.build_dir).unwrap();
        std::fs::write(target.mesh_file(), b"mesh").unwrap();
    }

    fn orchestrator(
        &self,
        fetcher: Arc<MockFetcher>,
        converter: Arc<CountingConverter>,
        producer: ScriptedProducer,
    ) -> BuildOrchestrator {
        BuildOrchestrator::new(
            fetcher,
            converter,
            Arc::new(producer),
            self.config.clone(),
            Arc::new(NullProgressSink),
        )
    }
}

#[tokio::test]
async fn test_clean_build_commits_artifact() {
    let fixture = Fixture::new();
    let fetcher = Arc::new(MockFetcher::succeeding());
    let converter = Arc::new(CountingConverter::new());
    let orchestrator =
        fixture.orchestrator(Arc::clone(&fetcher), Arc::clone(&converter), ScriptedProducer::new(5));

    let report = orchestrator
        .build_tile(fixture.tile, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, BuildOutcome::Committed);
    assert_eq!(report.downloads.completed, 5);
    assert_eq!(report.downloads.attempts, 5);
    assert_eq!(report.converts.completed, 5);
    assert_eq!(converter.converted.load(Ordering::Acquire), 5);

    let target = fixture.target();
    assert!(target.dsf_file().exists());
    assert!(!target.dsf_tmp_file().exists());
}

#[tokio::test]
async fn test_transient_outage_retried_and_committed() {
    let fixture = Fixture::new();
    // Request #1 fails twice before its third attempt succeeds.
    let fetcher = Arc::new(MockFetcher::flaky(request(1), 2));
    let converter = Arc::new(CountingConverter::new());
    let orchestrator =
        fixture.orchestrator(Arc::clone(&fetcher), converter, ScriptedProducer::new(3));

    let report = orchestrator
        .build_tile(fixture.tile, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, BuildOutcome::Committed);
    assert_eq!(report.downloads.completed, 3);
    // 3 first attempts plus 2 retries for the flaky request.
    assert_eq!(report.downloads.attempts, 5);
    assert!(report.downloads.permanent_failures.is_empty());
    assert_eq!(fetcher.attempts.load(Ordering::Acquire), 5);
}

#[tokio::test]
async fn test_exhausted_retries_still_commit_with_failures_reported() {
    let fixture = Fixture::new();
    // Request #0 never succeeds.
    let fetcher = Arc::new(MockFetcher::flaky(request(0), 99));
    let converter = Arc::new(CountingConverter::new());
    let orchestrator =
        fixture.orchestrator(fetcher, Arc::clone(&converter), ScriptedProducer::new(3));

    let report = orchestrator
        .build_tile(fixture.tile, &CancellationToken::new())
        .await
        .unwrap();

    // A missing texture degrades the tile but does not fail the build.
    assert_eq!(report.outcome, BuildOutcome::Committed);
    assert_eq!(report.downloads.completed, 2);
    assert_eq!(report.downloads.permanent_failures.len(), 1);
    assert_eq!(report.downloads.permanent_failures[0].attempts, 3);
    assert_eq!(report.converts.completed, 2);
}

#[tokio::test]
async fn test_cancellation_interrupts_and_leaves_final_path_untouched() {
    let fixture = Fixture::new();
    let fetcher = Arc::new(MockFetcher::slow(Duration::from_secs(60)));
    let converter = Arc::new(CountingConverter::new());
    let orchestrator =
        fixture.orchestrator(fetcher, converter, ScriptedProducer::new(10));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = orchestrator.build_tile(fixture.tile, &cancel).await.unwrap();

    assert_eq!(report.outcome, BuildOutcome::Interrupted);
    let target = fixture.target();
    // Nothing was committed; the provisional file is left for a rerun.
    assert!(!target.dsf_file().exists());
    assert!(target.dsf_tmp_file().exists());
}

#[tokio::test]
async fn test_missing_mesh_fails_without_committing() {
    let fixture = Fixture::new();
    let target = fixture.target();
    std::fs::remove_file(target.mesh_file()).unwrap();

    let orchestrator = fixture.orchestrator(
        Arc::new(MockFetcher::succeeding()),
        Arc::new(CountingConverter::new()),
        ScriptedProducer::new(3),
    );

    let report = orchestrator
        .build_tile(fixture.tile, &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(report.outcome, BuildOutcome::Failed(_)));
    assert_eq!(report.downloads.attempts, 0);
    assert!(!target.dsf_file().exists());
}

#[tokio::test]
async fn test_second_concurrent_build_rejected() {
    let fixture = Fixture::new();
    let orchestrator = Arc::new(fixture.orchestrator(
        Arc::new(MockFetcher::slow(Duration::from_secs(60))),
        Arc::new(CountingConverter::new()),
        ScriptedProducer::new(4),
    ));

    let cancel = CancellationToken::new();
    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        let cancel = cancel.clone();
        let tile = fixture.tile;
        tokio::spawn(async move { orchestrator.build_tile(tile, &cancel).await })
    };

    // Give the first build time to take the lock.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = orchestrator
        .build_tile(fixture.tile, &CancellationToken::new())
        .await;
    assert!(matches!(second, Err(BuildError::BuildInProgress)));

    cancel.cancel();
    let report = first.await.unwrap().unwrap();
    assert_eq!(report.outcome, BuildOutcome::Interrupted);
}

#[tokio::test]
async fn test_skip_downloads_commits_without_fetching() {
    let mut fixture = Fixture::new();
    fixture.config.skip_downloads = true;
    fixture.write_mesh();

    let fetcher = Arc::new(MockFetcher::succeeding());
    let converter = Arc::new(CountingConverter::new());
    let orchestrator = fixture.orchestrator(
        Arc::clone(&fetcher),
        Arc::clone(&converter),
        ScriptedProducer::new(6),
    );

    let report = orchestrator
        .build_tile(fixture.tile, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, BuildOutcome::Committed);
    assert_eq!(fetcher.attempts.load(Ordering::Acquire), 0);
    assert_eq!(converter.converted.load(Ordering::Acquire), 0);
    assert!(fixture.target().dsf_file().exists());
}

#[tokio::test]
async fn test_batch_build_reports_every_tile() {
    let fixture = Fixture::new();
    let other = TileKey::new(48, 7);
    // Only the first tile has its mesh in place.
    let orchestrator = fixture.orchestrator(
        Arc::new(MockFetcher::succeeding()),
        Arc::new(CountingConverter::new()),
        ScriptedProducer::new(2),
    );

    let reports = orchestrator
        .build_tile_list(&[fixture.tile, other], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].outcome, BuildOutcome::Committed);
    assert!(matches!(reports[1].outcome, BuildOutcome::Failed(_)));
}
