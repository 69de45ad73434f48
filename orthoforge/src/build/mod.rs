//! Tile build orchestration.
//!
//! A build runs the producer and both pipeline stages against one tile,
//! then commits the provisional navigation-data file by atomic rename.
//! The final artifact path is either untouched or complete; an
//! interrupted or failed build leaves at most a `.tmp` file and cached
//! imagery behind, both of which a rerun picks up.

mod error;
pub mod housekeeping;
mod report;

pub use error::BuildError;
pub use report::{BuildOutcome, BuildReport};

use crate::config::{BuildConfig, TILE_CONFIG_FILE};
use crate::coord::TileKey;
use crate::fetch::TextureFetcher;
use crate::naming;
use crate::pipeline::{
    ConvertCoordinator, ConvertSummary, DownloadCoordinator, DownloadSummary, ProgressSink,
    ProgressTracker, QueueItem, Stage, WorkQueue,
};
use crate::producer::{ProducerError, TileProducer};
use crate::texture::TextureConverter;
use crate::tile::BuildTarget;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Phase of a running build, logged at each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildState {
    Preparing,
    Producing,
    Draining,
    Committing,
}

/// Runs tile builds against a fixed set of pipeline components.
///
/// One orchestrator serves many sequential builds; an internal lock
/// rejects a second concurrent build rather than queueing it.
pub struct BuildOrchestrator {
    fetcher: Arc<dyn TextureFetcher>,
    converter: Arc<dyn TextureConverter>,
    producer: Arc<dyn TileProducer>,
    config: BuildConfig,
    sink: Arc<dyn ProgressSink>,
    build_lock: tokio::sync::Mutex<()>,
}

impl BuildOrchestrator {
    /// Creates an orchestrator from its components.
    pub fn new(
        fetcher: Arc<dyn TextureFetcher>,
        converter: Arc<dyn TextureConverter>,
        producer: Arc<dyn TileProducer>,
        config: BuildConfig,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            fetcher,
            converter,
            producer,
            config,
            sink,
            build_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The active build configuration.
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Builds one tile with the active configuration.
    pub async fn build_tile(
        &self,
        tile: TileKey,
        cancel: &CancellationToken,
    ) -> Result<BuildReport, BuildError> {
        self.build_with_config(tile, self.config.clone(), cancel)
            .await
    }

    /// Builds a list of tiles sequentially.
    ///
    /// Each tile uses its own configuration snapshot where one exists from
    /// an earlier run, so a batch rebuild keeps per-tile zoom choices.
    /// Stops early on cancellation; already finished reports are returned.
    pub async fn build_tile_list(
        &self,
        tiles: &[TileKey],
        cancel: &CancellationToken,
    ) -> Result<Vec<BuildReport>, BuildError> {
        let mut reports = Vec::with_capacity(tiles.len());
        for &tile in tiles {
            if cancel.is_cancelled() {
                break;
            }
            let config = self.tile_config(tile);
            reports.push(self.build_with_config(tile, config, cancel).await?);
        }
        Ok(reports)
    }

    // Overlays a per-tile snapshot from an earlier run on the active
    // configuration. Only the zoom is taken from the snapshot; the fetcher
    // is bound to one provider, so a differing snapshot provider is
    // reported and ignored.
    fn tile_config(&self, tile: TileKey) -> BuildConfig {
        let path = naming::build_dir(&self.config.tiles_root, tile).join(TILE_CONFIG_FILE);
        if !path.exists() {
            return self.config.clone();
        }
        match BuildConfig::load_from(&path) {
            Ok(snapshot) => {
                let mut config = self.config.clone();
                if snapshot.provider_code != config.provider_code {
                    warn!(
                        tile = %tile,
                        snapshot = %snapshot.provider_code,
                        active = %config.provider_code,
                        "tile snapshot names a different provider, using the active one"
                    );
                }
                if snapshot.zoom != config.zoom {
                    info!(tile = %tile, zoom = snapshot.zoom, "using zoom from tile snapshot");
                    config.zoom = snapshot.zoom;
                }
                config
            }
            Err(e) => {
                warn!(tile = %tile, error = %e, "unreadable tile snapshot, using active config");
                self.config.clone()
            }
        }
    }

    async fn build_with_config(
        &self,
        tile: TileKey,
        config: BuildConfig,
        cancel: &CancellationToken,
    ) -> Result<BuildReport, BuildError> {
        let _guard = self
            .build_lock
            .try_lock()
            .map_err(|_| BuildError::BuildInProgress)?;

        let start = Instant::now();
        let target = Arc::new(BuildTarget::new(tile, &config));
        info!(
            tile = %tile,
            zoom = config.zoom,
            provider = %config.provider_code,
            state = ?BuildState::Preparing,
            "starting tile build"
        );

        // The mesh is produced by an external tool and is a hard
        // precondition; without it the tile cannot be assembled.
        let mesh = target.mesh_file();
        if !tokio::fs::try_exists(&mesh).await.unwrap_or(false) {
            let outcome =
                BuildOutcome::Failed(format!("missing mesh file {}", mesh.display()));
            return Ok(finish_report(tile, outcome, Default::default(), Default::default(), start));
        }

        for dir in [
            target.build_dir.clone(),
            target.textures_dir(),
            target.terrain_dir(),
            target.nav_data_dir(),
        ] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(BuildError::Prepare)?;
        }

        // Best effort; a missing snapshot only loses the zoom override on
        // a future batch rebuild.
        if let Err(e) = config.save_to(&target.build_dir.join(TILE_CONFIG_FILE)) {
            warn!(tile = %tile, error = %e, "failed to write tile config snapshot");
        }

        let build_cancel = cancel.child_token();
        let acquisition = Arc::new(WorkQueue::new(config.acquisition_capacity));

        info!(tile = %tile, state = ?BuildState::Producing, "generating tile content");
        let (producer_done_tx, producer_done_rx) = watch::channel(false);
        let producer_task = {
            let producer = Arc::clone(&self.producer);
            let target = Arc::clone(&target);
            let queue = Arc::clone(&acquisition);
            let cancel = build_cancel.clone();
            tokio::spawn(async move {
                let result = producer.produce(&target, queue, cancel.clone()).await;
                if result.is_err() {
                    cancel.cancel();
                }
                let _ = producer_done_tx.send(true);
                result
            })
        };

        if config.skip_downloads {
            return Ok(self
                .run_without_downloads(
                    tile,
                    target,
                    acquisition,
                    producer_task,
                    build_cancel,
                    cancel,
                    start,
                )
                .await);
        }

        let skip_converts = config.skip_converts;
        let conversion =
            (!skip_converts).then(|| Arc::new(WorkQueue::new(config.conversion_capacity)));

        let download_task = {
            let coordinator =
                DownloadCoordinator::new(Arc::clone(&self.fetcher), config.download.clone());
            let target = Arc::clone(&target);
            let acquisition = Arc::clone(&acquisition);
            let conversion = conversion.clone();
            let tracker = Arc::new(ProgressTracker::new(
                Stage::Download,
                Arc::clone(&self.sink),
            ));
            let cancel = build_cancel.clone();
            tokio::spawn(async move {
                coordinator
                    .run(target, acquisition, conversion, producer_done_rx, tracker, cancel)
                    .await
            })
        };

        let (downloads_done_tx, downloads_done_rx) = watch::channel(false);
        let convert_task = conversion.map(|queue| {
            let coordinator =
                ConvertCoordinator::new(Arc::clone(&self.converter), config.convert.clone());
            let target = Arc::clone(&target);
            let tracker = Arc::new(ProgressTracker::new(
                Stage::Convert,
                Arc::clone(&self.sink),
            ));
            let cancel = build_cancel.clone();
            tokio::spawn(async move {
                coordinator
                    .run(target, queue, downloads_done_rx, tracker, cancel)
                    .await
            })
        });

        let producer_result = match producer_task.await {
            Ok(result) => result,
            Err(e) => {
                build_cancel.cancel();
                Err(ProducerError::Failed(format!("producer task failed: {}", e)))
            }
        };

        let downloads = match download_task.await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(tile = %tile, error = %e, "download coordinator task failed");
                build_cancel.cancel();
                DownloadSummary {
                    interrupted: true,
                    ..Default::default()
                }
            }
        };

        debug!(tile = %tile, state = ?BuildState::Draining, "downloads drained");
        let _ = downloads_done_tx.send(true);
        let converts = match convert_task {
            Some(task) => match task.await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(tile = %tile, error = %e, "convert coordinator task failed");
                    ConvertSummary {
                        interrupted: true,
                        ..Default::default()
                    }
                }
            },
            None => ConvertSummary::default(),
        };

        let outcome = if cancel.is_cancelled() {
            BuildOutcome::Interrupted
        } else if let Err(e) = producer_result {
            BuildOutcome::Failed(e.to_string())
        } else if downloads.interrupted || converts.interrupted || build_cancel.is_cancelled() {
            BuildOutcome::Interrupted
        } else {
            self.commit(&target).await
        };

        Ok(finish_report(tile, outcome, downloads, converts, start))
    }

    // Dry-run path: the producer still writes terrain definitions and the
    // provisional artifact, but requests are discarded unfetched.
    #[allow(clippy::too_many_arguments)]
    async fn run_without_downloads(
        &self,
        tile: TileKey,
        target: Arc<BuildTarget>,
        acquisition: Arc<WorkQueue<crate::tile::TextureRequest>>,
        producer_task: tokio::task::JoinHandle<Result<u64, ProducerError>>,
        build_cancel: CancellationToken,
        cancel: &CancellationToken,
        start: Instant,
    ) -> BuildReport {
        let discard = {
            let queue = Arc::clone(&acquisition);
            let cancel = build_cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        item = queue.pop() => {
                            if matches!(item, QueueItem::Shutdown) {
                                break;
                            }
                        }
                    }
                }
            })
        };

        let producer_result = match producer_task.await {
            Ok(result) => result,
            Err(e) => {
                build_cancel.cancel();
                Err(ProducerError::Failed(format!("producer task failed: {}", e)))
            }
        };
        acquisition.push_shutdown();
        let _ = discard.await;

        let outcome = if cancel.is_cancelled() {
            BuildOutcome::Interrupted
        } else if let Err(e) = producer_result {
            BuildOutcome::Failed(e.to_string())
        } else {
            self.commit(&target).await
        };
        finish_report(tile, outcome, Default::default(), Default::default(), start)
    }

    // Makes the provisional artifact visible at its final path, then
    // sweeps orphaned textures in the background.
    async fn commit(&self, target: &BuildTarget) -> BuildOutcome {
        info!(tile = %target.tile, state = ?BuildState::Committing, "committing artifact");
        if let Err(e) = tokio::fs::rename(target.dsf_tmp_file(), target.dsf_file()).await {
            return BuildOutcome::Failed(format!("failed to commit artifact: {}", e));
        }

        let sweep_target = target.clone();
        tokio::task::spawn_blocking(move || {
            let stats = housekeeping::sweep_orphaned_textures(&sweep_target);
            if stats.removed > 0 {
                info!(
                    tile = %sweep_target.tile,
                    removed = stats.removed,
                    "swept orphaned textures"
                );
            }
        });

        BuildOutcome::Committed
    }
}

fn finish_report(
    tile: TileKey,
    outcome: BuildOutcome,
    downloads: DownloadSummary,
    converts: ConvertSummary,
    start: Instant,
) -> BuildReport {
    let report = BuildReport {
        tile,
        outcome,
        downloads,
        converts,
        elapsed: start.elapsed(),
    };
    info!(report = %report, "tile build finished");
    report
}
