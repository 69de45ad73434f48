//! Tile content producer.
//!
//! The producer generates everything a tile build needs besides the
//! textures themselves: terrain definitions, the provisional
//! navigation-data file, and the stream of texture requests feeding the
//! acquisition queue. It runs concurrently with the download workers, so
//! fetching starts as soon as the first request lands on the queue.

use crate::coord;
use crate::naming;
use crate::pipeline::WorkQueue;
use crate::tile::{BuildTarget, TextureRequest};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Errors raised while producing tile content.
#[derive(Debug, Error)]
pub enum ProducerError {
    /// A tile artifact could not be written.
    #[error("failed to write tile artifact: {0}")]
    Io(#[from] std::io::Error),

    /// Content generation failed for a non-IO reason.
    #[error("tile content generation failed: {0}")]
    Failed(String),
}

/// Generates tile content and streams texture requests into the pipeline.
///
/// On cancellation implementations stop early and return the count
/// produced so far; the orchestrator reads the interruption off the token.
pub trait TileProducer: Send + Sync + 'static {
    /// Produces content for `target`, pushing one request per texture.
    ///
    /// Returns the number of requests enqueued.
    fn produce<'a>(
        &'a self,
        target: &'a BuildTarget,
        queue: Arc<WorkQueue<TextureRequest>>,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<u64, ProducerError>> + Send + 'a>>;
}

/// Producer enumerating the Web Mercator texture grid covering a tile.
///
/// For every texture it writes a terrain definition referencing the
/// texture-to-be, then enqueues the matching request. The provisional
/// navigation-data file is written last, once the full texture set is
/// known.
pub struct GridProducer;

impl GridProducer {
    /// Creates the standard grid producer.
    pub fn new() -> Self {
        Self
    }
}

impl Default for GridProducer {
    fn default() -> Self {
        Self::new()
    }
}

impl TileProducer for GridProducer {
    fn produce<'a>(
        &'a self,
        target: &'a BuildTarget,
        queue: Arc<WorkQueue<TextureRequest>>,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<u64, ProducerError>> + Send + 'a>> {
        Box::pin(async move {
            let origins = coord::textures_for_tile(target.tile, target.zoom);
            if origins.is_empty() {
                return Err(ProducerError::Failed(format!(
                    "tile {} has no mappable textures at zoom {}",
                    target.tile, target.zoom
                )));
            }
            info!(
                tile = %target.tile,
                zoom = target.zoom,
                textures = origins.len(),
                "producing tile content"
            );

            let terrain_dir = target.terrain_dir();
            tokio::fs::create_dir_all(&terrain_dir).await?;

            let mut produced = 0u64;
            for (x, y) in &origins {
                if cancel.is_cancelled() {
                    debug!(tile = %target.tile, produced, "producer cancelled");
                    return Ok(produced);
                }

                let request = TextureRequest::new(*x, *y, target.zoom, &target.provider_code);
                let ter_path =
                    terrain_dir.join(naming::ter_file_name(*x, *y, target.zoom, &target.provider_code));
                tokio::fs::write(&ter_path, terrain_definition(&request)).await?;

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(tile = %target.tile, produced, "producer cancelled");
                        return Ok(produced);
                    }
                    _ = queue.push(request) => {}
                }
                produced += 1;
            }

            write_provisional_dsf(target, &origins).await?;
            info!(tile = %target.tile, produced, "tile content produced");
            Ok(produced)
        })
    }
}

/// Renders the terrain definition referencing one packaged texture.
fn terrain_definition(request: &TextureRequest) -> String {
    format!(
        "A\n800\nTERRAIN\n\nBASE_TEX_NOWRAP ../textures/{}\n",
        request.dds_file_name()
    )
}

/// Writes the provisional navigation-data file next to its final path.
///
/// The file stays at the `.tmp` path until the orchestrator commits it by
/// rename, so an aborted build never leaves a half-written artifact at the
/// path the simulator loads.
async fn write_provisional_dsf(target: &BuildTarget, origins: &[(u32, u32)]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(target.nav_data_dir()).await?;

    let mut body = String::new();
    body.push_str(&format!("I\n800\nDSF2TEXT\n\n# tile {}\n", target.tile));
    for (x, y) in origins {
        body.push_str(&format!(
            "TERRAIN_DEF terrain/{}\n",
            naming::ter_file_name(*x, *y, target.zoom, &target.provider_code)
        ));
    }
    tokio::fs::write(target.dsf_tmp_file(), body).await
}
