//! Texture fetching: one raw imagery tile per request.
//!
//! The [`TextureFetcher`] trait is the seam the download coordinator works
//! against; [`HttpTextureFetcher`] is the production implementation. A
//! fetch downloads the imagery for one texture request, sanity-checks that
//! the payload decodes as an image, and lands it in the imagery cache so a
//! rebuild of the same tile skips the network entirely.

use crate::provider::{HttpClient, Provider, ProviderError};
use crate::tile::{BuildTarget, TextureRequest};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while fetching one texture.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Transient failure worth retrying (network, timeout, 5xx).
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// Permanent failure; retrying cannot help (bad request, corrupt payload).
    #[error("permanent fetch failure: {0}")]
    Permanent(String),
}

impl FetchError {
    /// Returns true if this failure is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<ProviderError> for FetchError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Http(msg) => FetchError::Transient(msg),
            other => FetchError::Permanent(other.to_string()),
        }
    }
}

/// A successfully fetched texture awaiting conversion.
#[derive(Debug, Clone)]
pub struct FetchedTexture {
    /// The request this payload satisfies.
    pub request: TextureRequest,
    /// Path of the raw imagery file in the imagery cache.
    pub jpeg_path: PathBuf,
}

/// Obtains one raw imagery texture from a remote or local source.
///
/// Implementations must be safe to call from many workers concurrently.
/// Failures are returned, never panicked; the coordinator decides whether
/// to retry.
pub trait TextureFetcher: Send + Sync + 'static {
    /// Fetches the imagery for `request` on behalf of `target`.
    fn fetch<'a>(
        &'a self,
        target: &'a BuildTarget,
        request: TextureRequest,
    ) -> Pin<Box<dyn Future<Output = Result<FetchedTexture, FetchError>> + Send + 'a>>;
}

/// HTTP-backed fetcher writing into the imagery cache.
pub struct HttpTextureFetcher {
    client: Arc<dyn HttpClient>,
    provider: Provider,
}

impl HttpTextureFetcher {
    /// Creates a fetcher for one provider.
    pub fn new(client: Arc<dyn HttpClient>, provider: Provider) -> Self {
        Self { client, provider }
    }
}

impl TextureFetcher for HttpTextureFetcher {
    fn fetch<'a>(
        &'a self,
        target: &'a BuildTarget,
        request: TextureRequest,
    ) -> Pin<Box<dyn Future<Output = Result<FetchedTexture, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            let dir = target.imagery_dir();
            let jpeg_path = dir.join(request.jpeg_file_name());

            // Cache hit: a previous build already downloaded this texture.
            // The payload is re-validated so a truncated file left by an
            // interrupted run cannot satisfy every future fetch of this
            // texture.
            if let Ok(bytes) = tokio::fs::read(&jpeg_path).await {
                if image::load_from_memory(&bytes).is_ok() {
                    debug!(texture = %request, "imagery cache hit");
                    return Ok(FetchedTexture { request, jpeg_path });
                }
                warn!(texture = %request, "removing corrupt imagery cache entry");
                let _ = tokio::fs::remove_file(&jpeg_path).await;
            }

            let url = self
                .provider
                .grid_tile_url(request.x(), request.y(), request.zoom())?;
            let bytes = self.client.get(&url).await?;

            // Reject payloads that are not decodable imagery (error pages,
            // truncated bodies) before they reach the converter.
            image::load_from_memory(&bytes)
                .map_err(|e| FetchError::Permanent(format!("undecodable payload: {}", e)))?;

            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| FetchError::Transient(format!("imagery dir: {}", e)))?;
            // Land the payload under a temporary name first; the cache path
            // only ever holds a completely written file.
            let part_path = dir.join(format!("{}.part", request.jpeg_file_name()));
            tokio::fs::write(&part_path, &bytes)
                .await
                .map_err(|e| FetchError::Transient(format!("imagery write: {}", e)))?;
            tokio::fs::rename(&part_path, &jpeg_path)
                .await
                .map_err(|e| FetchError::Transient(format!("imagery rename: {}", e)))?;

            debug!(texture = %request, bytes = bytes.len(), "fetched");
            Ok(FetchedTexture { request, jpeg_path })
        })
    }
}
