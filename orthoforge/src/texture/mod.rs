//! Texture conversion: raw imagery to packaged platform textures.
//!
//! The [`TextureConverter`] trait is the seam the convert coordinator works
//! against; [`DdsTextureConverter`](dds::DdsTextureConverter) produces
//! BC1-compressed DDS files in the tile's `textures/` directory.

mod dds;
mod error;

pub use dds::DdsTextureConverter;
pub use error::ConvertError;

use crate::fetch::FetchedTexture;
use crate::tile::BuildTarget;
use std::future::Future;
use std::pin::Pin;

/// Transforms one fetched imagery file into a packaged texture.
///
/// The side effect of a successful conversion is one texture file in the
/// target's conventional output directory. A failure is reported, never
/// panicked; the coordinator skips the texture.
pub trait TextureConverter: Send + Sync + 'static {
    /// Converts `fetched` into a packaged texture for `target`.
    fn convert<'a>(
        &'a self,
        target: &'a BuildTarget,
        fetched: &'a FetchedTexture,
    ) -> Pin<Box<dyn Future<Output = Result<(), ConvertError>> + Send + 'a>>;
}
