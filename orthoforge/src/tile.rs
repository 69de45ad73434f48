//! Texture request and build target types.

use crate::config::BuildConfig;
use crate::coord::TileKey;
use crate::naming;
use std::fmt;
use std::path::PathBuf;

/// Identity of one texture to fetch and package.
///
/// The grid coordinates are the texture's north-west origin on the Web
/// Mercator grid (always multiples of [`crate::coord::TEXTURE_SPAN`]).
/// Requests are hashable and compared by value; the download coordinator
/// uses them as retry and dedup keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureRequest {
    x: u32,
    y: u32,
    zoom: u8,
    provider_code: String,
}

impl TextureRequest {
    /// Creates a new texture request.
    pub fn new(x: u32, y: u32, zoom: u8, provider_code: impl Into<String>) -> Self {
        Self {
            x,
            y,
            zoom,
            provider_code: provider_code.into(),
        }
    }

    /// Grid column of the texture origin.
    pub fn x(&self) -> u32 {
        self.x
    }

    /// Grid row of the texture origin.
    pub fn y(&self) -> u32 {
        self.y
    }

    /// Zoom level the texture is fetched at.
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    /// Short code of the imagery provider, e.g. `BI`.
    pub fn provider_code(&self) -> &str {
        &self.provider_code
    }

    /// Raw imagery file name for this request.
    pub fn jpeg_file_name(&self) -> String {
        naming::jpeg_file_name(self.x, self.y, self.zoom, &self.provider_code)
    }

    /// Packaged texture file name for this request.
    pub fn dds_file_name(&self) -> String {
        naming::dds_file_name(self.x, self.y, self.zoom, &self.provider_code)
    }
}

impl fmt::Display for TextureRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}{}",
            self.y, self.x, self.provider_code, self.zoom
        )
    }
}

/// Everything a build needs to know about where one tile's artifacts live.
///
/// Derived once from a [`TileKey`] and the [`BuildConfig`], then shared
/// read-only by the producer, the coordinators and the workers.
#[derive(Debug, Clone)]
pub struct BuildTarget {
    /// The tile being built.
    pub tile: TileKey,
    /// Scenery directory for this tile.
    pub build_dir: PathBuf,
    /// Root of the raw imagery cache.
    pub imagery_root: PathBuf,
    /// Zoom level textures are fetched at.
    pub zoom: u8,
    /// Imagery provider code.
    pub provider_code: String,
}

impl BuildTarget {
    /// Derives the target for a tile from the build configuration.
    pub fn new(tile: TileKey, config: &BuildConfig) -> Self {
        Self {
            tile,
            build_dir: naming::build_dir(&config.tiles_root, tile),
            imagery_root: config.imagery_root.clone(),
            zoom: config.zoom,
            provider_code: config.provider_code.clone(),
        }
    }

    /// Path of the precomputed mesh file this build requires.
    pub fn mesh_file(&self) -> PathBuf {
        naming::mesh_file(&self.build_dir, self.tile)
    }

    /// Final navigation-data path, visible only after commit.
    pub fn dsf_file(&self) -> PathBuf {
        naming::dsf_file(&self.build_dir, self.tile)
    }

    /// Provisional navigation-data path written during the build.
    pub fn dsf_tmp_file(&self) -> PathBuf {
        naming::dsf_tmp_file(&self.build_dir, self.tile)
    }

    /// Directory holding the final navigation-data file.
    pub fn nav_data_dir(&self) -> PathBuf {
        self.build_dir
            .join("Earth nav data")
            .join(naming::round_latlon(self.tile))
    }

    /// Packaged texture directory.
    pub fn textures_dir(&self) -> PathBuf {
        self.build_dir.join("textures")
    }

    /// Terrain definition directory.
    pub fn terrain_dir(&self) -> PathBuf {
        self.build_dir.join("terrain")
    }

    /// Imagery cache directory for this target's provider and zoom.
    pub fn imagery_dir(&self) -> PathBuf {
        naming::imagery_dir(&self.imagery_root, self.tile, &self.provider_code, self.zoom)
    }
}
