//! Deterministic file and directory naming for build artifacts.
//!
//! Every artifact path is a pure function of tile coordinates, so a rebuild
//! of the same tile always lands on the same files. The layout follows the
//! X-Plane custom-scenery convention: the navigation-data file lives under
//! `Earth nav data/<10°-bucket>/<tile>.dsf`, textures under `textures/`,
//! terrain definitions under `terrain/`.

use crate::coord::TileKey;
use std::path::{Path, PathBuf};

/// Short tile label, e.g. `+47+007`.
pub fn short_latlon(tile: TileKey) -> String {
    format!("{:+03}{:+04}", tile.lat, tile.lon)
}

/// 10°×10° bucket label the tile falls into, e.g. `+40+000`.
pub fn round_latlon(tile: TileKey) -> String {
    let lat = (tile.lat as f64 / 10.0).floor() as i32 * 10;
    let lon = (tile.lon as f64 / 10.0).floor() as i32 * 10;
    format!("{:+03}{:+04}", lat, lon)
}

/// Bucketed relative path, e.g. `+40+000/+47+007`.
pub fn long_latlon(tile: TileKey) -> PathBuf {
    Path::new(&round_latlon(tile)).join(short_latlon(tile))
}

/// Hemisphere-style label used by elevation datasets, e.g. `N47E007`.
pub fn hem_latlon(tile: TileKey) -> String {
    let ns = if tile.lat >= 0 { 'N' } else { 'S' };
    let ew = if tile.lon >= 0 { 'E' } else { 'W' };
    format!("{}{:02}{}{:03}", ns, tile.lat.abs(), ew, tile.lon.abs())
}

/// Name of the per-tile scenery directory, e.g. `zOrthoForge_+47+007`.
pub fn tile_dir_name(tile: TileKey) -> String {
    format!("zOrthoForge_{}", short_latlon(tile))
}

/// Build directory for a tile under the tiles root.
pub fn build_dir(tiles_root: &Path, tile: TileKey) -> PathBuf {
    tiles_root.join(tile_dir_name(tile))
}

/// Precomputed mesh file the build depends on, e.g. `Data+47+007.mesh`.
pub fn mesh_file(build_dir: &Path, tile: TileKey) -> PathBuf {
    build_dir.join(format!("Data{}.mesh", short_latlon(tile)))
}

/// Final navigation-data path, e.g. `Earth nav data/+40+000/+47+007.dsf`.
pub fn dsf_file(build_dir: &Path, tile: TileKey) -> PathBuf {
    build_dir
        .join("Earth nav data")
        .join(round_latlon(tile))
        .join(format!("{}.dsf", short_latlon(tile)))
}

/// Provisional navigation-data path written during a build.
///
/// Only ever made visible at [`dsf_file`] by an atomic rename at commit.
pub fn dsf_tmp_file(build_dir: &Path, tile: TileKey) -> PathBuf {
    let mut path = dsf_file(build_dir, tile).into_os_string();
    path.push(".tmp");
    PathBuf::from(path)
}

/// Raw imagery file name for a texture, e.g. `100352_136960_BI16.jpg`.
pub fn jpeg_file_name(x: u32, y: u32, zoom: u8, provider_code: &str) -> String {
    format!("{}_{}_{}{}.jpg", y, x, provider_code, zoom)
}

/// Packaged texture file name, e.g. `100352_136960_BI16.dds`.
pub fn dds_file_name(x: u32, y: u32, zoom: u8, provider_code: &str) -> String {
    format!("{}_{}_{}{}.dds", y, x, provider_code, zoom)
}

/// Terrain definition file name, e.g. `100352_136960_BI16.ter`.
pub fn ter_file_name(x: u32, y: u32, zoom: u8, provider_code: &str) -> String {
    format!("{}_{}_{}{}.ter", y, x, provider_code, zoom)
}

/// Imagery cache directory for one tile/provider/zoom combination.
///
/// Layout: `<imagery_root>/<short_latlon>/<code>_<zoom>/`.
pub fn imagery_dir(imagery_root: &Path, tile: TileKey, provider_code: &str, zoom: u8) -> PathBuf {
    imagery_root
        .join(short_latlon(tile))
        .join(format!("{}_{}", provider_code, zoom))
}
