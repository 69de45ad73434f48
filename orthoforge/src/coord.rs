//! Tile and texture-grid geometry.
//!
//! Scenery is built per 1°×1° tile ([`TileKey`]). Imagery lives on the
//! Web Mercator grid at a given zoom level; one packaged texture covers a
//! [`TEXTURE_SPAN`]×[`TEXTURE_SPAN`] block of grid tiles (4096×4096 px at
//! 256 px per grid tile), so texture origins are always multiples of 16.

use std::f64::consts::PI;
use std::fmt;

/// Grid tiles covered by one packaged texture along each edge.
pub const TEXTURE_SPAN: u32 = 16;

/// Latitude limit of the Web Mercator projection.
pub const MERCATOR_LAT_LIMIT: f64 = 85.05;

/// Identity of a 1°×1° scenery tile, keyed by its south-west corner.
///
/// # Example
///
/// ```
/// use orthoforge::coord::TileKey;
///
/// let tile = TileKey::new(47, 7);
/// assert_eq!(tile.to_string(), "+47+007");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Latitude of the south-west corner in whole degrees.
    pub lat: i32,
    /// Longitude of the south-west corner in whole degrees.
    pub lon: i32,
}

impl TileKey {
    /// Creates a tile key from whole-degree south-west corner coordinates.
    pub fn new(lat: i32, lon: i32) -> Self {
        Self { lat, lon }
    }

    /// Returns true if the tile lies inside the Web Mercator domain.
    pub fn is_mappable(&self) -> bool {
        (self.lat as f64) < MERCATOR_LAT_LIMIT
            && (self.lat as f64 + 1.0) > -MERCATOR_LAT_LIMIT
            && (-180..180).contains(&self.lon)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+03}{:+04}", self.lat, self.lon)
    }
}

/// Converts WGS84 coordinates to fractional Web Mercator grid coordinates.
///
/// Returns `(x, y)` where `x` grows eastward and `y` grows southward, both
/// in units of 256 px grid tiles at the given zoom level. Latitude is
/// clamped to the Mercator domain.
pub fn wgs84_to_grid(lat: f64, lon: f64, zoom: u8) -> (f64, f64) {
    let lat = lat.clamp(-MERCATOR_LAT_LIMIT, MERCATOR_LAT_LIMIT);
    let n = (1u64 << zoom) as f64;
    let lat_rad = lat.to_radians();
    let x = (lon + 180.0) / 360.0 * n;
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n;
    (x, y)
}

/// Converts Web Mercator grid coordinates back to WGS84 `(lat, lon)`.
pub fn grid_to_wgs84(x: f64, y: f64, zoom: u8) -> (f64, f64) {
    let n = (1u64 << zoom) as f64;
    let lon = x / n * 360.0 - 180.0;
    let lat_rad = (PI * (1.0 - 2.0 * y / n)).sinh().atan();
    (lat_rad.to_degrees(), lon)
}

/// Snaps a grid coordinate to the origin of the texture containing it.
pub fn texture_origin(x: u32, y: u32) -> (u32, u32) {
    (x - x % TEXTURE_SPAN, y - y % TEXTURE_SPAN)
}

/// Enumerates the origins of all textures covering a tile at a zoom level.
///
/// Origins are emitted row-major, north to south, west to east. The count
/// grows roughly fourfold per zoom level; an out-of-domain tile yields an
/// empty set.
pub fn textures_for_tile(tile: TileKey, zoom: u8) -> Vec<(u32, u32)> {
    if !tile.is_mappable() {
        return Vec::new();
    }
    let (x_min, y_min) = wgs84_to_grid(tile.lat as f64 + 1.0, tile.lon as f64, zoom);
    let (x_max, y_max) = wgs84_to_grid(tile.lat as f64, tile.lon as f64 + 1.0, zoom);

    let (x0, y0) = texture_origin(x_min.floor() as u32, y_min.floor() as u32);
    let x1 = x_max.ceil() as u32;
    let y1 = y_max.ceil() as u32;

    let mut origins = Vec::new();
    let mut y = y0;
    while y < y1 {
        let mut x = x0;
        while x < x1 {
            origins.push((x, y));
            x += TEXTURE_SPAN;
        }
        y += TEXTURE_SPAN;
    }
    origins
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_key_display() {
        assert_eq!(TileKey::new(47, 7).to_string(), "+47+007");
        assert_eq!(TileKey::new(-5, -71).to_string(), "-05-071");
        assert_eq!(TileKey::new(0, 0).to_string(), "+00+000");
        assert_eq!(TileKey::new(40, -123).to_string(), "+40-123");
    }

    #[test]
    fn test_tile_key_mappable() {
        assert!(TileKey::new(47, 7).is_mappable());
        assert!(TileKey::new(-85, 179).is_mappable());
        assert!(!TileKey::new(86, 0).is_mappable());
        assert!(!TileKey::new(0, 180).is_mappable());
    }

    #[test]
    fn test_grid_origin_of_projection() {
        let (x, y) = wgs84_to_grid(0.0, 0.0, 10);
        assert!((x - 512.0).abs() < 1e-9);
        assert!((y - 512.0).abs() < 1e-9);
    }

    #[test]
    fn test_grid_roundtrip() {
        let (lat, lon) = (47.3, 7.9);
        let (x, y) = wgs84_to_grid(lat, lon, 16);
        let (lat2, lon2) = grid_to_wgs84(x, y, 16);
        assert!((lat - lat2).abs() < 1e-6);
        assert!((lon - lon2).abs() < 1e-6);
    }

    #[test]
    fn test_texture_origin_snaps_down() {
        assert_eq!(texture_origin(0, 0), (0, 0));
        assert_eq!(texture_origin(15, 16), (0, 16));
        assert_eq!(texture_origin(33, 47), (32, 32));
    }

    #[test]
    fn test_textures_for_tile_aligned() {
        for (x, y) in textures_for_tile(TileKey::new(47, 7), 16) {
            assert_eq!(x % TEXTURE_SPAN, 0);
            assert_eq!(y % TEXTURE_SPAN, 0);
        }
    }

    #[test]
    fn test_textures_for_tile_covers_corners() {
        let tile = TileKey::new(47, 7);
        let zoom = 14;
        let origins = textures_for_tile(tile, zoom);
        assert!(!origins.is_empty());

        // Both the north-west and south-east corners must fall inside some
        // enumerated texture.
        for (lat, lon) in [(47.9999, 7.0001), (47.0001, 7.9999)] {
            let (x, y) = wgs84_to_grid(lat, lon, zoom);
            let origin = texture_origin(x.floor() as u32, y.floor() as u32);
            assert!(origins.contains(&origin), "missing {:?}", origin);
        }
    }

    #[test]
    fn test_textures_for_tile_grows_with_zoom() {
        let tile = TileKey::new(47, 7);
        let coarse = textures_for_tile(tile, 14).len();
        let fine = textures_for_tile(tile, 16).len();
        assert!(fine > coarse);
    }

    #[test]
    fn test_textures_for_polar_tile_empty() {
        assert!(textures_for_tile(TileKey::new(88, 0), 14).is_empty());
    }
}
