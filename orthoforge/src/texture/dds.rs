//! DDS texture converter with BC1 block compression.
//!
//! Produces a standard 128-byte DDS header followed by a BC1 (DXT1) mipmap
//! chain. Block compression is delegated to `intel_tex_2`; mipmaps are
//! generated by successive halving of the base image.

use super::{ConvertError, TextureConverter};
use crate::fetch::FetchedTexture;
use crate::tile::BuildTarget;
use image::imageops::FilterType;
use image::RgbaImage;
use intel_tex_2::{bc1, RgbaSurface};
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

// DDS header flag constants (DDS_HEADER / DDS_PIXELFORMAT).
const DDSD_CAPS: u32 = 0x1;
const DDSD_HEIGHT: u32 = 0x2;
const DDSD_WIDTH: u32 = 0x4;
const DDSD_PIXELFORMAT: u32 = 0x1000;
const DDSD_MIPMAPCOUNT: u32 = 0x20000;
const DDSD_LINEARSIZE: u32 = 0x80000;
const DDPF_FOURCC: u32 = 0x4;
const DDSCAPS_COMPLEX: u32 = 0x8;
const DDSCAPS_TEXTURE: u32 = 0x1000;
const DDSCAPS_MIPMAP: u32 = 0x400000;

/// Default number of mipmap levels (4096 down to 256).
pub const DEFAULT_MIPMAP_COUNT: u32 = 5;

/// Converter producing BC1-compressed DDS textures.
#[derive(Debug, Clone)]
pub struct DdsTextureConverter {
    mipmap_count: u32,
}

impl DdsTextureConverter {
    /// Creates a converter with the default mipmap chain length.
    pub fn new() -> Self {
        Self {
            mipmap_count: DEFAULT_MIPMAP_COUNT,
        }
    }

    /// Sets the number of mipmap levels to generate (including the base).
    pub fn with_mipmap_count(mut self, count: u32) -> Self {
        self.mipmap_count = count.max(1);
        self
    }
}

impl Default for DdsTextureConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl TextureConverter for DdsTextureConverter {
    fn convert<'a>(
        &'a self,
        target: &'a BuildTarget,
        fetched: &'a FetchedTexture,
    ) -> Pin<Box<dyn Future<Output = Result<(), ConvertError>> + Send + 'a>> {
        Box::pin(async move {
            let bytes = tokio::fs::read(&fetched.jpeg_path)
                .await
                .map_err(ConvertError::Read)?;

            let mipmap_count = self.mipmap_count;
            // Block compression is CPU-bound; keep it off the async workers.
            let dds = tokio::task::spawn_blocking(move || {
                let image = image::load_from_memory(&bytes)
                    .map_err(|e| ConvertError::Decode(e.to_string()))?
                    .to_rgba8();
                encode_dds(&image, mipmap_count)
            })
            .await
            .map_err(|_| ConvertError::Aborted)??;

            let out_dir = target.textures_dir();
            tokio::fs::create_dir_all(&out_dir)
                .await
                .map_err(ConvertError::Write)?;
            let out_path = out_dir.join(fetched.request.dds_file_name());
            tokio::fs::write(&out_path, &dds)
                .await
                .map_err(ConvertError::Write)?;

            debug!(texture = %fetched.request, bytes = dds.len(), "converted");
            Ok(())
        })
    }
}

/// Encodes an RGBA image as a BC1 DDS file with a mipmap chain.
///
/// The mipmap chain stops early if halving would drop below 4 px, so the
/// effective level count never exceeds what the dimensions allow.
pub fn encode_dds(image: &RgbaImage, mipmap_count: u32) -> Result<Vec<u8>, ConvertError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(ConvertError::InvalidDimensions {
            width,
            height,
            reason: "zero-sized image".to_string(),
        });
    }
    if width % 4 != 0 || height % 4 != 0 {
        return Err(ConvertError::InvalidDimensions {
            width,
            height,
            reason: "must be a multiple of 4".to_string(),
        });
    }

    let levels = effective_mipmap_count(width, height, mipmap_count);
    let mut output = dds_header(width, height, levels);

    compress_level(&mut output, image);
    let mut current: Option<RgbaImage> = None;
    for _ in 1..levels {
        let source = current.as_ref().unwrap_or(image);
        let (w, h) = source.dimensions();
        let next = image::imageops::resize(source, w / 2, h / 2, FilterType::Triangle);
        compress_level(&mut output, &next);
        current = Some(next);
    }

    Ok(output)
}

fn compress_level(output: &mut Vec<u8>, level: &RgbaImage) {
    let (width, height) = level.dimensions();
    let surface = RgbaSurface {
        data: level.as_raw(),
        width,
        height,
        stride: width * 4,
    };
    output.extend_from_slice(&bc1::compress_blocks(&surface));
}

/// Number of mipmap levels the dimensions actually support, capped at
/// `requested`.
fn effective_mipmap_count(width: u32, height: u32, requested: u32) -> u32 {
    let mut levels = 1;
    let (mut w, mut h) = (width, height);
    while levels < requested && w / 2 >= 4 && h / 2 >= 4 {
        w /= 2;
        h /= 2;
        levels += 1;
    }
    levels
}

/// Builds the 128-byte DDS header (magic + DDS_HEADER) for a BC1 surface.
fn dds_header(width: u32, height: u32, mipmap_count: u32) -> Vec<u8> {
    // BC1: 8 bytes per 4×4 block.
    let linear_size = width.div_ceil(4) * height.div_ceil(4) * 8;

    let mut flags = DDSD_CAPS | DDSD_HEIGHT | DDSD_WIDTH | DDSD_PIXELFORMAT | DDSD_LINEARSIZE;
    let mut caps = DDSCAPS_TEXTURE;
    if mipmap_count > 1 {
        flags |= DDSD_MIPMAPCOUNT;
        caps |= DDSCAPS_COMPLEX | DDSCAPS_MIPMAP;
    }

    let mut header = Vec::with_capacity(128);
    header.extend_from_slice(b"DDS ");
    header.extend_from_slice(&124u32.to_le_bytes()); // dwSize
    header.extend_from_slice(&flags.to_le_bytes());
    header.extend_from_slice(&height.to_le_bytes());
    header.extend_from_slice(&width.to_le_bytes());
    header.extend_from_slice(&linear_size.to_le_bytes());
    header.extend_from_slice(&0u32.to_le_bytes()); // dwDepth
    header.extend_from_slice(&mipmap_count.to_le_bytes());
    for _ in 0..11 {
        header.extend_from_slice(&0u32.to_le_bytes()); // dwReserved1
    }
    // DDS_PIXELFORMAT
    header.extend_from_slice(&32u32.to_le_bytes()); // dwSize
    header.extend_from_slice(&DDPF_FOURCC.to_le_bytes());
    header.extend_from_slice(b"DXT1");
    for _ in 0..5 {
        header.extend_from_slice(&0u32.to_le_bytes()); // bit counts and masks
    }
    header.extend_from_slice(&caps.to_le_bytes());
    for _ in 0..4 {
        header.extend_from_slice(&0u32.to_le_bytes()); // dwCaps2..dwReserved2
    }
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use crate::coord::TileKey;
    use crate::tile::TextureRequest;
    use std::io::Cursor;

    fn checkered(size: u32) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                image::Rgba([255, 255, 255, 255])
            } else {
                image::Rgba([0, 64, 128, 255])
            }
        })
    }

    #[test]
    fn test_header_is_128_bytes_with_magic() {
        let header = dds_header(256, 256, 5);
        assert_eq!(header.len(), 128);
        assert_eq!(&header[0..4], b"DDS ");
        assert_eq!(&header[84..88], b"DXT1");
    }

    #[test]
    fn test_encode_size_single_level() {
        // 64×64 BC1: 16×16 blocks × 8 bytes = 2048, plus 128-byte header.
        let data = encode_dds(&checkered(64), 1).unwrap();
        assert_eq!(data.len(), 128 + 2048);
    }

    #[test]
    fn test_encode_size_with_mipmaps() {
        // Levels 64, 32, 16: (256 + 64 + 16) blocks × 8 bytes.
        let data = encode_dds(&checkered(64), 3).unwrap();
        assert_eq!(data.len(), 128 + (256 + 64 + 16) * 8);
    }

    #[test]
    fn test_mipmap_chain_capped_by_dimensions() {
        assert_eq!(effective_mipmap_count(16, 16, 5), 3);
        assert_eq!(effective_mipmap_count(4096, 4096, 5), 5);
        assert_eq!(effective_mipmap_count(4, 4, 5), 1);
    }

    #[test]
    fn test_encode_rejects_zero_dimensions() {
        let err = encode_dds(&RgbaImage::new(0, 0), 1).unwrap_err();
        assert!(matches!(err, ConvertError::InvalidDimensions { .. }));
    }

    #[test]
    fn test_encode_rejects_unaligned_dimensions() {
        let err = encode_dds(&RgbaImage::new(10, 10), 1).unwrap_err();
        assert!(matches!(err, ConvertError::InvalidDimensions { .. }));
    }

    #[tokio::test]
    async fn test_convert_writes_dds() {
        let tiles = tempfile::tempdir().unwrap();
        let imagery = tempfile::tempdir().unwrap();
        let config = BuildConfig::default()
            .with_tiles_root(tiles.path())
            .with_imagery_root(imagery.path())
            .with_zoom(16)
            .with_provider("T");
        let target = crate::tile::BuildTarget::new(TileKey::new(47, 7), &config);

        let jpeg_path = imagery.path().join("32_16_T16.jpg");
        let mut buffer = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(checkered(32))
            .to_rgb8()
            .write_to(&mut buffer, image::ImageFormat::Jpeg)
            .unwrap();
        std::fs::write(&jpeg_path, buffer.into_inner()).unwrap();

        let fetched = FetchedTexture {
            request: TextureRequest::new(16, 32, 16, "T"),
            jpeg_path,
        };
        let converter = DdsTextureConverter::new().with_mipmap_count(2);
        converter.convert(&target, &fetched).await.unwrap();

        let out = target.textures_dir().join("32_16_T16.dds");
        let data = std::fs::read(out).unwrap();
        assert_eq!(&data[0..4], b"DDS ");
    }

    #[tokio::test]
    async fn test_convert_missing_imagery_fails() {
        let tiles = tempfile::tempdir().unwrap();
        let config = BuildConfig::default()
            .with_tiles_root(tiles.path())
            .with_zoom(16)
            .with_provider("T");
        let target = crate::tile::BuildTarget::new(TileKey::new(47, 7), &config);

        let fetched = FetchedTexture {
            request: TextureRequest::new(16, 32, 16, "T"),
            jpeg_path: tiles.path().join("missing.jpg"),
        };
        let err = DdsTextureConverter::new()
            .convert(&target, &fetched)
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Read(_)));
    }
}
