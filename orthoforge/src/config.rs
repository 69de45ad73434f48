//! Build configuration and per-tile INI persistence.
//!
//! A [`BuildConfig`] is assembled from defaults, an optional INI file and
//! CLI overrides. The orchestrator snapshots the effective configuration
//! into the tile's build directory so a later rebuild can reproduce the
//! same zoom and provider without the original command line.

use crate::pipeline::{ConvertConfig, DownloadConfig};
use ini::Ini;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default zoom level textures are fetched at.
pub const DEFAULT_ZOOM: u8 = 16;
/// Default imagery provider code.
pub const DEFAULT_PROVIDER: &str = "BI";
/// Default capacity of the acquisition and conversion queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 512;

/// Name of the per-tile configuration snapshot.
pub const TILE_CONFIG_FILE: &str = "orthoforge.cfg";

/// Errors raised while loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read or written.
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid INI.
    #[error("config parse error: {0}")]
    Parse(String),

    /// A key holds a value outside its valid range.
    #[error("invalid value for {section}.{key}: '{value}' ({reason})")]
    InvalidValue {
        /// INI section the key lives in.
        section: String,
        /// Offending key.
        key: String,
        /// Value as found in the file.
        value: String,
        /// Why the value is rejected.
        reason: String,
    },
}

/// Everything a tile build needs to know, CLI overrides applied.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Directory scenery directories are created under.
    pub tiles_root: PathBuf,
    /// Root of the raw imagery cache.
    pub imagery_root: PathBuf,
    /// Zoom level textures are fetched at.
    pub zoom: u8,
    /// Imagery provider code.
    pub provider_code: String,
    /// Download stage tuning.
    pub download: DownloadConfig,
    /// Convert stage tuning.
    pub convert: ConvertConfig,
    /// Capacity of the texture request queue.
    pub acquisition_capacity: usize,
    /// Capacity of the fetched imagery queue.
    pub conversion_capacity: usize,
    /// Skip the download stage entirely (dry runs over cached imagery).
    pub skip_downloads: bool,
    /// Skip the convert stage entirely.
    pub skip_converts: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        let data_root = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("orthoforge");
        Self {
            tiles_root: data_root.join("tiles"),
            imagery_root: data_root.join("imagery"),
            zoom: DEFAULT_ZOOM,
            provider_code: DEFAULT_PROVIDER.to_string(),
            download: DownloadConfig::default(),
            convert: ConvertConfig::default(),
            acquisition_capacity: DEFAULT_QUEUE_CAPACITY,
            conversion_capacity: DEFAULT_QUEUE_CAPACITY,
            skip_downloads: false,
            skip_converts: false,
        }
    }
}

impl BuildConfig {
    /// Sets the tiles root.
    pub fn with_tiles_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.tiles_root = root.into();
        self
    }

    /// Sets the imagery cache root.
    pub fn with_imagery_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.imagery_root = root.into();
        self
    }

    /// Sets the zoom level.
    pub fn with_zoom(mut self, zoom: u8) -> Self {
        self.zoom = zoom;
        self
    }

    /// Sets the imagery provider code.
    pub fn with_provider(mut self, code: impl Into<String>) -> Self {
        self.provider_code = code.into();
        self
    }

    /// Loads a configuration by overlaying the file at `path` on defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("build")) {
            if let Some(v) = section.get("tiles_root") {
                if !v.trim().is_empty() {
                    config.tiles_root = PathBuf::from(v.trim());
                }
            }
            if let Some(v) = section.get("imagery_root") {
                if !v.trim().is_empty() {
                    config.imagery_root = PathBuf::from(v.trim());
                }
            }
            if let Some(v) = section.get("zoom") {
                config.zoom = parse_key(v, "build", "zoom", "must be 1-19", |z: u8| {
                    (1..=19).contains(&z)
                })?;
            }
            if let Some(v) = section.get("provider") {
                if !v.trim().is_empty() {
                    config.provider_code = v.trim().to_string();
                }
            }
        }

        if let Some(section) = ini.section(Some("download")) {
            if let Some(v) = section.get("workers") {
                config.download.workers =
                    parse_key(v, "download", "workers", "must be a positive integer", |n| {
                        n > 0
                    })?;
            }
            if let Some(v) = section.get("max_attempts") {
                config.download.max_attempts = parse_key(
                    v,
                    "download",
                    "max_attempts",
                    "must be a positive integer",
                    |n| n > 0,
                )?;
            }
            if let Some(v) = section.get("retry_backoff_ms") {
                let ms: u64 = parse_key(
                    v,
                    "download",
                    "retry_backoff_ms",
                    "must be a non-negative integer (milliseconds)",
                    |_| true,
                )?;
                config.download.retry_backoff = Duration::from_millis(ms);
            }
            if let Some(v) = section.get("skip") {
                config.skip_downloads = parse_bool(v);
            }
        }

        if let Some(section) = ini.section(Some("convert")) {
            if let Some(v) = section.get("workers") {
                config.convert.workers =
                    parse_key(v, "convert", "workers", "must be a positive integer", |n| {
                        n > 0
                    })?;
            }
            if let Some(v) = section.get("skip") {
                config.skip_converts = parse_bool(v);
            }
        }

        if let Some(section) = ini.section(Some("queues")) {
            if let Some(v) = section.get("acquisition_capacity") {
                config.acquisition_capacity = parse_key(
                    v,
                    "queues",
                    "acquisition_capacity",
                    "must be a positive integer",
                    |n| n > 0,
                )?;
            }
            if let Some(v) = section.get("conversion_capacity") {
                config.conversion_capacity = parse_key(
                    v,
                    "queues",
                    "conversion_capacity",
                    "must be a positive integer",
                    |n| n > 0,
                )?;
            }
        }

        Ok(config)
    }

    /// Writes the effective configuration as an INI snapshot.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let mut ini = Ini::new();
        ini.with_section(Some("build"))
            .set("tiles_root", self.tiles_root.to_string_lossy().into_owned())
            .set(
                "imagery_root",
                self.imagery_root.to_string_lossy().into_owned(),
            )
            .set("zoom", self.zoom.to_string())
            .set("provider", self.provider_code.clone());
        ini.with_section(Some("download"))
            .set("workers", self.download.workers.to_string())
            .set("max_attempts", self.download.max_attempts.to_string())
            .set(
                "retry_backoff_ms",
                self.download.retry_backoff.as_millis().to_string(),
            )
            .set("skip", self.skip_downloads.to_string());
        ini.with_section(Some("convert"))
            .set("workers", self.convert.workers.to_string())
            .set("skip", self.skip_converts.to_string());
        ini.with_section(Some("queues"))
            .set(
                "acquisition_capacity",
                self.acquisition_capacity.to_string(),
            )
            .set(
                "conversion_capacity",
                self.conversion_capacity.to_string(),
            );
        ini.write_to_file(path)?;
        Ok(())
    }
}

fn parse_key<T: std::str::FromStr>(
    value: &str,
    section: &str,
    key: &str,
    reason: &str,
    valid: impl Fn(T) -> bool,
) -> Result<T, ConfigError>
where
    T: Copy,
{
    let invalid = || ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    };
    let parsed: T = value.trim().parse().map_err(|_| invalid())?;
    if !valid(parsed) {
        return Err(invalid());
    }
    Ok(parsed)
}

/// Parses a boolean config value; accepts true/yes/1/on case-insensitively.
fn parse_bool(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    v == "true" || v == "1" || v == "yes" || v == "on"
}
