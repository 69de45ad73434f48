//! Imagery provider descriptors.
//!
//! A provider is an external imagery source identified by a short code
//! (`BI`, `ARC`, ...). Each descriptor carries a URL template with `{x}`,
//! `{y}`, `{z}` and `{q}` (Bing-style quadkey) placeholders; the fetcher
//! substitutes grid coordinates to obtain one 256 px imagery tile.

mod http;

pub use http::{HttpClient, ReqwestClient};

#[cfg(test)]
pub use http::tests::MockHttpClient;

use std::collections::HashMap;
use thiserror::Error;

/// Errors raised by providers and their HTTP transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Transport-level failure (connect, timeout, non-2xx status).
    #[error("HTTP error: {0}")]
    Http(String),

    /// No provider registered under the requested code.
    #[error("unknown provider code '{0}'")]
    UnknownProvider(String),

    /// The provider does not serve imagery at the requested zoom level.
    #[error("provider '{code}' does not serve zoom {zoom} (max {max_zoom})")]
    UnsupportedZoom {
        /// Provider code.
        code: String,
        /// Requested zoom level.
        zoom: u8,
        /// Highest zoom level the provider serves.
        max_zoom: u8,
    },
}

/// Descriptor of one imagery source.
#[derive(Debug, Clone)]
pub struct Provider {
    code: String,
    name: String,
    url_template: String,
    max_zoom: u8,
}

impl Provider {
    /// Creates a provider descriptor.
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        url_template: impl Into<String>,
        max_zoom: u8,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            url_template: url_template.into(),
            max_zoom,
        }
    }

    /// Short provider code, e.g. `BI`.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Human-readable provider name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Highest zoom level this provider serves.
    pub fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    /// Builds the URL for one imagery grid tile.
    ///
    /// Returns [`ProviderError::UnsupportedZoom`] if the zoom level exceeds
    /// the provider's maximum.
    pub fn grid_tile_url(&self, x: u32, y: u32, zoom: u8) -> Result<String, ProviderError> {
        if zoom > self.max_zoom {
            return Err(ProviderError::UnsupportedZoom {
                code: self.code.clone(),
                zoom,
                max_zoom: self.max_zoom,
            });
        }
        let mut url = self
            .url_template
            .replace("{x}", &x.to_string())
            .replace("{y}", &y.to_string())
            .replace("{z}", &zoom.to_string());
        if url.contains("{q}") {
            url = url.replace("{q}", &to_quadkey(x, y, zoom));
        }
        Ok(url)
    }
}

/// Converts grid coordinates to a Bing Maps quadkey.
///
/// One base-4 digit per zoom level, most significant first.
pub fn to_quadkey(x: u32, y: u32, zoom: u8) -> String {
    let mut quadkey = String::with_capacity(zoom as usize);
    for i in (1..=zoom).rev() {
        let mask = 1u32 << (i - 1);
        let mut digit = 0u8;
        if x & mask != 0 {
            digit += 1;
        }
        if y & mask != 0 {
            digit += 2;
        }
        quadkey.push((b'0' + digit) as char);
    }
    quadkey
}

/// Registry of known providers, looked up by code.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Provider>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Creates a registry populated with the built-in providers.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Provider::new(
            "BI",
            "Bing Maps",
            "https://ecn.t0.tiles.virtualearth.net/tiles/a{q}.jpeg?g=1",
            19,
        ));
        registry.register(Provider::new(
            "ARC",
            "ArcGIS World Imagery",
            "https://server.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer/tile/{z}/{y}/{x}",
            19,
        ));
        registry.register(Provider::new(
            "USGS",
            "USGS Imagery Only",
            "https://basemap.nationalmap.gov/arcgis/rest/services/USGSImageryOnly/MapServer/tile/{z}/{y}/{x}",
            16,
        ));
        registry
    }

    /// Adds or replaces a provider descriptor.
    pub fn register(&mut self, provider: Provider) {
        self.providers.insert(provider.code().to_string(), provider);
    }

    /// Looks up a provider by code.
    pub fn get(&self, code: &str) -> Result<&Provider, ProviderError> {
        self.providers
            .get(code)
            .ok_or_else(|| ProviderError::UnknownProvider(code.to_string()))
    }

    /// Returns all registered codes, sorted.
    pub fn codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
