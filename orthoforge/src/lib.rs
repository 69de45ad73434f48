//! OrthoForge - Orthophoto scenery tile builder for X-Plane
//!
//! This library assembles photo-realistic scenery tiles from satellite
//! imagery: it enumerates the Web Mercator texture grid covering a 1°×1°
//! tile, downloads the imagery through a pool of fetch workers, packages
//! it into BC1-compressed DDS textures, and commits the tile's
//! navigation-data file by atomic rename so the simulator never sees a
//! half-built artifact.
//!
//! The entry point is [`build::BuildOrchestrator`]; the [`pipeline`]
//! module holds the bounded queues and stage coordinators it runs on.

pub mod build;
pub mod config;
pub mod coord;
pub mod fetch;
pub mod logging;
pub mod naming;
pub mod pipeline;
pub mod producer;
pub mod provider;
pub mod texture;
pub mod tile;

/// Crate version, as published.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
