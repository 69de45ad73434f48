//! Error types for texture conversion.

use thiserror::Error;

/// Errors that can occur while converting a texture.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The raw imagery file could not be read.
    #[error("failed to read imagery: {0}")]
    Read(#[source] std::io::Error),

    /// The raw imagery did not decode.
    #[error("failed to decode imagery: {0}")]
    Decode(String),

    /// Image dimensions are unusable for block compression.
    #[error("invalid dimensions {width}×{height}: {reason}")]
    InvalidDimensions {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
        /// Why the dimensions are rejected.
        reason: String,
    },

    /// The packaged texture could not be written.
    #[error("failed to write texture: {0}")]
    Write(#[source] std::io::Error),

    /// The encode task was torn down before finishing.
    #[error("encode task aborted")]
    Aborted,
}
