//! Error types for the build orchestrator.

use thiserror::Error;

/// Errors that prevent a build from starting at all.
///
/// Failures inside a running build land in the report instead, so a batch
/// run can keep going after a single bad tile.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Another build already holds the build lock.
    #[error("a build is already in progress")]
    BuildInProgress,

    /// The build directory could not be prepared.
    #[error("failed to prepare build directory: {0}")]
    Prepare(#[source] std::io::Error),
}
