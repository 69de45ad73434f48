//! Two-stage download and convert pipeline.
//!
//! The producer enumerates texture requests into a bounded acquisition
//! queue; the download coordinator fans them out across fetch workers and
//! forwards fetched imagery to a conversion queue; the convert coordinator
//! packages the imagery into platform textures. Both stages shut down via
//! sentinels on a clean drain and via the cancellation token otherwise.

pub mod convert;
pub mod download;
pub mod progress;
pub mod queue;

pub use convert::{ConvertConfig, ConvertCoordinator, ConvertSummary, DEFAULT_CONVERT_WORKERS};
pub use download::{
    DownloadConfig, DownloadCoordinator, DownloadSummary, PermanentFailure,
    DEFAULT_DOWNLOAD_WORKERS, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BACKOFF,
};
pub use progress::{NullProgressSink, ProgressSink, ProgressTracker, Stage};
pub use queue::{QueueItem, WorkQueue};
