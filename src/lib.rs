//! audioproxy - a web-facing audio extraction proxy
//!
//! This library resolves video URLs to content identifiers, runs an ordered chain of
//! acquisition strategies (yt-dlp profiles, a Piped API instance, an external converter
//! service), transcodes the result to MP3 with ffmpeg and tracks every job in memory so
//! clients can poll for progress.

pub mod api;
pub mod cli;
pub mod config;
pub mod extractors;
pub mod jobs;
pub mod output;
pub mod registry;
pub mod resolver;
pub mod storage;
pub mod transcode;
pub mod utils;
pub mod worker;

use std::time::Duration;

pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use extractors::{AcquisitionStrategy, MediaMetadata, RawAudio, StrategyChain};
pub use jobs::{JobId, JobRecord, JobState, JobTracker};
pub use registry::{ArtifactRecord, ContentRegistry};
pub use resolver::ContentId;
pub use worker::AcquisitionService;

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error taxonomy surfaced by the orchestration layer
#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Already downloaded: {filename}")]
    AlreadyExists {
        content_id: ContentId,
        filename: String,
    },

    #[error("A download for {0} is already in progress")]
    AlreadyInProgress(ContentId),

    #[error("Too many downloads queued, try again later")]
    QueueFull,

    #[error("Metadata fetch failed: {0}")]
    MetadataFetchFailed(String),

    #[error("Transcode failed: {0}")]
    TranscodeFailed(String),

    #[error("{last_error}")]
    AllStrategiesFailed {
        attempts: usize,
        last_error: String,
    },

    #[error("Download cancelled")]
    Cancelled,

    #[error("Download timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
