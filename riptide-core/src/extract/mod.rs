//! Extraction adapter port.
//!
//! The fetch+transcode operation is a black box behind [`MediaExtractor`]:
//! it may take seconds to minutes and occupies the calling worker for its
//! full duration. The production implementation drives a `yt-dlp`
//! subprocess ([`ytdlp::YtDlpExtractor`]).

pub mod ytdlp;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Progress event emitted by an extraction in flight.
///
/// Delivery is at-most-once per event and may be lossy under high update
/// frequency; consumers keep the last value.
#[derive(Debug, Clone)]
pub struct ExtractProgress {
    pub percent: Option<u8>,
    pub message: String,
}

/// Successful extraction outcome.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub title: String,
    pub duration_secs: u64,
    pub output_path: PathBuf,
    pub thumbnail: Option<String>,
}

/// Options passed through to the extractor invocation.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub download_dir: PathBuf,
    /// Output naming template, extractor syntax (e.g. `%(title)s.%(ext)s`).
    pub output_template: String,
    pub audio_format: String,
    pub audio_quality: String,
    pub socket_timeout_secs: u64,
    pub retries: u32,
    /// Optional upstream client identity hint (works around access
    /// restrictions on some sources).
    pub player_client: Option<String>,
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to launch extractor: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Extractor failed: {0}")]
    Failed(String),

    #[error("Extractor metadata was unusable: {0}")]
    Metadata(String),

    #[error("Audio conversion produced no output file")]
    MissingOutput,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Port for the fetch+transcode operation.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Fetch `url` and transcode its audio track, streaming progress events
    /// into `progress`. Blocks (asynchronously) until done.
    async fn extract(
        &self,
        url: &str,
        options: &ExtractOptions,
        progress: mpsc::Sender<ExtractProgress>,
    ) -> Result<Extraction, ExtractError>;
}
