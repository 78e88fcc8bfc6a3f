//! Media backend seam.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reelsmith_job_model::TrackKind;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::CompositeError;

/// What probing a track file revealed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaTrack {
    pub kind: TrackKind,
    pub path: PathBuf,

    /// Container duration in seconds. Finite and non-negative.
    pub duration_secs: f64,

    /// Container format reported by the prober (e.g. `mov,mp4,m4a,3gp`).
    pub format_name: String,

    pub has_video: bool,
    pub has_audio: bool,
}

/// A fully resolved encode invocation.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    /// Backend arguments, output path last.
    pub args: Vec<String>,

    /// Where the encoded file will be written.
    pub output: PathBuf,

    /// Expected output length, used for progress reporting.
    pub expected_duration_secs: f64,
}

/// Encode progress report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeProgress {
    /// Current progress [0.0, 1.0].
    pub progress: f64,

    /// Output timestamp reached so far.
    pub out_time_secs: f64,

    /// Estimated time remaining in seconds.
    pub eta_secs: f64,

    pub complete: bool,
}

/// Progress callback for encodes.
pub type ProgressCallback = Arc<dyn Fn(EncodeProgress) + Send + Sync>;

/// Trait for media backends (ffmpeg, test fakes).
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Open a track and read its container metadata.
    async fn probe(&self, kind: TrackKind, path: &Path) -> Result<MediaTrack, CompositeError>;

    /// Run an encode to completion. Must stop promptly once `cancel` fires
    /// and return [`CompositeError::Cancelled`].
    async fn encode(
        &self,
        request: &EncodeRequest,
        cancel: &CancellationToken,
        progress: Option<&ProgressCallback>,
    ) -> Result<(), CompositeError>;

    /// Check if this backend is available on the system.
    fn is_available(&self) -> bool;

    /// Backend name.
    fn name(&self) -> &str;
}
