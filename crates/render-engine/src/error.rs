//! Composite error types.

use reelsmith_job_model::{CompositeFailure, FailureKind, TrackKind};

/// Why a track could not be opened or the output could not be produced.
#[derive(Debug, thiserror::Error)]
pub enum CompositeError {
    #[error("{track} track could not be opened: {message}")]
    UnreadableTrack { track: TrackKind, message: String },

    #[error("{track} track has no usable duration: {message}")]
    InvalidDuration { track: TrackKind, message: String },

    #[error("encoding failed: {message}")]
    EncodeFailure { message: String },

    #[error("encoding cancelled")]
    Cancelled,

    #[error("render backend unavailable: {message}")]
    BackendUnavailable { message: String },

    #[error("trim plan does not fit the opened tracks: {message}")]
    PlanMismatch { message: String },

    #[error("scratch storage error: {message}")]
    Scratch { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CompositeError {
    pub fn encode(msg: impl Into<String>) -> Self {
        Self::EncodeFailure {
            message: msg.into(),
        }
    }

    pub fn unreadable(track: TrackKind, msg: impl Into<String>) -> Self {
        Self::UnreadableTrack {
            track,
            message: msg.into(),
        }
    }

    /// Caller-facing classification.
    ///
    /// `Cancelled` reports as `Timeout`: the pipeline only cancels an encode
    /// when the job's budget runs out.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::UnreadableTrack { .. } => {
                FailureKind::Composite(CompositeFailure::UnreadableTrack)
            }
            Self::InvalidDuration { .. } => FailureKind::InvalidTrack,
            Self::EncodeFailure { .. } => FailureKind::Composite(CompositeFailure::EncodeFailure),
            Self::Cancelled => FailureKind::Timeout,
            Self::BackendUnavailable { .. }
            | Self::PlanMismatch { .. }
            | Self::Scratch { .. }
            | Self::Io(_) => FailureKind::InternalError,
        }
    }
}
