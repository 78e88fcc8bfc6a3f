//! Fetch error types.

use reelsmith_job_model::FetchFailure;

/// Why an asset could not be brought into scratch storage.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("asset exceeds the {limit_bytes} byte limit")]
    Oversized { limit_bytes: u64 },

    #[error("transfer did not finish within {secs}s")]
    Timeout { secs: u64 },

    #[error("source unreachable: {message}")]
    Unreachable { message: String },

    #[error("asset is empty")]
    Empty,

    #[error("scratch storage error: {message}")]
    Scratch { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FetchError {
    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::Unreachable {
            message: msg.into(),
        }
    }

    /// Caller-facing classification. `None` means the failure is ours
    /// (scratch storage), not the source's.
    pub fn failure(&self) -> Option<FetchFailure> {
        match self {
            Self::Oversized { .. } => Some(FetchFailure::Oversized),
            Self::Timeout { .. } => Some(FetchFailure::Timeout),
            Self::Unreachable { .. } => Some(FetchFailure::Unreachable),
            Self::Empty => Some(FetchFailure::Empty),
            Self::Scratch { .. } | Self::Io(_) => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_timeout() {
            return Self::unreachable(format!("request timed out: {err}"));
        }
        match err.status() {
            Some(status) => Self::unreachable(format!("HTTP {status}")),
            None => Self::unreachable(err.to_string()),
        }
    }
}
