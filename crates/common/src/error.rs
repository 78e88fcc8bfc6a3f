//! Error types shared across Reelsmith crates.

/// Top-level error type for Reelsmith infrastructure operations.
///
/// Component failures that callers need to classify (fetch, reconcile,
/// composite) have their own typed errors in their crates; this type covers
/// configuration, scratch storage and other plumbing.
#[derive(Debug, thiserror::Error)]
pub enum ReelError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Scratch storage error: {message}")]
    Scratch { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using ReelError.
pub type ReelResult<T> = Result<T, ReelError>;

impl ReelError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn scratch(msg: impl Into<String>) -> Self {
        Self::Scratch {
            message: msg.into(),
        }
    }
}
