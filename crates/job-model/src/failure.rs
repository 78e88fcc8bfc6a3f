//! Caller-facing failure taxonomy.
//!
//! Every terminal failure carries a [`FailureKind`] with a stable dotted code
//! and a message that is safe to show to end users (no scratch paths, no
//! credentials).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Why an asset transfer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchFailure {
    Oversized,
    Timeout,
    Unreachable,
    Empty,
}

/// Why compositing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompositeFailure {
    UnreadableTrack,
    EncodeFailure,
}

/// Terminal failure classification for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Admission-time resource exhaustion. The caller should back off.
    Overloaded,
    Fetch(FetchFailure),
    /// Zero, negative or unreadable track duration.
    InvalidTrack,
    Composite(CompositeFailure),
    /// The job's overall budget ran out.
    Timeout,
    InternalError,
}

/// A `{kind, message}` pair delivered to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureKind {
    /// Stable identifier for the failure kind.
    pub fn code(self) -> &'static str {
        match self {
            Self::Overloaded => "overloaded",
            Self::Fetch(FetchFailure::Oversized) => "fetch_error.oversized",
            Self::Fetch(FetchFailure::Timeout) => "fetch_error.timeout",
            Self::Fetch(FetchFailure::Unreachable) => "fetch_error.unreachable",
            Self::Fetch(FetchFailure::Empty) => "fetch_error.empty",
            Self::InvalidTrack => "invalid_track",
            Self::Composite(CompositeFailure::UnreadableTrack) => {
                "composite_error.unreadable_track"
            }
            Self::Composite(CompositeFailure::EncodeFailure) => "composite_error.encode_failure",
            Self::Timeout => "timeout",
            Self::InternalError => "internal_error",
        }
    }

    const ALL: [FailureKind; 10] = [
        Self::Overloaded,
        Self::Fetch(FetchFailure::Oversized),
        Self::Fetch(FetchFailure::Timeout),
        Self::Fetch(FetchFailure::Unreachable),
        Self::Fetch(FetchFailure::Empty),
        Self::InvalidTrack,
        Self::Composite(CompositeFailure::UnreadableTrack),
        Self::Composite(CompositeFailure::EncodeFailure),
        Self::Timeout,
        Self::InternalError,
    ];

    /// Whether retrying the same request later may succeed.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Overloaded | Self::Timeout | Self::Fetch(FetchFailure::Timeout)
        )
    }
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.code() == s)
            .ok_or_else(|| format!("unknown failure kind: {s}"))
    }
}

impl Serialize for FailureKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for FailureKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
