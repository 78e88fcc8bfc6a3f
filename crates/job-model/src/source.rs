//! Media source references.
//!
//! The pipeline does not know which provider produced an asset. It only
//! distinguishes assets that must be downloaded from ones already on disk.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

/// Where a media asset's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaSource {
    /// An `http`/`https` locator, streamed to scratch storage.
    Remote(String),
    /// A file already readable by this process.
    Local(PathBuf),
}

/// Which role an asset plays in the assembled output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Visual,
    Audio,
}

/// Errors raised while interpreting a source reference.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("empty source reference")]
    Empty,

    #[error("unsupported source scheme: {scheme}")]
    UnsupportedScheme { scheme: String },

    #[error("invalid source url: {message}")]
    InvalidUrl { message: String },
}

impl MediaSource {
    /// Interpret a reference string: `http(s)://` is remote, `file://` and
    /// bare paths are local.
    pub fn parse(reference: &str) -> Result<Self, SourceError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(SourceError::Empty);
        }

        if !reference.contains("://") {
            return Ok(Self::Local(PathBuf::from(reference)));
        }

        let url = Url::parse(reference).map_err(|e| SourceError::InvalidUrl {
            message: e.to_string(),
        })?;
        match url.scheme() {
            "http" | "https" => Ok(Self::Remote(url.to_string())),
            "file" => url
                .to_file_path()
                .map(Self::Local)
                .map_err(|_| SourceError::InvalidUrl {
                    message: "file url does not name a local path".to_string(),
                }),
            other => Err(SourceError::UnsupportedScheme {
                scheme: other.to_string(),
            }),
        }
    }

    /// A form safe to log or show to callers: no credentials, query or
    /// fragment for remote sources, and only the file name for local ones.
    pub fn redacted(&self) -> String {
        match self {
            Self::Remote(raw) => match Url::parse(raw) {
                Ok(mut url) => {
                    url.set_username("").ok();
                    url.set_password(None).ok();
                    url.set_query(None);
                    url.set_fragment(None);
                    url.to_string()
                }
                Err(_) => "<remote>".to_string(),
            },
            Self::Local(path) => path
                .file_name()
                .map(|name| format!("local:{}", name.to_string_lossy()))
                .unwrap_or_else(|| "local:<unnamed>".to_string()),
        }
    }
}

impl FromStr for MediaSource {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl TrackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Visual => "visual",
            Self::Audio => "audio",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
