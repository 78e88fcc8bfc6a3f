//! Output container and geometry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Output video format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    #[default]
    #[serde(rename = "mp4-h264")]
    Mp4H264,
    #[serde(rename = "mp4-h265")]
    Mp4H265,
    #[serde(rename = "webm")]
    Webm,
}

/// Everything the encoder needs to know about the finished file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Output container and codecs.
    pub format: OutputFormat,

    /// Output resolution (width x height in pixels).
    pub width: u32,
    pub height: u32,

    /// Output frame rate.
    pub fps: u32,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [Self::Mp4H264, Self::Mp4H265, Self::Webm];

    /// File extension for the container.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4H264 | Self::Mp4H265 => "mp4",
            Self::Webm => "webm",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mp4H264 => "mp4-h264",
            Self::Mp4H265 => "mp4-h265",
            Self::Webm => "webm",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|format| format.as_str() == s)
            .ok_or_else(|| format!("Unknown format: {s}. Use: mp4-h264, mp4-h265, webm"))
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OutputSpec {
    /// File name of the encoded output inside the job's scratch directory.
    pub fn file_name(&self) -> String {
        format!("output.{}", self.format.extension())
    }
}
