//! Trim plans produced by duration reconciliation.

use serde::{Deserialize, Serialize};

/// A playable interval of one track, in seconds from the track's own zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrimInterval {
    pub start_secs: f64,
    pub end_secs: f64,
}

/// The interval to keep from each track so both play for the same duration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrimPlan {
    pub visual: TrimInterval,
    pub audio: TrimInterval,

    /// Source durations the plan was computed from.
    pub visual_source_secs: f64,
    pub audio_source_secs: f64,
}

impl TrimInterval {
    /// Interval covering `[0, end_secs]`.
    pub fn from_start(end_secs: f64) -> Self {
        Self {
            start_secs: 0.0,
            end_secs,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.end_secs - self.start_secs
    }
}

impl TrimPlan {
    /// Length of the assembled output.
    pub fn output_duration_secs(&self) -> f64 {
        self.visual
            .duration_secs()
            .min(self.audio.duration_secs())
    }

    /// Whether the visual track loses any footage.
    pub fn trims_visual(&self) -> bool {
        self.visual.start_secs > 0.0 || self.visual.end_secs < self.visual_source_secs
    }

    /// Whether the audio track loses any samples.
    pub fn trims_audio(&self) -> bool {
        self.audio.start_secs > 0.0 || self.audio.end_secs < self.audio_source_secs
    }

    pub fn is_trimmed(&self) -> bool {
        self.trims_visual() || self.trims_audio()
    }
}
