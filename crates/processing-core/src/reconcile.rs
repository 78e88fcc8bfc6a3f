//! Duration reconciliation.
//!
//! Given the durations of a visual and an audio track, decide how long the
//! assembled output runs and which interval of each track plays. The shorter
//! track (after an optional cap) sets the output duration; the longer one is
//! cut from its start. Tracks within `epsilon` of the output duration are
//! left whole so floating-point noise never trims a few samples off a track.

use reelsmith_common::config::ReconcileConfig;
use reelsmith_job_model::{TrackKind, TrimInterval, TrimPlan};

/// Comparison tolerance: one hundredth of a second.
pub const DEFAULT_EPSILON_SECS: f64 = 0.01;

/// Reconciliation failures. Both mean there is no meaningful output.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum ReconcileError {
    #[error("{track} track has no playable duration ({duration_secs}s)")]
    InvalidTrack {
        track: TrackKind,
        duration_secs: f64,
    },

    #[error("duration cap must be positive ({cap_secs}s)")]
    InvalidCap { cap_secs: f64 },
}

/// Duration reconciler with a fixed tolerance and optional global cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reconciler {
    epsilon_secs: f64,
    max_duration_secs: Option<f64>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self {
            epsilon_secs: DEFAULT_EPSILON_SECS,
            max_duration_secs: None,
        }
    }
}

impl Reconciler {
    pub fn new(epsilon_secs: f64, max_duration_secs: Option<f64>) -> Self {
        Self {
            epsilon_secs: if epsilon_secs.is_finite() && epsilon_secs > 0.0 {
                epsilon_secs
            } else {
                DEFAULT_EPSILON_SECS
            },
            max_duration_secs,
        }
    }

    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self::new(config.epsilon_secs, config.max_duration_secs)
    }

    pub fn epsilon_secs(&self) -> f64 {
        self.epsilon_secs
    }

    /// Compute the trim plan for one pair of tracks.
    ///
    /// `cap_secs` is the per-job cap; the tighter of it and the global cap
    /// applies.
    pub fn reconcile(
        &self,
        visual_secs: f64,
        audio_secs: f64,
        cap_secs: Option<f64>,
    ) -> Result<TrimPlan, ReconcileError> {
        check_track(TrackKind::Visual, visual_secs)?;
        check_track(TrackKind::Audio, audio_secs)?;

        let cap = match (cap_secs, self.max_duration_secs) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if let Some(cap_secs) = cap {
            if !(cap_secs.is_finite() && cap_secs > 0.0) {
                return Err(ReconcileError::InvalidCap { cap_secs });
            }
        }

        let mut common = visual_secs.min(audio_secs);
        if let Some(cap_secs) = cap {
            common = common.min(cap_secs);
        }

        let plan = TrimPlan {
            visual: TrimInterval::from_start(self.playable_end(visual_secs, common, cap)),
            audio: TrimInterval::from_start(self.playable_end(audio_secs, common, cap)),
            visual_source_secs: visual_secs,
            audio_source_secs: audio_secs,
        };

        tracing::debug!(
            visual_secs,
            audio_secs,
            ?cap,
            output_secs = plan.output_duration_secs(),
            trims_visual = plan.trims_visual(),
            trims_audio = plan.trims_audio(),
            "Reconciled track durations"
        );

        Ok(plan)
    }

    /// End point for a track given the common duration. A track longer than
    /// the common duration by more than epsilon is cut to it; a hard cap is
    /// never exceeded.
    fn playable_end(&self, source_secs: f64, common_secs: f64, cap: Option<f64>) -> f64 {
        let end = if source_secs > common_secs + self.epsilon_secs {
            common_secs
        } else {
            source_secs
        };
        match cap {
            Some(cap_secs) => end.min(cap_secs),
            None => end,
        }
    }
}

/// Reconcile with the default tolerance and no global cap.
pub fn reconcile(
    visual_secs: f64,
    audio_secs: f64,
    cap_secs: Option<f64>,
) -> Result<TrimPlan, ReconcileError> {
    Reconciler::default().reconcile(visual_secs, audio_secs, cap_secs)
}

fn check_track(track: TrackKind, duration_secs: f64) -> Result<(), ReconcileError> {
    if duration_secs.is_finite() && duration_secs > 0.0 {
        Ok(())
    } else {
        Err(ReconcileError::InvalidTrack {
            track,
            duration_secs,
        })
    }
}
