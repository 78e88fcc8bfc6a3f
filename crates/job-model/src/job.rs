//! Job records and stage transitions.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::failure::JobFailure;
use crate::output::OutputFormat;
use crate::source::MediaSource;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

/// What the caller asks the pipeline to assemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Animation, stock footage or avatar clip.
    pub visual: MediaSource,

    /// Synthesized voice track.
    pub audio: MediaSource,

    /// Text burned over the video for its full duration.
    #[serde(default)]
    pub subtitle: Option<String>,

    /// Output container.
    #[serde(default)]
    pub format: OutputFormat,

    /// Per-job cap on output length.
    #[serde(default)]
    pub max_duration_secs: Option<f64>,
}

/// Position of a job in the assembly state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Admitted,
    Fetching,
    Reconciling,
    Compositing,
    Finalizing,
    Succeeded,
    Failed,
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobResult {
    Succeeded { output: PathBuf },
    Failed(JobFailure),
}

/// When a job entered a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTransition {
    pub stage: JobStage,
    pub at: DateTime<Utc>,
}

/// A single assembly request and its progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub request: JobRequest,
    pub created_at: DateTime<Utc>,
    pub stage: JobStage,
    pub history: Vec<StageTransition>,
    pub result: Option<JobResult>,
}

/// Illegal state machine use.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobModelError {
    #[error("invalid stage transition {from} -> {to}")]
    InvalidTransition { from: JobStage, to: JobStage },
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl JobRequest {
    pub fn new(visual: MediaSource, audio: MediaSource) -> Self {
        Self {
            visual,
            audio,
            subtitle: None,
            format: OutputFormat::default(),
            max_duration_secs: None,
        }
    }

    pub fn with_subtitle(mut self, text: impl Into<String>) -> Self {
        self.subtitle = Some(text.into());
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_max_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = Some(secs);
        self
    }

    /// Subtitle text, if any non-whitespace text was supplied.
    pub fn subtitle_text(&self) -> Option<&str> {
        self.subtitle
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }

    /// Parse a JSON array of requests.
    pub fn batch_from_json(json: &str) -> Result<Vec<Self>, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl JobStage {
    fn ordinal(self) -> u8 {
        match self {
            Self::Admitted => 0,
            Self::Fetching => 1,
            Self::Reconciling => 2,
            Self::Compositing => 3,
            Self::Finalizing => 4,
            Self::Succeeded => 5,
            Self::Failed => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admitted => "admitted",
            Self::Fetching => "fetching",
            Self::Reconciling => "reconciling",
            Self::Compositing => "compositing",
            Self::Finalizing => "finalizing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Job {
    /// Record a newly accepted request.
    pub fn new(request: JobRequest) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            request,
            created_at: now,
            stage: JobStage::Admitted,
            history: vec![StageTransition {
                stage: JobStage::Admitted,
                at: now,
            }],
            result: None,
        }
    }

    /// Move to the next non-terminal stage. Stages cannot be skipped or revisited.
    pub fn advance(&mut self, next: JobStage) -> Result<(), JobModelError> {
        if next.is_terminal() || next.ordinal() != self.stage.ordinal() + 1 {
            return Err(JobModelError::InvalidTransition {
                from: self.stage,
                to: next,
            });
        }
        self.enter(next);
        Ok(())
    }

    /// Finish successfully. Only legal from `Finalizing`.
    pub fn succeed(&mut self, output: PathBuf) -> Result<(), JobModelError> {
        if self.stage != JobStage::Finalizing {
            return Err(JobModelError::InvalidTransition {
                from: self.stage,
                to: JobStage::Succeeded,
            });
        }
        self.enter(JobStage::Succeeded);
        self.result = Some(JobResult::Succeeded { output });
        Ok(())
    }

    /// Finish with a failure from any non-terminal stage.
    pub fn fail(&mut self, failure: JobFailure) -> Result<(), JobModelError> {
        if self.stage.is_terminal() {
            return Err(JobModelError::InvalidTransition {
                from: self.stage,
                to: JobStage::Failed,
            });
        }
        self.enter(JobStage::Failed);
        self.result = Some(JobResult::Failed(failure));
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match &self.result {
            Some(JobResult::Failed(failure)) => Some(failure),
            _ => None,
        }
    }

    /// Stages visited so far, in order.
    pub fn stages(&self) -> Vec<JobStage> {
        self.history.iter().map(|t| t.stage).collect()
    }

    fn enter(&mut self, stage: JobStage) {
        self.stage = stage;
        self.history.push(StageTransition {
            stage,
            at: Utc::now(),
        });
    }
}
