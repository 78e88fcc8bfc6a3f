//! Job clock and wall-clock budgets.
//!
//! Every job is anchored to a monotonic instant taken at admission. The
//! clock answers "how long has this job run" for stage timing logs, and
//! "how much of its budget is left" for the overall job timeout.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// A job clock with a fixed wall-clock budget.
#[derive(Debug, Clone)]
pub struct JobClock {
    /// The instant the job was admitted.
    epoch: Instant,

    /// Wall-clock time at admission.
    epoch_wall: DateTime<Utc>,

    /// Total time the job may run.
    budget: Duration,
}

impl JobClock {
    /// Start a clock anchored to now with the given budget.
    pub fn start(budget: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: Utc::now(),
            budget,
        }
    }

    /// Time elapsed since admission.
    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Milliseconds elapsed since admission.
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    /// Budget left, saturating at zero.
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    /// Whether the budget is spent.
    pub fn expired(&self) -> bool {
        self.elapsed() >= self.budget
    }

    /// Instant at which the budget runs out.
    pub fn deadline(&self) -> Instant {
        self.epoch + self.budget
    }

    /// Wall-clock time at admission.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.epoch_wall
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }
}

/// Tracks how long each stage of a job took.
#[derive(Debug, Default)]
pub struct StageTimer {
    current: Option<(&'static str, Instant)>,
    finished: Vec<(&'static str, Duration)>,
}

impl StageTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the running stage (if any) and start timing `stage`.
    pub fn enter(&mut self, stage: &'static str) {
        self.finish();
        self.current = Some((stage, Instant::now()));
    }

    /// Close the running stage.
    pub fn finish(&mut self) {
        if let Some((name, started)) = self.current.take() {
            self.finished.push((name, started.elapsed()));
        }
    }

    /// Completed stages in the order they ran.
    pub fn stages(&self) -> &[(&'static str, Duration)] {
        &self.finished
    }
}
