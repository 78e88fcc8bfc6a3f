//! Reelsmith Pipeline
//!
//! Admission control, job-scoped scratch storage and the stage machine that
//! turns a [`reelsmith_job_model::JobRequest`] into a finished video.

pub mod guard;
pub mod orchestrator;
pub mod scratch;

pub use guard::{
    sampler_for, FixedMemorySampler, Lease, MemorySampler, ProcessMemorySampler, Rejected,
    ResourceGuard, SystemMemorySampler,
};
pub use orchestrator::{JobOutput, JobReport, JobSummary, Orchestrator, OutputSummary};
pub use scratch::{ScratchDir, ScratchError, ScratchRegistry};
