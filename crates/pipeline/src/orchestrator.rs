//! Job orchestration.
//!
//! One [`Orchestrator`] is built at process start and shared by every job.
//! A job walks `Admitted -> Fetching -> Reconciling -> Compositing ->
//! Finalizing` and ends `Succeeded` or `Failed`. Its lease, worker slot and
//! scratch directory are scoped values, so every exit path (failure,
//! timeout, panic, shutdown) releases them.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use reelsmith_asset_fetch::{AssetFetcher, FetchError, LocalAsset};
use reelsmith_common::clock::{JobClock, StageTimer};
use reelsmith_common::config::{AdmissionPolicy, AppConfig};
use reelsmith_common::error::ReelResult;
use reelsmith_common::scratch::ScratchArea;
use reelsmith_job_model::{
    FailureKind, Job, JobFailure, JobRequest, JobResult, JobStage, MediaSource, OutputFormat,
    TrackKind,
};
use reelsmith_processing_core::Reconciler;
use reelsmith_render_engine::{
    CompositeError, CompositionJob, Compositor, MediaBackend, MediaTrack, MemoryPressure,
    OutputAsset,
};
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::guard::{sampler_for, Lease, MemorySampler, ResourceGuard};
use crate::scratch::{ScratchDir, ScratchRegistry};

/// How often a queued job re-checks the memory ceiling.
const QUEUE_POLL: Duration = Duration::from_millis(250);

/// Runs assembly jobs against shared limits.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<AppConfig>,
    guard: Arc<ResourceGuard>,
    scratch: ScratchRegistry,
    fetcher: AssetFetcher,
    compositor: Compositor,
    reconciler: Reconciler,
    slots: Arc<Semaphore>,
    shutdown: CancellationToken,
}

/// A finished job and, on success, its output.
pub struct JobReport {
    pub job: Job,
    pub output: Option<JobOutput>,
    pub elapsed_ms: u64,
}

/// The encoded output of a successful job.
///
/// Owns the job's scratch directory: dropping it deletes the file unless it
/// was moved out with [`JobOutput::persist`].
pub struct JobOutput {
    asset: OutputAsset,
    scratch: ScratchDir,
}

/// Serializable view of a [`JobReport`].
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: String,
    pub stage: JobStage,
    pub stages: Vec<JobStage>,
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputSummary>,
    /// Set when the job succeeded but its output could not be delivered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_error: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputSummary {
    pub path: PathBuf,
    pub format: OutputFormat,
    pub duration_secs: f64,
    pub bytes: u64,
    pub degraded: bool,
}

enum Outcome {
    Done(OutputAsset),
    Failed(JobFailure),
    Panicked,
    TimedOut,
    Shutdown,
}

impl Orchestrator {
    /// Build an orchestrator sampling memory from the configured source.
    pub fn new(config: AppConfig, backend: Arc<dyn MediaBackend>) -> ReelResult<Self> {
        let sampler = sampler_for(config.limits.memory_source);
        Self::with_sampler(config, backend, sampler)
    }

    pub fn with_sampler(
        config: AppConfig,
        backend: Arc<dyn MediaBackend>,
        sampler: Arc<dyn MemorySampler>,
    ) -> ReelResult<Self> {
        config.validate()?;

        let fetcher = AssetFetcher::new(config.fetch.clone())?;
        let guard = Arc::new(ResourceGuard::from_config(&config.limits, sampler));
        let compositor = Compositor::new(backend, config.render.clone());

        tracing::info!(
            backend = compositor.backend().name(),
            sampler = guard.sampler_name(),
            worker_slots = config.limits.worker_slots,
            ceiling_mib = config.limits.memory_ceiling_bytes / (1024 * 1024),
            admission = ?config.limits.admission,
            scratch = %config.scratch_dir.display(),
            "Orchestrator ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                scratch: ScratchRegistry::new(config.scratch_dir.clone()),
                reconciler: Reconciler::from_config(&config.reconcile),
                slots: Arc::new(Semaphore::new(config.limits.worker_slots)),
                shutdown: CancellationToken::new(),
                config: Arc::new(config),
                guard,
                fetcher,
                compositor,
            }),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn guard(&self) -> &Arc<ResourceGuard> {
        &self.inner.guard
    }

    pub fn scratch(&self) -> &ScratchRegistry {
        &self.inner.scratch
    }

    /// Run one job to a terminal state. Never retries.
    pub async fn run(&self, request: JobRequest) -> JobReport {
        let mut job = Job::new(request);
        let clock = JobClock::start(self.inner.config.limits.job_timeout());
        let mut timer = StageTimer::new();
        timer.enter(JobStage::Admitted.as_str());

        tracing::info!(
            job_id = %job.id,
            visual = %job.request.visual,
            audio = %job.request.audio,
            format = %job.request.format,
            subtitle = job.request.subtitle_text().is_some(),
            started_at = %clock.started_at().to_rfc3339(),
            budget_secs = clock.budget().as_secs(),
            "Job received"
        );

        let (permit, lease) = match self.admit(&clock).await {
            Ok(admitted) => admitted,
            Err(failure) => return self.conclude_failed(job, failure, &clock, timer),
        };

        let scratch = match self.inner.scratch.create(job.id) {
            Ok(scratch) => scratch,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Scratch creation failed");
                let failure =
                    JobFailure::new(FailureKind::InternalError, "scratch storage unavailable");
                return self.conclude_failed(job, failure, &clock, timer);
            }
        };

        let cancel = self.inner.shutdown.child_token();
        let outcome = {
            let stages =
                AssertUnwindSafe(self.run_stages(&mut job, &scratch, &cancel, &mut timer))
                    .catch_unwind();
            tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => Outcome::Shutdown,
                result = tokio::time::timeout(clock.remaining(), stages) => match result {
                    Ok(Ok(Ok(asset))) => Outcome::Done(asset),
                    Ok(Ok(Err(failure))) => Outcome::Failed(failure),
                    Ok(Err(_)) => Outcome::Panicked,
                    Err(_) => Outcome::TimedOut,
                },
            }
        };
        cancel.cancel();

        let report = match outcome {
            Outcome::Done(asset) => {
                let path = asset.path.clone();
                match job.succeed(path) {
                    Ok(()) => {
                        scratch.mark_finished();
                        let output = JobOutput { asset, scratch };
                        self.conclude(job, Some(output), &clock, timer)
                    }
                    Err(e) => {
                        let failure = JobFailure::new(FailureKind::InternalError, e.to_string());
                        drop(scratch);
                        self.conclude_failed(job, failure, &clock, timer)
                    }
                }
            }
            other => {
                let failure = match other {
                    Outcome::Failed(failure) => failure,
                    Outcome::Panicked => {
                        tracing::error!(job_id = %job.id, stage = %job.stage, "Job panicked");
                        JobFailure::new(FailureKind::InternalError, "unexpected internal failure")
                    }
                    Outcome::TimedOut => JobFailure::new(
                        FailureKind::Timeout,
                        format!(
                            "job exceeded its {}s budget during {}",
                            clock.budget().as_secs(),
                            job.stage
                        ),
                    ),
                    Outcome::Shutdown | Outcome::Done(_) => {
                        JobFailure::new(FailureKind::Overloaded, "pipeline is shutting down")
                    }
                };
                drop(scratch);
                self.conclude_failed(job, failure, &clock, timer)
            }
        };

        drop(lease);
        drop(permit);
        report
    }

    /// Run every request concurrently. Reports come back in input order.
    pub async fn run_batch(&self, requests: Vec<JobRequest>) -> Vec<JobReport> {
        let handles: Vec<(JobRequest, JoinHandle<JobReport>)> = requests
            .into_iter()
            .map(|request| {
                let orchestrator = self.clone();
                let submitted = request.clone();
                let handle = tokio::spawn(async move { orchestrator.run(request).await });
                (submitted, handle)
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (request, handle) in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::error!(error = %e, "Job task aborted");
                    let mut job = Job::new(request);
                    let _ = job.fail(JobFailure::new(
                        FailureKind::InternalError,
                        "job task aborted",
                    ));
                    reports.push(JobReport {
                        job,
                        output: None,
                        elapsed_ms: 0,
                    });
                }
            }
        }
        reports
    }

    /// Periodically delete scratch of finished jobs past the retention window.
    /// Stops on [`Orchestrator::shutdown`].
    pub fn spawn_retention_sweeper(&self) -> JoinHandle<()> {
        let limits = &self.inner.config.limits;
        let retention = limits.retention();
        let period = limits.sweep_interval().max(Duration::from_secs(1));
        let scratch = self.inner.scratch.clone();
        let shutdown = self.inner.shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = scratch.sweep(retention);
                        if removed > 0 {
                            tracing::info!(removed, "Retention sweep deleted scratch");
                        }
                    }
                }
            }
            tracing::debug!("Retention sweeper stopped");
        })
    }

    /// Stop admitting jobs, abort running ones and delete all scratch.
    pub fn shutdown(&self) -> usize {
        self.inner.shutdown.cancel();
        self.inner.slots.close();
        let removed = self.inner.scratch.shutdown();
        tracing::info!(removed, "Orchestrator shut down");
        removed
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    async fn admit(
        &self,
        clock: &JobClock,
    ) -> Result<(OwnedSemaphorePermit, Lease), JobFailure> {
        let inner = &self.inner;
        let limits = &inner.config.limits;
        if inner.shutdown.is_cancelled() {
            return Err(shutting_down());
        }

        match limits.admission {
            AdmissionPolicy::Reject => {
                let permit = inner.slots.clone().try_acquire_owned().map_err(|_| {
                    JobFailure::new(
                        FailureKind::Overloaded,
                        format!("all {} worker slots are busy", limits.worker_slots),
                    )
                })?;
                let lease = inner
                    .guard
                    .reserve(limits.job_memory_estimate_bytes)
                    .map_err(|rejected| {
                        JobFailure::new(FailureKind::Overloaded, rejected.to_string())
                    })?;
                Ok((permit, lease))
            }
            AdmissionPolicy::Queue => {
                let deadline = tokio::time::Instant::from_std(clock.deadline());
                let permit = tokio::select! {
                    _ = inner.shutdown.cancelled() => return Err(shutting_down()),
                    acquired = tokio::time::timeout_at(deadline, inner.slots.clone().acquire_owned()) => {
                        match acquired {
                            Ok(Ok(permit)) => permit,
                            Ok(Err(_)) => return Err(shutting_down()),
                            Err(_) => {
                                return Err(JobFailure::new(
                                    FailureKind::Timeout,
                                    "job budget ran out while queued for a worker slot",
                                ))
                            }
                        }
                    }
                };

                loop {
                    match inner.guard.reserve(limits.job_memory_estimate_bytes) {
                        Ok(lease) => return Ok((permit, lease)),
                        Err(rejected) if clock.remaining() <= QUEUE_POLL => {
                            return Err(JobFailure::new(
                                FailureKind::Overloaded,
                                rejected.to_string(),
                            ));
                        }
                        Err(_) => {
                            tokio::select! {
                                _ = inner.shutdown.cancelled() => return Err(shutting_down()),
                                _ = tokio::time::sleep(QUEUE_POLL) => {}
                            }
                        }
                    }
                }
            }
        }
    }

    async fn run_stages(
        &self,
        job: &mut Job,
        scratch: &ScratchDir,
        cancel: &CancellationToken,
        timer: &mut StageTimer,
    ) -> Result<OutputAsset, JobFailure> {
        let inner = &self.inner;
        let request = job.request.clone();

        enter(job, timer, JobStage::Fetching)?;
        let (visual, audio) = tokio::try_join!(
            self.fetch(&request.visual, TrackKind::Visual, scratch),
            self.fetch(&request.audio, TrackKind::Audio, scratch),
        )?;

        enter(job, timer, JobStage::Reconciling)?;
        let (visual_track, audio_track) = tokio::try_join!(
            self.open_track(&visual),
            self.open_track(&audio),
        )?;
        let plan = inner
            .reconciler
            .reconcile(
                visual_track.duration_secs,
                audio_track.duration_secs,
                request.max_duration_secs,
            )
            .map_err(|e| JobFailure::new(FailureKind::InvalidTrack, e.to_string()))?;

        enter(job, timer, JobStage::Compositing)?;
        let pressure = inner.guard.pressure();
        if pressure == MemoryPressure::High {
            tracing::warn!(
                job_id = %job.id,
                usage = inner.guard.current_usage_ratio(),
                "Memory pressure high, using degraded encoding profile"
            );
        }
        let output = inner
            .compositor
            .compose(
                CompositionJob {
                    visual: &visual_track,
                    audio: &audio_track,
                    plan: &plan,
                    subtitle: request.subtitle_text(),
                    format: request.format,
                    pressure,
                },
                scratch,
                cancel,
                None,
            )
            .await
            .map_err(composite_failure)?;

        enter(job, timer, JobStage::Finalizing)?;
        scratch.discard(&visual.path);
        scratch.discard(&audio.path);
        Ok(output)
    }

    async fn fetch(
        &self,
        source: &MediaSource,
        kind: TrackKind,
        scratch: &ScratchDir,
    ) -> Result<LocalAsset, JobFailure> {
        self.inner
            .fetcher
            .fetch(source, kind, scratch)
            .await
            .map_err(|e| fetch_failure(kind, e))
    }

    async fn open_track(&self, asset: &LocalAsset) -> Result<MediaTrack, JobFailure> {
        self.inner
            .compositor
            .open_track(asset.kind, &asset.path)
            .await
            .map_err(composite_failure)
    }

    fn conclude_failed(
        &self,
        mut job: Job,
        failure: JobFailure,
        clock: &JobClock,
        timer: StageTimer,
    ) -> JobReport {
        if let Err(e) = job.fail(failure) {
            tracing::error!(job_id = %job.id, error = %e, "Job already terminal");
        }
        self.conclude(job, None, clock, timer)
    }

    fn conclude(
        &self,
        job: Job,
        output: Option<JobOutput>,
        clock: &JobClock,
        mut timer: StageTimer,
    ) -> JobReport {
        timer.finish();
        let elapsed_ms = clock.elapsed_ms();
        for (stage, took) in timer.stages() {
            tracing::debug!(job_id = %job.id, stage, took_ms = took.as_millis() as u64, "Stage timing");
        }

        match job.failure() {
            Some(failure) => tracing::warn!(
                job_id = %job.id,
                kind = %failure.kind,
                message = %failure.message,
                elapsed_ms,
                "Job failed"
            ),
            None => tracing::info!(
                job_id = %job.id,
                elapsed_ms,
                degraded = output.as_ref().is_some_and(|o| o.degraded()),
                "Job succeeded"
            ),
        }

        JobReport {
            job,
            output,
            elapsed_ms,
        }
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("guard", &self.inner.guard)
            .field("compositor", &self.inner.compositor)
            .field("live_jobs", &self.inner.scratch.live_jobs())
            .finish()
    }
}

fn enter(job: &mut Job, timer: &mut StageTimer, stage: JobStage) -> Result<(), JobFailure> {
    job.advance(stage)
        .map_err(|e| JobFailure::new(FailureKind::InternalError, e.to_string()))?;
    timer.enter(stage.as_str());
    tracing::info!(job_id = %job.id, %stage, "Stage entered");
    Ok(())
}

fn fetch_failure(kind: TrackKind, err: FetchError) -> JobFailure {
    match err.failure() {
        Some(failure) => JobFailure::new(FailureKind::Fetch(failure), format!("{kind} asset: {err}")),
        None => {
            tracing::error!(%kind, error = %err, "Asset could not be stored");
            JobFailure::new(
                FailureKind::InternalError,
                format!("{kind} asset could not be stored"),
            )
        }
    }
}

fn composite_failure(err: CompositeError) -> JobFailure {
    let kind = err.failure_kind();
    if kind == FailureKind::InternalError {
        tracing::error!(error = %err, "Compositor internal failure");
        return JobFailure::new(kind, "compositing could not run");
    }
    JobFailure::new(kind, err.to_string())
}

fn shutting_down() -> JobFailure {
    JobFailure::new(FailureKind::Overloaded, "pipeline is shutting down")
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.job.stage == JobStage::Succeeded
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        self.job.failure()
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.job.id.to_string(),
            stage: self.job.stage,
            stages: self.job.stages(),
            result: self.job.result.clone(),
            output: self.output.as_ref().map(|output| OutputSummary {
                path: output.path().to_path_buf(),
                format: output.format(),
                duration_secs: output.duration_secs(),
                bytes: output.bytes(),
                degraded: output.degraded(),
            }),
            delivery_error: None,
            elapsed_ms: self.elapsed_ms,
        }
    }

    /// Move the output, if any, to `<dir>/<job id>.<ext>` and summarize.
    ///
    /// A failed move is recorded in the summary instead of returned, and the
    /// undeliverable output is released with the job's scratch.
    pub fn deliver_into(&mut self, dir: &Path) -> JobSummary {
        let mut summary = self.summary();
        let Some(output) = self.output.take() else {
            return summary;
        };

        let dest = dir.join(format!("{}.{}", self.job.id, output.format().extension()));
        match output.persist(&dest) {
            Ok(saved) => {
                if let Some(out) = summary.output.as_mut() {
                    out.path = saved;
                }
            }
            Err(e) => {
                tracing::error!(job_id = %self.job.id, error = %e, "Output delivery failed");
                summary.output = None;
                summary.delivery_error = Some(format!("could not save output: {e}"));
            }
        }
        summary
    }
}

impl fmt::Debug for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobReport")
            .field("job_id", &self.job.id)
            .field("stage", &self.job.stage)
            .field("result", &self.job.result)
            .field("elapsed_ms", &self.elapsed_ms)
            .finish()
    }
}

impl JobOutput {
    pub fn path(&self) -> &Path {
        &self.asset.path
    }

    pub fn format(&self) -> OutputFormat {
        self.asset.format
    }

    pub fn duration_secs(&self) -> f64 {
        self.asset.duration_secs
    }

    pub fn bytes(&self) -> u64 {
        self.asset.bytes
    }

    pub fn degraded(&self) -> bool {
        self.asset.degraded
    }

    /// Move the output to `dest` and release the job's scratch.
    pub fn persist(self, dest: impl AsRef<Path>) -> ReelResult<PathBuf> {
        let dest = dest.as_ref();
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        // Rename fails across filesystems; fall back to a copy.
        if std::fs::rename(&self.asset.path, dest).is_err() {
            std::fs::copy(&self.asset.path, dest)?;
        }
        self.scratch.discard(&self.asset.path);
        tracing::info!(job_id = %self.scratch.job_id(), dest = %dest.display(), "Output persisted");
        Ok(dest.to_path_buf())
    }
}

impl fmt::Debug for JobOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobOutput")
            .field("job_id", &self.scratch.job_id())
            .field("asset", &self.asset)
            .finish()
    }
}
