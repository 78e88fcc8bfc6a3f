use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reelsmith_common::config::{AdmissionPolicy, AppConfig};
use reelsmith_job_model::{
    CompositeFailure, FailureKind, FetchFailure, JobRequest, JobStage, MediaSource, TrackKind,
};
use reelsmith_pipeline::{FixedMemorySampler, Orchestrator};
use reelsmith_render_engine::{
    CompositeError, EncodeRequest, MediaBackend, MediaTrack, ProgressCallback,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const MIB: u64 = 1024 * 1024;

/// Backend whose tracks are text files holding their duration.
#[derive(Default)]
struct FakeBackend {
    encode_delay: Duration,
    panic_on_encode: bool,
    encodes: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    aborted: Arc<AtomicUsize>,
    last_args: Mutex<Vec<String>>,
}

struct AbortGuard {
    aborted: Arc<AtomicUsize>,
    finished: bool,
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.aborted.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl MediaBackend for FakeBackend {
    async fn probe(&self, kind: TrackKind, path: &Path) -> Result<MediaTrack, CompositeError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CompositeError::unreadable(kind, e.to_string()))?;
        let duration_secs = match text.trim() {
            "none" => {
                return Err(CompositeError::InvalidDuration {
                    track: kind,
                    message: "container declares no duration".to_string(),
                });
            }
            raw => raw
                .parse::<f64>()
                .map_err(|_| CompositeError::unreadable(kind, "not a media file"))?,
        };
        Ok(MediaTrack {
            kind,
            path: path.to_path_buf(),
            duration_secs,
            format_name: "fake".to_string(),
            has_video: kind == TrackKind::Visual,
            has_audio: true,
        })
    }

    async fn encode(
        &self,
        request: &EncodeRequest,
        cancel: &CancellationToken,
        _progress: Option<&ProgressCallback>,
    ) -> Result<(), CompositeError> {
        self.encodes.fetch_add(1, Ordering::SeqCst);
        *self.last_args.lock().unwrap() = request.args.clone();
        if self.panic_on_encode {
            panic!("fake encoder crashed");
        }

        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        let mut probe = AbortGuard {
            aborted: self.aborted.clone(),
            finished: false,
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(CompositeError::Cancelled),
            _ = tokio::time::sleep(self.encode_delay) => {
                tokio::fs::write(&request.output, b"encoded").await?;
                Ok(())
            }
        };

        probe.finished = true;
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "fake"
    }
}

struct Harness {
    orchestrator: Orchestrator,
    backend: Arc<FakeBackend>,
    sampler: Arc<FixedMemorySampler>,
    inputs: tempfile::TempDir,
    _scratch_root: tempfile::TempDir,
}

impl Harness {
    fn new(backend: FakeBackend, tune: impl FnOnce(&mut AppConfig)) -> Self {
        let scratch_root = tempfile::tempdir().unwrap();
        let mut config = AppConfig {
            scratch_dir: scratch_root.path().to_path_buf(),
            ..AppConfig::default()
        };
        config.limits.memory_ceiling_bytes = 1024 * MIB;
        config.limits.job_memory_estimate_bytes = MIB;
        config.limits.job_timeout_secs = 10;
        tune(&mut config);

        let backend = Arc::new(backend);
        let sampler = Arc::new(FixedMemorySampler::new(0));
        let orchestrator =
            Orchestrator::with_sampler(config, backend.clone(), sampler.clone()).unwrap();

        Self {
            orchestrator,
            backend,
            sampler,
            inputs: tempfile::tempdir().unwrap(),
            _scratch_root: scratch_root,
        }
    }

    fn input(&self, name: &str, contents: &str) -> MediaSource {
        let path = self.inputs.path().join(name);
        std::fs::write(&path, contents).unwrap();
        MediaSource::Local(path)
    }

    fn request(&self, visual_secs: &str, audio_secs: &str) -> JobRequest {
        JobRequest::new(
            self.input("visual.mp4", visual_secs),
            self.input("voice.mp3", audio_secs),
        )
    }

    fn job_dirs_on_disk(&self) -> usize {
        std::fs::read_dir(self.orchestrator.scratch().root())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    fn assert_clean(&self) {
        assert_eq!(self.orchestrator.scratch().resource_count(), 0);
        assert_eq!(self.orchestrator.scratch().live_jobs(), 0);
        assert_eq!(self.job_dirs_on_disk(), 0);
        assert_eq!(self.orchestrator.guard().outstanding_leases(), 0);
        assert_eq!(self.orchestrator.guard().reserved_bytes(), 0);
    }
}

#[tokio::test]
async fn longer_visual_is_trimmed_to_audio() {
    let h = Harness::new(FakeBackend::default(), |_| {});
    let report = h.orchestrator.run(h.request("12.0", "8.0")).await;

    assert!(report.is_success(), "{report:?}");
    assert_eq!(
        report.job.stages(),
        vec![
            JobStage::Admitted,
            JobStage::Fetching,
            JobStage::Reconciling,
            JobStage::Compositing,
            JobStage::Finalizing,
            JobStage::Succeeded,
        ]
    );

    let output = report.output.as_ref().unwrap();
    assert!((output.duration_secs() - 8.0).abs() < 0.01);
    assert_eq!(std::fs::read(output.path()).unwrap(), b"encoded");

    let args = h.backend.last_args.lock().unwrap().clone();
    let durations: Vec<&str> = args
        .windows(2)
        .filter(|w| w[0] == "-t")
        .map(|w| w[1].as_str())
        .collect();
    assert_eq!(durations, vec!["8.000000", "8.000000", "8.000000"]);

    // Only the output remains until the caller lets go of it.
    assert_eq!(h.orchestrator.scratch().resource_count(), 2);
    assert_eq!(h.orchestrator.guard().outstanding_leases(), 0);
    drop(report);
    h.assert_clean();
}

#[tokio::test]
async fn equal_durations_are_not_trimmed() {
    let h = Harness::new(FakeBackend::default(), |_| {});
    let report = h.orchestrator.run(h.request("5.0", "5.0")).await;

    assert!(report.is_success());
    assert!((report.output.as_ref().unwrap().duration_secs() - 5.0).abs() < 0.01);
}

#[tokio::test]
async fn zero_length_audio_fails_before_compositing() {
    let h = Harness::new(FakeBackend::default(), |_| {});
    let report = h.orchestrator.run(h.request("5.0", "0.0")).await;

    assert_eq!(
        report.failure().map(|f| f.kind),
        Some(FailureKind::InvalidTrack)
    );
    assert_eq!(report.job.stage, JobStage::Failed);
    assert!(report.job.stages().contains(&JobStage::Reconciling));
    assert!(!report.job.stages().contains(&JobStage::Compositing));
    assert_eq!(h.backend.encodes.load(Ordering::SeqCst), 0);
    h.assert_clean();
}

#[tokio::test]
async fn memory_above_ceiling_is_overloaded() {
    let h = Harness::new(FakeBackend::default(), |_| {});
    h.sampler.set(2048 * MIB);

    let report = h.orchestrator.run(h.request("5.0", "5.0")).await;

    assert_eq!(report.failure().map(|f| f.kind), Some(FailureKind::Overloaded));
    assert_eq!(report.job.stages(), vec![JobStage::Admitted, JobStage::Failed]);
    assert_eq!(h.backend.encodes.load(Ordering::SeqCst), 0);
    h.assert_clean();
}

#[tokio::test]
async fn timeout_during_compositing_aborts_encode() {
    let h = Harness::new(
        FakeBackend {
            encode_delay: Duration::from_secs(30),
            ..FakeBackend::default()
        },
        |config| config.limits.job_timeout_secs = 1,
    );

    let started = Instant::now();
    let report = h.orchestrator.run(h.request("12.0", "8.0")).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    let failure = report.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert!(failure.message.contains("compositing"));
    assert_eq!(h.backend.aborted.load(Ordering::SeqCst), 1);
    h.assert_clean();
}

#[tokio::test]
async fn missing_source_is_fetch_failure() {
    let h = Harness::new(FakeBackend::default(), |_| {});
    let request = JobRequest::new(
        MediaSource::Local(PathBuf::from("/nonexistent/reelsmith/anim.mp4")),
        h.input("voice.mp3", "4.0"),
    );

    let report = h.orchestrator.run(request).await;

    let failure = report.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Fetch(FetchFailure::Unreachable));
    assert!(failure.message.starts_with("visual asset"));
    assert!(!failure.message.contains("nonexistent"));
    h.assert_clean();
}

#[tokio::test]
async fn directory_source_is_fetch_failure() {
    let h = Harness::new(FakeBackend::default(), |_| {});
    let dir = h.inputs.path().join("clips");
    std::fs::create_dir(&dir).unwrap();
    let request = JobRequest::new(MediaSource::Local(dir), h.input("voice.mp3", "4.0"));

    let report = h.orchestrator.run(request).await;

    assert_eq!(
        report.failure().map(|f| f.kind),
        Some(FailureKind::Fetch(FetchFailure::Unreachable))
    );
    h.assert_clean();
}

/// Accept one connection and answer only after `delay`.
async fn slow_remote(delay: Duration) -> MediaSource {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;
            tokio::time::sleep(delay).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\nConnection: close\r\n\r\n4.0")
                .await;
        }
    });
    MediaSource::Remote(format!("http://{addr}/voice.mp3"))
}

#[tokio::test]
async fn failed_fetch_does_not_wait_for_the_other() {
    let h = Harness::new(FakeBackend::default(), |_| {});
    let request = JobRequest::new(
        MediaSource::Local(PathBuf::from("/nonexistent/reelsmith/anim.mp4")),
        slow_remote(Duration::from_secs(8)).await,
    );

    let started = Instant::now();
    let report = h.orchestrator.run(request).await;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(
        report.failure().map(|f| f.kind),
        Some(FailureKind::Fetch(FetchFailure::Unreachable))
    );
    assert_eq!(h.backend.encodes.load(Ordering::SeqCst), 0);
    h.assert_clean();
}

#[tokio::test]
async fn unreadable_track_is_composite_failure() {
    let h = Harness::new(FakeBackend::default(), |_| {});
    let report = h.orchestrator.run(h.request("not media", "4.0")).await;

    assert_eq!(
        report.failure().map(|f| f.kind),
        Some(FailureKind::Composite(CompositeFailure::UnreadableTrack))
    );
    h.assert_clean();
}

#[tokio::test]
async fn unknown_duration_is_invalid_track() {
    let h = Harness::new(FakeBackend::default(), |_| {});
    let report = h.orchestrator.run(h.request("6.0", "none")).await;

    assert_eq!(
        report.failure().map(|f| f.kind),
        Some(FailureKind::InvalidTrack)
    );
    assert_eq!(h.backend.encodes.load(Ordering::SeqCst), 0);
    h.assert_clean();
}

#[tokio::test]
async fn encoder_panic_is_internal_error() {
    let h = Harness::new(
        FakeBackend {
            panic_on_encode: true,
            ..FakeBackend::default()
        },
        |_| {},
    );

    let report = h.orchestrator.run(h.request("3.0", "3.0")).await;

    assert_eq!(
        report.failure().map(|f| f.kind),
        Some(FailureKind::InternalError)
    );
    h.assert_clean();
}

#[tokio::test]
async fn subtitle_and_cap_reach_the_encoder() {
    let h = Harness::new(FakeBackend::default(), |_| {});
    let request = h
        .request("12.0", "8.0")
        .with_subtitle("Hello world")
        .with_max_duration(6.0);

    let report = h.orchestrator.run(request).await;

    assert!(report.is_success());
    assert!((report.output.as_ref().unwrap().duration_secs() - 6.0).abs() < 0.01);
    let args = h.backend.last_args.lock().unwrap().clone();
    assert!(args.iter().any(|a| a.contains("drawtext=textfile=")));
}

#[tokio::test]
async fn persisted_output_survives_scratch_release() {
    let h = Harness::new(FakeBackend::default(), |_| {});
    let dest_dir = tempfile::tempdir().unwrap();
    let dest = dest_dir.path().join("final/video.mp4");

    let report = h.orchestrator.run(h.request("4.0", "4.0")).await;
    let output = report.output.unwrap();
    let saved = output.persist(&dest).unwrap();

    assert_eq!(saved, dest);
    assert_eq!(std::fs::read(&dest).unwrap(), b"encoded");
    h.assert_clean();
}

#[tokio::test]
async fn undeliverable_output_is_recorded_and_batch_continues() {
    let h = Harness::new(FakeBackend::default(), |_| {});
    let dest_dir = tempfile::tempdir().unwrap();
    let blocked = dest_dir.path().join("not-a-dir");
    std::fs::write(&blocked, b"file").unwrap();
    let good = dest_dir.path().join("renders");
    std::fs::create_dir(&good).unwrap();

    let mut first = h.orchestrator.run(h.request("4.0", "4.0")).await;
    let mut second = h.orchestrator.run(h.request("4.0", "4.0")).await;

    let lost = first.deliver_into(&blocked);
    assert!(lost.output.is_none());
    assert!(lost.delivery_error.is_some());
    let json = serde_json::to_value(&lost).unwrap();
    assert!(json["delivery_error"].is_string());

    let kept = second.deliver_into(&good);
    assert!(kept.delivery_error.is_none());
    let saved = kept.output.unwrap().path;
    assert!(saved.starts_with(&good));
    assert_eq!(std::fs::read(&saved).unwrap(), b"encoded");

    h.assert_clean();
}

#[tokio::test]
async fn rejected_jobs_never_exceed_worker_slots() {
    let h = Harness::new(
        FakeBackend {
            encode_delay: Duration::from_millis(500),
            ..FakeBackend::default()
        },
        |config| config.limits.worker_slots = 2,
    );

    let requests: Vec<JobRequest> = (0..6).map(|_| h.request("3.0", "3.0")).collect();
    let reports = h.orchestrator.run_batch(requests).await;

    assert_eq!(reports.len(), 6);
    assert!(reports.iter().all(|r| r.job.is_terminal()));
    let succeeded = reports.iter().filter(|r| r.is_success()).count();
    assert!((1..=2).contains(&succeeded), "succeeded: {succeeded}");
    for report in reports.iter().filter(|r| !r.is_success()) {
        assert_eq!(
            report.failure().map(|f| f.kind),
            Some(FailureKind::Overloaded)
        );
    }

    let paths: std::collections::HashSet<PathBuf> = reports
        .iter()
        .filter_map(|r| r.output.as_ref().map(|o| o.path().to_path_buf()))
        .collect();
    assert_eq!(paths.len(), succeeded);

    drop(reports);
    h.assert_clean();
}

#[tokio::test]
async fn queued_jobs_all_complete() {
    let h = Harness::new(
        FakeBackend {
            encode_delay: Duration::from_millis(100),
            ..FakeBackend::default()
        },
        |config| {
            config.limits.worker_slots = 2;
            config.limits.admission = AdmissionPolicy::Queue;
        },
    );

    let requests: Vec<JobRequest> = (0..5).map(|_| h.request("3.0", "2.0")).collect();
    let reports = h.orchestrator.run_batch(requests).await;

    assert!(reports.iter().all(|r| r.is_success()));
    assert!(h.backend.max_running.load(Ordering::SeqCst) <= 2);
    assert_eq!(h.backend.encodes.load(Ordering::SeqCst), 5);

    let ids: std::collections::HashSet<_> = reports.iter().map(|r| r.job.id).collect();
    assert_eq!(ids.len(), 5);

    drop(reports);
    h.assert_clean();
}

#[tokio::test]
async fn shutdown_aborts_running_jobs_and_clears_scratch() {
    let h = Harness::new(
        FakeBackend {
            encode_delay: Duration::from_secs(30),
            ..FakeBackend::default()
        },
        |_| {},
    );

    let orchestrator = h.orchestrator.clone();
    let request = h.request("3.0", "3.0");
    let running = tokio::spawn(async move { orchestrator.run(request).await });

    while h.backend.running.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    h.orchestrator.shutdown();
    assert!(h.orchestrator.is_shut_down());

    let report = running.await.unwrap();
    assert_eq!(
        report.failure().map(|f| f.kind),
        Some(FailureKind::Overloaded)
    );
    h.assert_clean();

    let late = h.orchestrator.run(h.request("3.0", "3.0")).await;
    assert_eq!(late.failure().map(|f| f.kind), Some(FailureKind::Overloaded));
}

#[tokio::test]
async fn retention_sweeper_deletes_uncollected_output() {
    let h = Harness::new(FakeBackend::default(), |config| {
        config.limits.retention_secs = 0;
        config.limits.sweep_interval_secs = 1;
    });

    let report = h.orchestrator.run(h.request("2.0", "2.0")).await;
    let path = report.output.as_ref().unwrap().path().to_path_buf();
    assert!(path.exists());

    let sweeper = h.orchestrator.spawn_retention_sweeper();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!path.exists());

    h.orchestrator.shutdown();
    sweeper.await.unwrap();
    drop(report);
    h.assert_clean();
}

#[tokio::test]
async fn summary_serializes_terminal_state() {
    let h = Harness::new(FakeBackend::default(), |_| {});
    let report = h.orchestrator.run(h.request("5.0", "0.0")).await;

    let json = serde_json::to_value(report.summary()).unwrap();
    assert_eq!(json["stage"], "failed");
    assert_eq!(json["result"]["status"], "failed");
    assert_eq!(json["result"]["kind"], "invalid_track");
    assert!(json.get("output").is_none());
    assert!(json.get("delivery_error").is_none());
}
