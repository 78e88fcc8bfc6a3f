//! Compositor: merges a trimmed visual track, a trimmed audio track and
//! optional overlay text into one encoded output file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reelsmith_common::config::RenderConfig;
use reelsmith_common::scratch::ScratchArea;
use reelsmith_job_model::{OutputFormat, OutputSpec, TrackKind, TrimPlan};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::backend::{EncodeRequest, MediaBackend, MediaTrack, ProgressCallback};
use crate::error::CompositeError;
use crate::filter::{build_ffmpeg_args, EncodeInputs};
use crate::profile::{EncodeProfile, MemoryPressure};

/// Slack allowed between a trim interval and the probed track length.
const PLAN_TOLERANCE_SECS: f64 = 1e-6;

/// One compose call's inputs.
#[derive(Debug, Clone, Copy)]
pub struct CompositionJob<'a> {
    pub visual: &'a MediaTrack,
    pub audio: &'a MediaTrack,
    pub plan: &'a TrimPlan,
    pub subtitle: Option<&'a str>,
    pub format: OutputFormat,
    pub pressure: MemoryPressure,
}

/// The encoded file, still inside the job's scratch area.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputAsset {
    pub path: PathBuf,
    pub format: OutputFormat,
    pub duration_secs: f64,
    pub bytes: u64,

    /// Encoded with the low-memory profile.
    pub degraded: bool,
}

/// Drives a [`MediaBackend`] with a fixed render configuration.
#[derive(Clone)]
pub struct Compositor {
    backend: Arc<dyn MediaBackend>,
    render: RenderConfig,
}

impl Compositor {
    pub fn new(backend: Arc<dyn MediaBackend>, render: RenderConfig) -> Self {
        Self { backend, render }
    }

    pub fn backend(&self) -> &Arc<dyn MediaBackend> {
        &self.backend
    }

    pub fn output_spec(&self, format: OutputFormat) -> OutputSpec {
        OutputSpec {
            format,
            width: self.render.width,
            height: self.render.height,
            fps: self.render.fps,
        }
    }

    /// Open a track and read its metadata.
    pub async fn open_track(
        &self,
        kind: TrackKind,
        path: &Path,
    ) -> Result<MediaTrack, CompositeError> {
        self.backend.probe(kind, path).await
    }

    /// Encode one output file into `scratch`.
    ///
    /// Input files are only read. At most two scratch files are created: the
    /// overlay text (removed before returning) and the output (removed unless
    /// this returns `Ok`).
    pub async fn compose(
        &self,
        job: CompositionJob<'_>,
        scratch: &dyn ScratchArea,
        cancel: &CancellationToken,
        progress: Option<&ProgressCallback>,
    ) -> Result<OutputAsset, CompositeError> {
        check_plan(&job)?;

        let subtitle_file = match job.subtitle {
            Some(text) => Some(write_subtitle(text, scratch).await?),
            None => None,
        };

        let result = self
            .encode_output(&job, subtitle_file.as_deref(), scratch, cancel, progress)
            .await;

        if let Some(path) = &subtitle_file {
            scratch.discard(path);
        }
        result
    }

    async fn encode_output(
        &self,
        job: &CompositionJob<'_>,
        subtitle_file: Option<&Path>,
        scratch: &dyn ScratchArea,
        cancel: &CancellationToken,
        progress: Option<&ProgressCallback>,
    ) -> Result<OutputAsset, CompositeError> {
        let output = self.output_spec(job.format);
        let profile = EncodeProfile::resolve(job.format, &self.render, job.pressure);
        let output_path = scratch
            .register(&output.file_name())
            .map_err(|e| CompositeError::Scratch {
                message: e.to_string(),
            })?;

        let args = build_ffmpeg_args(&EncodeInputs {
            visual: &job.visual.path,
            audio: &job.audio.path,
            plan: job.plan,
            subtitle_file,
            style: &self.render.subtitle,
            output: &output,
            profile: &profile,
            output_path: &output_path,
        });
        let request = EncodeRequest {
            args,
            output: output_path.clone(),
            expected_duration_secs: job.plan.output_duration_secs(),
        };

        tracing::info!(
            backend = self.backend.name(),
            format = %job.format,
            degraded = profile.degraded,
            duration_secs = request.expected_duration_secs,
            subtitle = subtitle_file.is_some(),
            "Encoding output"
        );

        let encoded = match self.backend.encode(&request, cancel, progress).await {
            Ok(()) => output_size(&output_path).await,
            Err(err) => Err(err),
        };

        match encoded {
            Ok(bytes) => Ok(OutputAsset {
                path: output_path,
                format: job.format,
                duration_secs: request.expected_duration_secs,
                bytes,
                degraded: profile.degraded,
            }),
            Err(err) => {
                scratch.discard(&output_path);
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor")
            .field("backend", &self.backend.name())
            .field("render", &self.render)
            .finish()
    }
}

fn check_plan(job: &CompositionJob<'_>) -> Result<(), CompositeError> {
    for (track, interval) in [(job.visual, &job.plan.visual), (job.audio, &job.plan.audio)] {
        let available = track.duration_secs;
        if interval.start_secs < 0.0
            || interval.duration_secs() <= 0.0
            || interval.end_secs > available + PLAN_TOLERANCE_SECS
        {
            return Err(CompositeError::PlanMismatch {
                message: format!(
                    "{} interval [{:.3}, {:.3}] outside track of {:.3}s",
                    track.kind, interval.start_secs, interval.end_secs, available
                ),
            });
        }
    }
    Ok(())
}

async fn write_subtitle(text: &str, scratch: &dyn ScratchArea) -> Result<PathBuf, CompositeError> {
    let path = scratch
        .register("subtitle.txt")
        .map_err(|e| CompositeError::Scratch {
            message: e.to_string(),
        })?;
    if let Err(e) = tokio::fs::write(&path, text.as_bytes()).await {
        scratch.discard(&path);
        return Err(e.into());
    }
    Ok(path)
}

async fn output_size(path: &Path) -> Result<u64, CompositeError> {
    let bytes = tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .map_err(|_| CompositeError::encode("encoder produced no output file"))?;
    if bytes == 0 {
        return Err(CompositeError::encode("encoder produced an empty output file"));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EncodeProgress;
    use async_trait::async_trait;
    use reelsmith_common::error::ReelResult;
    use reelsmith_job_model::TrimInterval;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct TestScratch {
        dir: tempfile::TempDir,
    }

    impl ScratchArea for TestScratch {
        fn register(&self, file_name: &str) -> ReelResult<PathBuf> {
            Ok(self.dir.path().join(file_name))
        }

        fn discard(&self, path: &Path) {
            std::fs::remove_file(path).ok();
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        fail: bool,
        write_empty: bool,
        seen_args: Mutex<Vec<String>>,
        subtitle_seen: Mutex<Option<String>>,
        encodes: AtomicUsize,
    }

    #[async_trait]
    impl MediaBackend for FakeBackend {
        async fn probe(&self, kind: TrackKind, path: &Path) -> Result<MediaTrack, CompositeError> {
            Ok(track(kind, path, 10.0))
        }

        async fn encode(
            &self,
            request: &EncodeRequest,
            _cancel: &CancellationToken,
            progress: Option<&ProgressCallback>,
        ) -> Result<(), CompositeError> {
            self.encodes.fetch_add(1, Ordering::SeqCst);
            *self.seen_args.lock().unwrap() = request.args.clone();
            let subtitle = request.output.with_file_name("subtitle.txt");
            *self.subtitle_seen.lock().unwrap() = std::fs::read_to_string(subtitle).ok();

            std::fs::write(&request.output, if self.write_empty { &b""[..] } else { &b"encoded"[..] })?;
            if let Some(cb) = progress {
                cb(EncodeProgress {
                    progress: 1.0,
                    out_time_secs: request.expected_duration_secs,
                    eta_secs: 0.0,
                    complete: true,
                });
            }
            if self.fail {
                return Err(CompositeError::encode("boom"));
            }
            Ok(())
        }

        fn is_available(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    fn track(kind: TrackKind, path: &Path, secs: f64) -> MediaTrack {
        MediaTrack {
            kind,
            path: path.to_path_buf(),
            duration_secs: secs,
            format_name: "fake".to_string(),
            has_video: kind == TrackKind::Visual,
            has_audio: true,
        }
    }

    fn plan(secs: f64) -> TrimPlan {
        TrimPlan {
            visual: TrimInterval::from_start(secs),
            audio: TrimInterval::from_start(secs),
            visual_source_secs: 12.0,
            audio_source_secs: 8.0,
        }
    }

    async fn run(
        backend: Arc<FakeBackend>,
        scratch: &TestScratch,
        plan: TrimPlan,
        subtitle: Option<&str>,
    ) -> Result<OutputAsset, CompositeError> {
        let visual = track(TrackKind::Visual, Path::new("/in/visual.mp4"), 12.0);
        let audio = track(TrackKind::Audio, Path::new("/in/audio.mp3"), 8.0);
        let compositor = Compositor::new(backend, RenderConfig::default());
        compositor
            .compose(
                CompositionJob {
                    visual: &visual,
                    audio: &audio,
                    plan: &plan,
                    subtitle,
                    format: OutputFormat::Mp4H264,
                    pressure: MemoryPressure::Normal,
                },
                scratch,
                &CancellationToken::new(),
                None,
            )
            .await
    }

    fn scratch() -> TestScratch {
        TestScratch {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn files(scratch: &TestScratch) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(scratch.dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_compose_writes_single_output() {
        let backend = Arc::new(FakeBackend::default());
        let scratch = scratch();
        let asset = run(backend.clone(), &scratch, plan(8.0), Some("Hello there"))
            .await
            .unwrap();

        assert_eq!(asset.duration_secs, 8.0);
        assert_eq!(asset.bytes, 7);
        assert!(!asset.degraded);
        assert_eq!(files(&scratch), vec!["output.mp4".to_string()]);
        assert_eq!(
            backend.subtitle_seen.lock().unwrap().as_deref(),
            Some("Hello there")
        );
        let args = backend.seen_args.lock().unwrap().clone();
        assert!(args.iter().any(|a| a.contains("drawtext=textfile=")));
    }

    #[tokio::test]
    async fn test_subtitle_with_percent_and_backslash_is_passed_verbatim() {
        let backend = Arc::new(FakeBackend::default());
        let scratch = scratch();
        let text = r"Save 50% today %{pts} C:\promo";
        run(backend.clone(), &scratch, plan(8.0), Some(text))
            .await
            .unwrap();

        assert_eq!(backend.subtitle_seen.lock().unwrap().as_deref(), Some(text));
        let args = backend.seen_args.lock().unwrap().clone();
        assert!(args.iter().any(|a| a.contains(":expansion=none:")));
    }

    #[tokio::test]
    async fn test_encode_failure_removes_partial_output() {
        let backend = Arc::new(FakeBackend {
            fail: true,
            ..FakeBackend::default()
        });
        let scratch = scratch();
        let err = run(backend, &scratch, plan(8.0), Some("x")).await.unwrap_err();
        assert!(matches!(err, CompositeError::EncodeFailure { .. }));
        assert!(files(&scratch).is_empty());
    }

    #[tokio::test]
    async fn test_empty_output_is_encode_failure() {
        let backend = Arc::new(FakeBackend {
            write_empty: true,
            ..FakeBackend::default()
        });
        let scratch = scratch();
        let err = run(backend, &scratch, plan(8.0), None).await.unwrap_err();
        assert!(matches!(err, CompositeError::EncodeFailure { .. }));
        assert!(files(&scratch).is_empty());
    }

    #[tokio::test]
    async fn test_plan_longer_than_track_is_rejected_before_encoding() {
        let backend = Arc::new(FakeBackend::default());
        let scratch = scratch();
        let err = run(backend.clone(), &scratch, plan(9.0), None).await.unwrap_err();
        assert!(matches!(err, CompositeError::PlanMismatch { .. }));
        assert_eq!(backend.encodes.load(Ordering::SeqCst), 0);
        assert!(files(&scratch).is_empty());
    }
}
