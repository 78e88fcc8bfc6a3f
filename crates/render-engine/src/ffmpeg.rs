//! ffmpeg/ffprobe subprocess backend.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use reelsmith_common::config::RenderConfig;
use reelsmith_job_model::TrackKind;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::backend::{EncodeProgress, EncodeRequest, MediaBackend, MediaTrack, ProgressCallback};
use crate::error::CompositeError;

/// How much of ffmpeg's stderr is kept for error messages.
const STDERR_TAIL_BYTES: usize = 2048;

/// Backend driving the `ffmpeg` and `ffprobe` binaries.
///
/// Every child is spawned with `kill_on_drop`, so dropping an in-flight
/// encode future (job timeout) also terminates the process.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegBackend {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
        }
    }

    /// Whether `ffprobe` can be found.
    pub fn probe_available(&self) -> bool {
        command_exists(&self.ffprobe)
    }
}

#[async_trait]
impl MediaBackend for FfmpegBackend {
    async fn probe(&self, kind: TrackKind, path: &Path) -> Result<MediaTrack, CompositeError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration,format_name:stream=codec_type",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CompositeError::BackendUnavailable {
                message: format!("failed to start ffprobe: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CompositeError::unreadable(
                kind,
                format!("ffprobe exited with {}: {}", output.status, sanitize(&stderr, path)),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let track = parse_probe_output(kind, path, &stdout)?;
        tracing::debug!(
            %kind,
            duration_secs = track.duration_secs,
            format = %track.format_name,
            "Track probed"
        );
        Ok(track)
    }

    async fn encode(
        &self,
        request: &EncodeRequest,
        cancel: &CancellationToken,
        progress: Option<&ProgressCallback>,
    ) -> Result<(), CompositeError> {
        tracing::debug!(args = ?request.args, "Running ffmpeg");
        let start = std::time::Instant::now();
        let mut child = Command::new(&self.ffmpeg)
            .args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CompositeError::BackendUnavailable {
                message: format!("failed to start ffmpeg: {e}"),
            })?;

        tracing::info!(
            pid = child.id(),
            args_len = request.args.len(),
            expected_secs = request.expected_duration_secs,
            "ffmpeg process started"
        );

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CompositeError::encode("failed to capture ffmpeg stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CompositeError::encode("failed to capture ffmpeg stderr"))?;

        // Drain stderr concurrently so ffmpeg never blocks on a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut output = String::new();
            let mut reader = BufReader::new(stderr);
            match reader.read_to_string(&mut output).await {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut state = ProgressState::default();

        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => {
                    terminate(&mut child).await;
                    stderr_task.abort();
                    tracing::warn!(
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "ffmpeg cancelled"
                    );
                    return Err(CompositeError::Cancelled);
                }
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    terminate(&mut child).await;
                    return Err(CompositeError::encode(format!(
                        "failed reading ffmpeg progress: {e}"
                    )));
                }
            };

            if let Some((key, value)) = line.trim().split_once('=') {
                state.update(key, value);
                if key == "progress" {
                    let report = progress_report(
                        &state,
                        request.expected_duration_secs,
                        start.elapsed().as_secs_f64(),
                    );
                    tracing::debug!(
                        progress = report.progress,
                        out_time_secs = report.out_time_secs,
                        "Encode progress"
                    );
                    if let Some(cb) = progress {
                        cb(report);
                    }
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                terminate(&mut child).await;
                stderr_task.abort();
                return Err(CompositeError::Cancelled);
            }
            status = child.wait() => status?,
        };

        let stderr_output = stderr_task
            .await
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

        if !status.success() {
            return Err(CompositeError::encode(format!(
                "ffmpeg exited with {status}: {}",
                tail(&sanitize(&stderr_output, &request.output), STDERR_TAIL_BYTES)
            )));
        }

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "ffmpeg finished"
        );
        Ok(())
    }

    fn is_available(&self) -> bool {
        command_exists(&self.ffmpeg)
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

async fn terminate(child: &mut tokio::process::Child) {
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "ffmpeg already exited");
    }
    let _ = child.wait().await;
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: Option<String>,
}

/// Parse `ffprobe -of json` output into a [`MediaTrack`].
///
/// A track without a stream of its own kind is unreadable. A duration that is
/// missing, non-numeric, non-finite or negative is `InvalidDuration`.
pub fn parse_probe_output(
    kind: TrackKind,
    path: &Path,
    json: &str,
) -> Result<MediaTrack, CompositeError> {
    let parsed: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| CompositeError::unreadable(kind, format!("unparseable probe output: {e}")))?;

    let has_stream =
        |wanted: &str| parsed.streams.iter().any(|s| s.codec_type.as_deref() == Some(wanted));
    let has_video = has_stream("video");
    let has_audio = has_stream("audio");

    match kind {
        TrackKind::Visual if !has_video => {
            return Err(CompositeError::unreadable(kind, "no video stream"));
        }
        TrackKind::Audio if !has_audio => {
            return Err(CompositeError::unreadable(kind, "no audio stream"));
        }
        _ => {}
    }

    let (raw_duration, format_name) = match parsed.format {
        Some(format) => (format.duration, format.format_name.unwrap_or_default()),
        None => (None, String::new()),
    };
    let duration_secs = parse_duration(kind, raw_duration.as_deref())?;

    Ok(MediaTrack {
        kind,
        path: path.to_path_buf(),
        duration_secs,
        format_name,
        has_video,
        has_audio,
    })
}

fn parse_duration(kind: TrackKind, raw: Option<&str>) -> Result<f64, CompositeError> {
    let raw = raw.map(str::trim).ok_or_else(|| CompositeError::InvalidDuration {
        track: kind,
        message: "container declares no duration".to_string(),
    })?;
    match raw.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => Ok(secs),
        _ => Err(CompositeError::InvalidDuration {
            track: kind,
            message: format!("unusable duration {raw:?}"),
        }),
    }
}

/// Check whether a binary can be executed, either by path or via `PATH`.
pub fn command_exists(binary: &str) -> bool {
    if binary.contains('/') {
        return Path::new(binary).is_file();
    }
    std::process::Command::new("sh")
        .arg("-c")
        .arg("command -v \"$1\" >/dev/null 2>&1")
        .arg("sh")
        .arg(binary)
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Strip scratch paths out of tool output before it reaches callers.
fn sanitize(output: &str, path: &Path) -> String {
    let mut cleaned = output.trim().to_string();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        cleaned = cleaned.replace(&*dir.to_string_lossy(), "<scratch>");
    }
    cleaned
}

fn tail(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[derive(Debug, Default)]
struct ProgressState {
    out_time_secs: f64,
    complete: bool,
}

impl ProgressState {
    fn update(&mut self, key: &str, value: &str) {
        match key {
            // ffmpeg reports microseconds under both keys.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => {
                self.complete = value == "end";
            }
            _ => {}
        }
    }
}

fn progress_report(
    state: &ProgressState,
    expected_duration_secs: f64,
    elapsed_secs: f64,
) -> EncodeProgress {
    let progress = if expected_duration_secs <= 0.0 {
        0.0
    } else {
        (state.out_time_secs / expected_duration_secs).clamp(0.0, 1.0)
    };

    let eta_secs = if progress > 0.0 {
        (elapsed_secs / progress) - elapsed_secs
    } else {
        0.0
    }
    .max(0.0);

    EncodeProgress {
        progress: if state.complete { 1.0 } else { progress },
        out_time_secs: state.out_time_secs,
        eta_secs,
        complete: state.complete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelsmith_job_model::FailureKind;

    const MP4_PROBE: &str = r#"{
        "programs": [],
        "streams": [ { "codec_type": "video" }, { "codec_type": "audio" } ],
        "format": { "format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "12.000000" }
    }"#;

    #[test]
    fn test_parse_probe_output_reads_duration_and_streams() {
        let track =
            parse_probe_output(TrackKind::Visual, Path::new("/s/visual.mp4"), MP4_PROBE).unwrap();
        assert_eq!(track.duration_secs, 12.0);
        assert!(track.has_video);
        assert!(track.has_audio);
        assert_eq!(track.format_name, "mov,mp4,m4a,3gp,3g2,mj2");
    }

    #[test]
    fn test_parse_probe_output_rejects_unusable_duration() {
        for duration in [r#""N/A""#, r#""nan""#, r#""inf""#, r#""-1.5""#, "null"] {
            let json = format!(
                r#"{{ "streams": [ {{ "codec_type": "audio" }} ], "format": {{ "format_name": "mp3", "duration": {duration} }} }}"#
            );
            let err = parse_probe_output(TrackKind::Audio, Path::new("a.mp3"), &json).unwrap_err();
            assert!(
                matches!(
                    err,
                    CompositeError::InvalidDuration {
                        track: TrackKind::Audio,
                        ..
                    }
                ),
                "duration {duration} gave {err:?}"
            );
            assert_eq!(err.failure_kind(), FailureKind::InvalidTrack);
        }
    }

    #[test]
    fn test_parse_probe_output_missing_format_is_invalid_duration() {
        let json = r#"{ "streams": [ { "codec_type": "video" } ] }"#;
        let err = parse_probe_output(TrackKind::Visual, Path::new("v.mp4"), json).unwrap_err();
        assert!(matches!(err, CompositeError::InvalidDuration { .. }));
    }

    #[test]
    fn test_parse_probe_output_accepts_zero_duration() {
        let json = r#"{ "streams": [ { "codec_type": "audio" } ], "format": { "duration": "0.000000" } }"#;
        let track = parse_probe_output(TrackKind::Audio, Path::new("a.mp3"), json).unwrap();
        assert_eq!(track.duration_secs, 0.0);
    }

    #[test]
    fn test_audio_track_without_audio_stream_is_unreadable() {
        let json = r#"{ "streams": [ { "codec_type": "video" } ], "format": { "duration": "3.0" } }"#;
        let err = parse_probe_output(TrackKind::Audio, Path::new("a.mp4"), json).unwrap_err();
        assert!(matches!(
            err,
            CompositeError::UnreadableTrack {
                track: TrackKind::Audio,
                ..
            }
        ));
    }

    #[test]
    fn test_garbage_probe_output_is_unreadable() {
        assert!(parse_probe_output(TrackKind::Visual, Path::new("v"), "not json").is_err());
    }

    #[test]
    fn test_progress_state_and_report() {
        let mut state = ProgressState::default();
        state.update("out_time_us", "4000000");
        state.update("progress", "continue");
        let report = progress_report(&state, 8.0, 2.0);
        assert!((report.progress - 0.5).abs() < 1e-9);
        assert!((report.eta_secs - 2.0).abs() < 1e-9);
        assert!(!report.complete);

        state.update("progress", "end");
        assert_eq!(progress_report(&state, 8.0, 3.0).progress, 1.0);
    }

    #[test]
    fn test_sanitize_and_tail() {
        let cleaned = sanitize(
            "/scratch/job-1/visual.mp4: Invalid data",
            Path::new("/scratch/job-1/output.mp4"),
        );
        assert_eq!(cleaned, "<scratch>/visual.mp4: Invalid data");
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("abc", 10), "abc");
    }

    #[test]
    fn test_command_exists() {
        assert!(command_exists("sh"));
        assert!(!command_exists("reelsmith-definitely-not-a-binary"));
        assert!(!command_exists("/nonexistent/ffmpeg"));
    }
}
