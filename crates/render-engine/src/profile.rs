//! Encoding profiles.
//!
//! Every profile names its codec, preset and thread cap explicitly so two
//! runs over the same inputs use the same amount of CPU and memory. Under
//! memory pressure the faster, lower quality preset is used instead of
//! failing the job.

use reelsmith_common::config::RenderConfig;
use reelsmith_job_model::OutputFormat;

/// Memory condition reported by admission control at encode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryPressure {
    #[default]
    Normal,
    High,
}

/// Resolved encoder settings for one output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeProfile {
    pub format: OutputFormat,
    pub preset: String,
    pub crf: u32,
    pub threads: u32,
    pub audio_bitrate_kbps: u32,
    pub degraded: bool,
}

impl EncodeProfile {
    pub fn resolve(format: OutputFormat, config: &RenderConfig, pressure: MemoryPressure) -> Self {
        let degraded = pressure == MemoryPressure::High;
        let (preset, crf) = if degraded {
            (config.degraded_preset.clone(), config.degraded_crf)
        } else {
            (config.preset.clone(), config.crf)
        };
        Self {
            format,
            preset,
            crf,
            threads: config.threads.max(1),
            audio_bitrate_kbps: config.audio_bitrate_kbps.max(32),
            degraded,
        }
    }

    /// ffmpeg output options for this profile.
    pub fn codec_args(&self) -> Vec<String> {
        let threads = self.threads.to_string();
        let crf = self.crf.to_string();
        let audio_bitrate = format!("{}k", self.audio_bitrate_kbps);
        let x265_params = format!("pools={threads}");

        let mut args: Vec<String> = match self.format {
            OutputFormat::Mp4H264 => vec![
                "-c:v",
                "libx264",
                "-preset",
                self.preset.as_str(),
                "-crf",
                crf.as_str(),
                "-pix_fmt",
                "yuv420p",
                "-c:a",
                "aac",
                "-b:a",
                audio_bitrate.as_str(),
                "-movflags",
                "+faststart",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            OutputFormat::Mp4H265 => vec![
                "-c:v",
                "libx265",
                "-preset",
                self.preset.as_str(),
                "-crf",
                crf.as_str(),
                "-x265-params",
                x265_params.as_str(),
                "-pix_fmt",
                "yuv420p",
                "-tag:v",
                "hvc1",
                "-c:a",
                "aac",
                "-b:a",
                audio_bitrate.as_str(),
                "-movflags",
                "+faststart",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            OutputFormat::Webm => vec![
                "-c:v",
                "libvpx-vp9",
                "-deadline",
                if self.degraded { "realtime" } else { "good" },
                "-cpu-used",
                if self.degraded { "8" } else { "4" },
                "-crf",
                crf.as_str(),
                "-b:v",
                "0",
                "-row-mt",
                "1",
                "-c:a",
                "libopus",
                "-b:a",
                audio_bitrate.as_str(),
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        };

        args.push("-threads".to_string());
        args.push(threads);
        args
    }
}
