//! Application configuration.
//!
//! Loaded once at process start and shared read-only (`Arc<AppConfig>`)
//! with every component for the life of the process.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ReelError, ReelResult};

const MIB: u64 = 1024 * 1024;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root directory for per-job scratch storage.
    pub scratch_dir: PathBuf,

    /// Admission control and job budgets.
    pub limits: LimitsConfig,

    /// Asset transfer limits.
    pub fetch: FetchConfig,

    /// Encoding and overlay settings.
    pub render: RenderConfig,

    /// Duration reconciliation settings.
    pub reconcile: ReconcileConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Admission control, budgets and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Absolute memory ceiling in bytes. Reservations above it are rejected.
    pub memory_ceiling_bytes: u64,

    /// Memory reserved per admitted job.
    pub job_memory_estimate_bytes: u64,

    /// Usage ratio at which the encoder switches to the degraded preset.
    pub degrade_threshold: f64,

    /// Where live memory usage is sampled from.
    pub memory_source: MemorySource,

    /// Maximum number of jobs running at once.
    pub worker_slots: usize,

    /// What happens when every worker slot is busy.
    pub admission: AdmissionPolicy,

    /// Overall wall-clock budget per job.
    pub job_timeout_secs: u64,

    /// How long an undelivered output may stay in scratch storage.
    pub retention_secs: u64,

    /// Interval between retention sweeps.
    pub sweep_interval_secs: u64,
}

/// Source of live memory samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    /// Host-wide usage (`MemTotal - MemAvailable`), other processes included.
    System,
    /// Resident set size of this process and its encoder subprocesses.
    Process,
}

/// Behaviour when no worker slot is free at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Fail the job immediately as overloaded.
    Reject,
    /// Wait for a slot, bounded by the job's own budget.
    Queue,
}

/// Asset transfer limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Largest asset accepted, in bytes.
    pub max_asset_bytes: u64,

    /// Maximum duration of one transfer.
    pub transfer_timeout_secs: u64,

    /// TCP connect timeout for remote sources.
    pub connect_timeout_secs: u64,

    /// Read buffer size for local copies.
    pub chunk_size_bytes: usize,

    /// User agent sent to remote hosts.
    pub user_agent: String,
}

/// Encoding and overlay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// ffmpeg binary name or path.
    pub ffmpeg_path: String,

    /// ffprobe binary name or path.
    pub ffprobe_path: String,

    /// Output resolution.
    pub width: u32,
    pub height: u32,

    /// Output frame rate.
    pub fps: u32,

    /// Encoder thread cap.
    pub threads: u32,

    /// Encoder preset under normal conditions.
    pub preset: String,

    /// Encoder preset under memory pressure.
    pub degraded_preset: String,

    /// Constant rate factor under normal conditions.
    pub crf: u32,

    /// Constant rate factor under memory pressure.
    pub degraded_crf: u32,

    /// Audio bitrate in kbps.
    pub audio_bitrate_kbps: u32,

    /// Subtitle overlay styling.
    pub subtitle: SubtitleStyle,
}

/// Styling for the burned-in subtitle layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleStyle {
    /// Font size in output pixels.
    pub font_size: u32,

    /// Text color (ffmpeg color syntax).
    pub font_color: String,

    /// Background box color, with alpha.
    pub box_color: String,

    /// Padding around the text inside the box.
    pub box_border: u32,

    /// Distance from the bottom edge in output pixels.
    pub margin_bottom: u32,

    /// Optional font file; ffmpeg's default font is used when unset.
    pub font_file: Option<PathBuf>,
}

/// Duration reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Tolerance for duration comparisons, in seconds.
    pub epsilon_secs: f64,

    /// Hard cap on output length applied to every job.
    pub max_duration_secs: Option<f64>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "reelsmith_pipeline=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join("reelsmith"),
            limits: LimitsConfig::default(),
            fetch: FetchConfig::default(),
            render: RenderConfig::default(),
            reconcile: ReconcileConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            memory_ceiling_bytes: 1536 * MIB,
            job_memory_estimate_bytes: 256 * MIB,
            degrade_threshold: 0.80,
            memory_source: MemorySource::Process,
            worker_slots: 2,
            admission: AdmissionPolicy::Reject,
            job_timeout_secs: 300,
            retention_secs: 900,
            sweep_interval_secs: 60,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_asset_bytes: 512 * MIB,
            transfer_timeout_secs: 120,
            connect_timeout_secs: 10,
            chunk_size_bytes: 64 * 1024,
            user_agent: format!("reelsmith/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            width: 1280,
            height: 720,
            fps: 30,
            threads: 2,
            preset: "veryfast".to_string(),
            degraded_preset: "ultrafast".to_string(),
            crf: 23,
            degraded_crf: 30,
            audio_bitrate_kbps: 128,
            subtitle: SubtitleStyle::default(),
        }
    }
}

impl Default for SubtitleStyle {
    fn default() -> Self {
        Self {
            font_size: 36,
            font_color: "white".to_string(),
            box_color: "black@0.6".to_string(),
            box_border: 12,
            margin_bottom: 48,
            font_file: None,
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            epsilon_secs: 0.01,
            max_duration_secs: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl LimitsConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl FetchConfig {
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Load and validate config from an explicit path.
    pub fn load_from(path: impl AsRef<Path>) -> ReelResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReelError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }

    /// Reject values that would make admission or reconciliation meaningless.
    pub fn validate(&self) -> ReelResult<()> {
        if self.limits.memory_ceiling_bytes == 0 {
            return Err(ReelError::config("limits.memory_ceiling_bytes must be > 0"));
        }
        if self.limits.worker_slots == 0 {
            return Err(ReelError::config("limits.worker_slots must be > 0"));
        }
        if !(self.limits.degrade_threshold > 0.0 && self.limits.degrade_threshold <= 1.0) {
            return Err(ReelError::config(
                "limits.degrade_threshold must be in (0.0, 1.0]",
            ));
        }
        if self.limits.job_timeout_secs == 0 {
            return Err(ReelError::config("limits.job_timeout_secs must be > 0"));
        }
        if self.fetch.chunk_size_bytes == 0 {
            return Err(ReelError::config("fetch.chunk_size_bytes must be > 0"));
        }
        if !(self.reconcile.epsilon_secs.is_finite() && self.reconcile.epsilon_secs > 0.0) {
            return Err(ReelError::config("reconcile.epsilon_secs must be > 0"));
        }
        if self.render.width == 0 || self.render.height == 0 || self.render.fps == 0 {
            return Err(ReelError::config(
                "render.width, render.height and render.fps must be > 0",
            ));
        }
        Ok(())
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("reelsmith").join("config.json")
}
