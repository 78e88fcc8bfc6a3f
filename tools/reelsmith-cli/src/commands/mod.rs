pub mod assemble;
pub mod batch;
pub mod check;
pub mod config;
pub mod probe;
pub mod reconcile;

use std::sync::Arc;

use reelsmith_common::config::AppConfig;
use reelsmith_pipeline::Orchestrator;
use reelsmith_render_engine::{FfmpegBackend, MediaBackend};

/// Build an orchestrator on the ffmpeg backend, failing early if ffmpeg is
/// missing.
pub fn orchestrator(config: AppConfig) -> anyhow::Result<Orchestrator> {
    let backend = FfmpegBackend::new(&config.render);
    if !backend.is_available() || !backend.probe_available() {
        anyhow::bail!(
            "ffmpeg/ffprobe not found (looked for '{}' and '{}'); run `reelsmith check`",
            config.render.ffmpeg_path,
            config.render.ffprobe_path
        );
    }
    Ok(Orchestrator::new(config, Arc::new(backend))?)
}

/// On Ctrl-C, stop the orchestrator and delete all scratch.
pub fn shutdown_on_ctrl_c(orchestrator: &Orchestrator) {
    let orchestrator = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cleaning up");
            orchestrator.shutdown();
        }
    });
}
