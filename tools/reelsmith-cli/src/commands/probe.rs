//! Inspect a media file with the configured prober.

use std::path::PathBuf;

use reelsmith_common::config::AppConfig;
use reelsmith_job_model::TrackKind;
use reelsmith_render_engine::{FfmpegBackend, MediaBackend};

pub async fn run(config: &AppConfig, path: PathBuf, kind: TrackKind) -> anyhow::Result<()> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }

    let backend = FfmpegBackend::new(&config.render);
    let track = backend.probe(kind, &path).await?;

    println!("{}", serde_json::to_string_pretty(&track)?);
    if track.duration_secs > 0.0 {
        println!("Usable as {kind} track ({:.3}s)", track.duration_secs);
    } else {
        println!("Not usable as {kind} track: zero duration");
    }
    Ok(())
}
