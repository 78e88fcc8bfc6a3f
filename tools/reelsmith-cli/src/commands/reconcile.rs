//! Show the trim plan for two track durations.

use reelsmith_common::config::AppConfig;
use reelsmith_processing_core::Reconciler;

pub fn run(
    config: &AppConfig,
    visual_secs: f64,
    audio_secs: f64,
    cap: Option<f64>,
) -> anyhow::Result<()> {
    let plan = Reconciler::from_config(&config.reconcile).reconcile(visual_secs, audio_secs, cap)?;

    println!("{}", serde_json::to_string_pretty(&plan)?);
    println!(
        "Output: {:.3}s (visual {}, audio {})",
        plan.output_duration_secs(),
        if plan.trims_visual() { "trimmed" } else { "whole" },
        if plan.trims_audio() { "trimmed" } else { "whole" },
    );
    Ok(())
}
