//! Assemble one video.

use std::path::PathBuf;

use anyhow::Context;
use reelsmith_common::config::AppConfig;
use reelsmith_job_model::{JobRequest, MediaSource, OutputFormat};

pub struct AssembleArgs {
    pub visual: String,
    pub audio: String,
    pub subtitle: Option<String>,
    pub format: OutputFormat,
    pub max_duration: Option<f64>,
    pub output: Option<PathBuf>,
    pub json: bool,
}

pub async fn run(config: AppConfig, args: AssembleArgs) -> anyhow::Result<()> {
    let visual = MediaSource::parse(&args.visual).context("Invalid --visual source")?;
    let audio = MediaSource::parse(&args.audio).context("Invalid --audio source")?;

    let mut request = JobRequest::new(visual, audio).with_format(args.format);
    if let Some(text) = args.subtitle {
        request = request.with_subtitle(text);
    }
    if let Some(secs) = args.max_duration {
        request = request.with_max_duration(secs);
    }

    let orchestrator = super::orchestrator(config)?;
    super::shutdown_on_ctrl_c(&orchestrator);

    if !args.json {
        println!("Assembling video");
        println!("  Visual: {}", request.visual);
        println!("  Audio: {}", request.audio);
        println!("  Format: {}", request.format);
    }

    let mut report = orchestrator.run(request).await;
    let mut summary = report.summary();

    if let Some(output) = report.output.take() {
        let dest = args.output.unwrap_or_else(|| {
            PathBuf::from(format!("{}.{}", report.job.id, output.format().extension()))
        });
        let saved = output
            .persist(&dest)
            .with_context(|| format!("Failed to save output to {}", dest.display()))?;
        if let Some(out) = summary.output.as_mut() {
            out.path = saved;
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if let Some(out) = &summary.output {
        println!(
            "Done: {} ({:.2}s, {} bytes{}) in {} ms",
            out.path.display(),
            out.duration_secs,
            out.bytes,
            if out.degraded { ", degraded profile" } else { "" },
            summary.elapsed_ms
        );
    }

    match report.failure() {
        Some(failure) if failure.kind.is_transient() => Err(anyhow::anyhow!(
            "Job failed: {failure} (transient, retry later)"
        )),
        Some(failure) => Err(anyhow::anyhow!("Job failed: {failure}")),
        None => Ok(()),
    }
}
