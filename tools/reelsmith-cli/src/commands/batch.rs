//! Assemble a batch of videos concurrently.

use std::path::PathBuf;

use anyhow::Context;
use reelsmith_common::config::{AdmissionPolicy, AppConfig};
use reelsmith_job_model::JobRequest;

pub async fn run(mut config: AppConfig, jobs: PathBuf, out_dir: PathBuf) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(&jobs)
        .with_context(|| format!("Failed to read {}", jobs.display()))?;
    let requests = JobRequest::batch_from_json(&content)
        .with_context(|| format!("Failed to parse {}", jobs.display()))?;
    if requests.is_empty() {
        println!("[]");
        return Ok(());
    }

    // A batch is submitted at once: queue instead of rejecting what does
    // not fit right away.
    config.limits.admission = AdmissionPolicy::Queue;
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let orchestrator = super::orchestrator(config)?;
    super::shutdown_on_ctrl_c(&orchestrator);
    let sweeper = orchestrator.spawn_retention_sweeper();

    tracing::info!(jobs = requests.len(), "Running batch");
    let reports = orchestrator.run_batch(requests).await;

    let summaries: Vec<_> = reports
        .into_iter()
        .map(|mut report| report.deliver_into(&out_dir))
        .collect();
    let failed = summaries.iter().filter(|s| s.output.is_none()).count();

    println!("{}", serde_json::to_string_pretty(&summaries)?);

    orchestrator.shutdown();
    sweeper.await.ok();

    if failed > 0 {
        anyhow::bail!("{failed} of {} jobs failed", summaries.len());
    }
    Ok(())
}
