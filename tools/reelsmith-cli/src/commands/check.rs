//! Check system capabilities.

use reelsmith_common::config::AppConfig;
use reelsmith_pipeline::{sampler_for, ResourceGuard};
use reelsmith_render_engine::ffmpeg::command_exists;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Reelsmith System Check");
    println!("{}", "=".repeat(50));

    let mut ready = true;
    for (label, binary) in [
        ("ffmpeg", &config.render.ffmpeg_path),
        ("ffprobe", &config.render.ffprobe_path),
    ] {
        if command_exists(binary) {
            println!("[OK] {label}: {binary}");
        } else {
            println!("[FAIL] {label} not found: {binary}");
            ready = false;
        }
    }

    let limits = &config.limits;
    let guard = ResourceGuard::from_config(limits, sampler_for(limits.memory_source));
    let ratio = guard.current_usage_ratio();
    let status = if ratio >= 1.0 {
        ready = false;
        "FAIL"
    } else if ratio >= limits.degrade_threshold {
        "WARN"
    } else {
        "OK"
    };
    println!(
        "[{status}] Memory ({}): {:.0}% of {} MiB ceiling",
        guard.sampler_name(),
        ratio * 100.0,
        limits.memory_ceiling_bytes / (1024 * 1024)
    );
    println!(
        "     Worker slots: {}, per-job estimate: {} MiB, admission: {:?}",
        limits.worker_slots,
        limits.job_memory_estimate_bytes / (1024 * 1024),
        limits.admission
    );

    let probe = config.scratch_dir.join(".reelsmith-check");
    let writable = std::fs::create_dir_all(&config.scratch_dir)
        .and_then(|()| std::fs::write(&probe, b"ok"))
        .and_then(|()| std::fs::remove_file(&probe))
        .is_ok();
    if writable {
        println!("[OK] Scratch root: {}", config.scratch_dir.display());
    } else {
        println!("[FAIL] Scratch root not writable: {}", config.scratch_dir.display());
        ready = false;
    }

    println!();
    if ready {
        println!("All required capabilities are available. Reelsmith is ready.");
    } else {
        println!("Some required capabilities are missing. See above for fixes.");
    }

    Ok(())
}
