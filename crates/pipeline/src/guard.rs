//! Resource guard: memory-based admission control.
//!
//! The guard never frees memory. It decides whether one more job may start
//! by sampling live memory use, adding the estimates of every job already
//! admitted, and comparing the sum against an absolute ceiling.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use reelsmith_common::config::{LimitsConfig, MemorySource};
use reelsmith_render_engine::MemoryPressure;

/// Source of the "memory in use" figure.
pub trait MemorySampler: Send + Sync {
    /// Bytes currently in use.
    fn used_bytes(&self) -> u64;

    fn name(&self) -> &'static str;
}

/// Resident set size of this process and every descendant (`VmRSS` in
/// `/proc/<pid>/status`). Descendants are found through
/// `/proc/<pid>/task/*/children`, so encoder subprocesses are counted.
///
/// The default source.
#[derive(Debug)]
pub struct ProcessMemorySampler {
    proc_root: PathBuf,
    warned: AtomicBool,
}

/// Host-wide usage (`MemTotal - MemAvailable` in `/proc/meminfo`). Includes
/// memory of unrelated processes.
#[derive(Debug, Default)]
pub struct SystemMemorySampler {
    warned: AtomicBool,
}

/// A settable figure, for tests and for hosts without `/proc`.
#[derive(Debug, Default)]
pub struct FixedMemorySampler {
    used: AtomicU64,
}

impl Default for ProcessMemorySampler {
    fn default() -> Self {
        Self::with_proc_root("/proc")
    }
}

impl ProcessMemorySampler {
    /// Sample a proc filesystem mounted at `proc_root`.
    pub fn with_proc_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            warned: AtomicBool::new(false),
        }
    }

    fn tree_rss(&self) -> Option<u64> {
        let own = self.proc_root.join("self");
        let mut total = read_rss(&own)?;

        let mut seen = HashSet::new();
        let mut pending = child_pids(&own);
        while let Some(pid) = pending.pop() {
            if !seen.insert(pid) {
                continue;
            }
            let dir = self.proc_root.join(pid.to_string());
            // Children may exit between listing and reading.
            total += read_rss(&dir).unwrap_or(0);
            pending.extend(child_pids(&dir));
        }
        Some(total)
    }
}

impl MemorySampler for ProcessMemorySampler {
    fn used_bytes(&self) -> u64 {
        match self.tree_rss() {
            Some(bytes) => bytes,
            None => {
                warn_unavailable(&self.proc_root.join("self/status"), &self.warned);
                0
            }
        }
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

impl MemorySampler for SystemMemorySampler {
    fn used_bytes(&self) -> u64 {
        read_proc("/proc/meminfo", parse_meminfo_used, &self.warned)
    }

    fn name(&self) -> &'static str {
        "system"
    }
}

impl FixedMemorySampler {
    pub fn new(used_bytes: u64) -> Self {
        Self {
            used: AtomicU64::new(used_bytes),
        }
    }

    pub fn set(&self, used_bytes: u64) {
        self.used.store(used_bytes, Ordering::SeqCst);
    }
}

impl MemorySampler for FixedMemorySampler {
    fn used_bytes(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Sampler for a configured memory source.
pub fn sampler_for(source: MemorySource) -> Arc<dyn MemorySampler> {
    match source {
        MemorySource::System => Arc::new(SystemMemorySampler::default()),
        MemorySource::Process => Arc::new(ProcessMemorySampler::default()),
    }
}

fn read_proc(path: &str, parse: fn(&str) -> Option<u64>, warned: &AtomicBool) -> u64 {
    match std::fs::read_to_string(path).ok().and_then(|text| parse(&text)) {
        Some(bytes) => bytes,
        None => {
            warn_unavailable(Path::new(path), warned);
            0
        }
    }
}

fn warn_unavailable(path: &Path, warned: &AtomicBool) {
    if !warned.swap(true, Ordering::Relaxed) {
        tracing::warn!(
            path = %path.display(),
            "Memory usage unavailable; admission uses reservations only"
        );
    }
}

fn read_rss(proc_dir: &Path) -> Option<u64> {
    std::fs::read_to_string(proc_dir.join("status"))
        .ok()
        .and_then(|status| parse_status_rss(&status))
}

/// Direct children of every thread of a process.
fn child_pids(proc_dir: &Path) -> Vec<u32> {
    let tasks = match std::fs::read_dir(proc_dir.join("task")) {
        Ok(tasks) => tasks,
        Err(_) => return Vec::new(),
    };
    tasks
        .filter_map(Result::ok)
        .filter_map(|task| std::fs::read_to_string(task.path().join("children")).ok())
        .flat_map(|children| {
            children
                .split_whitespace()
                .filter_map(|pid| pid.parse::<u32>().ok())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Value of a `Key:   1234 kB` line, in bytes.
fn kib_field(text: &str, key: &str) -> Option<u64> {
    text.lines()
        .find_map(|line| line.strip_prefix(key))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

fn parse_status_rss(status: &str) -> Option<u64> {
    kib_field(status, "VmRSS:")
}

fn parse_meminfo_used(meminfo: &str) -> Option<u64> {
    let total = kib_field(meminfo, "MemTotal:")?;
    let available = kib_field(meminfo, "MemAvailable:")?;
    Some(total.saturating_sub(available))
}

/// A reservation that would cross the memory ceiling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("memory ceiling reached ({used_mib} MiB in use + {requested_mib} MiB requested > {ceiling_mib} MiB)")]
pub struct Rejected {
    pub used_mib: u64,
    pub requested_mib: u64,
    pub ceiling_mib: u64,
}

/// Bounds concurrent memory commitment across jobs.
pub struct ResourceGuard {
    ceiling_bytes: u64,
    degrade_threshold: f64,
    sampler: Arc<dyn MemorySampler>,
    reserved_bytes: AtomicU64,
    outstanding: AtomicUsize,
}

/// Admission token for one job. Released exactly once, when dropped.
#[must_use = "dropping a lease releases its reservation"]
pub struct Lease {
    guard: Arc<ResourceGuard>,
    bytes: u64,
}

impl ResourceGuard {
    pub fn new(
        ceiling_bytes: u64,
        degrade_threshold: f64,
        sampler: Arc<dyn MemorySampler>,
    ) -> Self {
        Self {
            ceiling_bytes,
            degrade_threshold,
            sampler,
            reserved_bytes: AtomicU64::new(0),
            outstanding: AtomicUsize::new(0),
        }
    }

    pub fn from_config(limits: &LimitsConfig, sampler: Arc<dyn MemorySampler>) -> Self {
        Self::new(limits.memory_ceiling_bytes, limits.degrade_threshold, sampler)
    }

    /// Reserve `estimated_bytes` for a job, or reject if the live sample plus
    /// outstanding reservations plus this request would exceed the ceiling.
    pub fn reserve(self: &Arc<Self>, estimated_bytes: u64) -> Result<Lease, Rejected> {
        let sampled = self.sampler.used_bytes();
        let mut reserved = self.reserved_bytes.load(Ordering::Acquire);

        loop {
            let projected = sampled
                .saturating_add(reserved)
                .saturating_add(estimated_bytes);
            if projected > self.ceiling_bytes {
                tracing::debug!(
                    sampled,
                    reserved,
                    estimated_bytes,
                    ceiling = self.ceiling_bytes,
                    "Reservation rejected"
                );
                return Err(Rejected {
                    used_mib: to_mib(sampled.saturating_add(reserved)),
                    requested_mib: to_mib(estimated_bytes),
                    ceiling_mib: to_mib(self.ceiling_bytes),
                });
            }

            match self.reserved_bytes.compare_exchange_weak(
                reserved,
                reserved + estimated_bytes,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => reserved = actual,
            }
        }

        self.outstanding.fetch_add(1, Ordering::AcqRel);
        Ok(Lease {
            guard: Arc::clone(self),
            bytes: estimated_bytes,
        })
    }

    /// Give a lease back. Equivalent to dropping it.
    pub fn release(&self, lease: Lease) {
        drop(lease);
    }

    /// Sampled plus reserved bytes over the ceiling, clamped to `[0, 1]`.
    pub fn current_usage_ratio(&self) -> f64 {
        if self.ceiling_bytes == 0 {
            return 1.0;
        }
        let used = self
            .sampler
            .used_bytes()
            .saturating_add(self.reserved_bytes());
        (used as f64 / self.ceiling_bytes as f64).clamp(0.0, 1.0)
    }

    /// `High` once usage reaches the degrade threshold.
    pub fn pressure(&self) -> MemoryPressure {
        if self.current_usage_ratio() >= self.degrade_threshold {
            MemoryPressure::High
        } else {
            MemoryPressure::Normal
        }
    }

    pub fn reserved_bytes(&self) -> u64 {
        self.reserved_bytes.load(Ordering::Acquire)
    }

    pub fn outstanding_leases(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn ceiling_bytes(&self) -> u64 {
        self.ceiling_bytes
    }

    pub fn sampler_name(&self) -> &'static str {
        self.sampler.name()
    }
}

impl fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("ceiling_bytes", &self.ceiling_bytes)
            .field("sampler", &self.sampler.name())
            .field("reserved_bytes", &self.reserved_bytes())
            .field("outstanding", &self.outstanding_leases())
            .finish()
    }
}

impl Lease {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.guard
            .reserved_bytes
            .fetch_sub(self.bytes, Ordering::AcqRel);
        self.guard.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").field("bytes", &self.bytes).finish()
    }
}

fn to_mib(bytes: u64) -> u64 {
    bytes / (1024 * 1024)
}
