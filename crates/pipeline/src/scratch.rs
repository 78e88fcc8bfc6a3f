//! Job-exclusive scratch directories.
//!
//! Every transient file lives under `<root>/<job_id>/` and is recorded in
//! the registry before it is written. A [`ScratchDir`] deletes its directory
//! when dropped, so cleanup follows the job's lifetime on every exit path.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use reelsmith_common::error::{ReelError, ReelResult};
use reelsmith_common::scratch::ScratchArea;
use reelsmith_job_model::JobId;

/// Scratch storage failures.
#[derive(Debug, thiserror::Error)]
pub enum ScratchError {
    #[error("scratch directory for job {job_id} already exists")]
    Collision { job_id: JobId },

    #[error("scratch area for job {job_id} was already released")]
    Released { job_id: JobId },

    #[error("invalid scratch file name: {name:?}")]
    InvalidName { name: String },

    #[error("scratch I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
struct ScratchEntry {
    dir: PathBuf,
    created: Instant,
    /// Set once the owning job is terminal; the retention window runs from here.
    finished: Option<Instant>,
    files: BTreeSet<PathBuf>,
}

#[derive(Debug)]
struct Shared {
    root: PathBuf,
    entries: Mutex<HashMap<JobId, ScratchEntry>>,
}

/// Tracks every live job scratch directory under one root.
#[derive(Debug, Clone)]
pub struct ScratchRegistry {
    shared: Arc<Shared>,
}

/// One job's scratch directory. Deleted on drop.
#[derive(Debug)]
pub struct ScratchDir {
    job_id: JobId,
    dir: PathBuf,
    shared: Arc<Shared>,
}

impl Shared {
    fn entries(&self) -> MutexGuard<'_, HashMap<JobId, ScratchEntry>> {
        // A panic while holding the lock cannot leave an entry half-written.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, job_id: &JobId, dir: &Path) {
        self.entries().remove(job_id);
        remove_dir(dir);
    }
}

impl ScratchRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            shared: Arc::new(Shared {
                root: root.into(),
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.shared.root
    }

    /// Create `<root>/<job_id>/` and register it.
    pub fn create(&self, job_id: JobId) -> Result<ScratchDir, ScratchError> {
        std::fs::create_dir_all(&self.shared.root)?;
        let dir = self.shared.root.join(job_id.to_string());

        let mut entries = self.shared.entries();
        if entries.contains_key(&job_id) {
            return Err(ScratchError::Collision { job_id });
        }
        match std::fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ScratchError::Collision { job_id });
            }
            Err(e) => return Err(e.into()),
        }
        entries.insert(
            job_id,
            ScratchEntry {
                dir: dir.clone(),
                created: Instant::now(),
                finished: None,
                files: BTreeSet::new(),
            },
        );
        drop(entries);

        tracing::debug!(%job_id, "Scratch directory created");
        Ok(ScratchDir {
            job_id,
            dir,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Number of live job directories.
    pub fn live_jobs(&self) -> usize {
        self.shared.entries().len()
    }

    /// Scratch resources still on disk: live directories plus their
    /// registered files.
    pub fn resource_count(&self) -> usize {
        self.shared
            .entries()
            .values()
            .map(|entry| usize::from(entry.dir.exists()) + count_on_disk(&entry.files))
            .sum()
    }

    /// Delete scratch of jobs that finished more than `retention` ago.
    ///
    /// Covers outputs that were never collected and directories left under
    /// the root by an earlier process. Running jobs are never touched.
    /// Returns the number of directories removed.
    pub fn sweep(&self, retention: Duration) -> usize {
        let expired: Vec<(JobId, ScratchEntry)> = {
            let mut entries = self.shared.entries();
            let ids: Vec<JobId> = entries
                .iter()
                .filter(|(_, entry)| {
                    entry
                        .finished
                        .is_some_and(|finished| finished.elapsed() >= retention)
                })
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        for (job_id, entry) in &expired {
            tracing::info!(
                %job_id,
                age_secs = entry.created.elapsed().as_secs(),
                "Retention window elapsed, deleting scratch"
            );
            remove_dir(&entry.dir);
        }

        expired.len() + self.sweep_orphans(retention)
    }

    fn sweep_orphans(&self, retention: Duration) -> usize {
        let Ok(read_dir) = std::fs::read_dir(&self.shared.root) else {
            return 0;
        };

        let live: BTreeSet<PathBuf> = self
            .shared
            .entries()
            .values()
            .map(|entry| entry.dir.clone())
            .collect();

        let mut removed = 0;
        for entry in read_dir.flatten() {
            let path = entry.path();
            if live.contains(&path) || !path.is_dir() {
                continue;
            }
            let old_enough = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                .is_some_and(|age| age >= retention);
            if old_enough {
                tracing::info!(dir = %path.display(), "Deleting orphaned scratch directory");
                remove_dir(&path);
                removed += 1;
            }
        }
        removed
    }

    /// Delete every registered scratch directory.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<ScratchEntry> = self
            .shared
            .entries()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in &drained {
            remove_dir(&entry.dir);
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "Scratch released on shutdown");
        }
        drained.len()
    }
}

impl ScratchDir {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Start the retention window. Called once the job is terminal.
    pub fn mark_finished(&self) {
        if let Some(entry) = self.shared.entries().get_mut(&self.job_id) {
            entry.finished.get_or_insert_with(Instant::now);
        }
    }

    /// Registered files of this job still on disk.
    pub fn resource_count(&self) -> usize {
        self.shared
            .entries()
            .get(&self.job_id)
            .map(|entry| count_on_disk(&entry.files))
            .unwrap_or(0)
    }

    fn try_register(&self, file_name: &str) -> Result<PathBuf, ScratchError> {
        let valid = !file_name.is_empty()
            && file_name != "."
            && file_name != ".."
            && !file_name.contains(['/', '\\']);
        if !valid {
            return Err(ScratchError::InvalidName {
                name: file_name.to_string(),
            });
        }

        let mut entries = self.shared.entries();
        let entry = entries.get_mut(&self.job_id).ok_or(ScratchError::Released {
            job_id: self.job_id,
        })?;
        let path = entry.dir.join(file_name);
        entry.files.insert(path.clone());
        Ok(path)
    }
}

impl ScratchArea for ScratchDir {
    fn register(&self, file_name: &str) -> ReelResult<PathBuf> {
        self.try_register(file_name)
            .map_err(|e| ReelError::scratch(e.to_string()))
    }

    fn discard(&self, path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(job_id = %self.job_id, error = %e, "Failed to delete scratch file");
            }
        }
        if let Some(entry) = self.shared.entries().get_mut(&self.job_id) {
            entry.files.remove(path);
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        self.shared.release(&self.job_id, &self.dir);
        tracing::debug!(job_id = %self.job_id, "Scratch directory released");
    }
}

fn count_on_disk(files: &BTreeSet<PathBuf>) -> usize {
    files.iter().filter(|path| path.exists()).count()
}

fn remove_dir(dir: &Path) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "Failed to delete scratch"),
    }
}
